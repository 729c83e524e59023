// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCALE-OUT LEDGER (SDL) - NODE APPLICATION (LIFECYCLE COORDINATOR)
//
// Uninitialized ─init─▶ Initializing ─▶ Running ⇄ Transacting ─kill─▶ Stopped
//
// - init: bind listener, start sender, register as running on the tracker;
//   the lock is released meanwhile and a kill during init wins
// - at most one transaction pattern runs at a time
// - finish_transaction_sending: drain the sender, then deregister
// - kill: stop listener, cancel pattern, drop unsent work, stop main chain
//
// Run state, installed pattern, executor and sender live in one struct
// behind one mutex, so every check-then-act is atomic.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::error::NodeError;
use crate::node::{GenesisBlock, NodeContext, NodeId, OwnNode};
use crate::pattern::{run_pattern, TransactionPattern};
use crate::sender::{TransactionSender, TransactionTransport};
use crate::server::{ConnectionHandler, SocketServer};
use crate::task::{safe_lock, ManagedTask, TaskWaiter};
use crate::tracker::NodeRegistry;
use ed25519_dalek::SigningKey;
use log::{debug, error, info, warn};
use sdl_mainchain::MainChain;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRunState {
    Uninitialized,
    /// `init` is binding the listener and registering with the tracker.
    Initializing,
    Running,
    Transacting,
    ShuttingDown,
    Stopped,
}

/// External collaborators of a node.
#[derive(Clone)]
pub struct NodeServices {
    pub registry: Arc<dyn NodeRegistry>,
    pub main_chain: Arc<dyn MainChain>,
    pub transport: Arc<dyn TransactionTransport>,
    pub handler: Arc<dyn ConnectionHandler>,
}

struct Lifecycle {
    /// Never `Transacting`; that state is derived from the executor.
    state: NodeRunState,
    context: Option<NodeContext>,
    server: Option<ManagedTask>,
    local_addr: Option<SocketAddr>,
    sender: Option<Arc<TransactionSender>>,
    pattern: Option<Arc<dyn TransactionPattern>>,
    executor: Option<ManagedTask>,
}

impl Lifecycle {
    fn is_transacting(&self) -> bool {
        self.executor.as_ref().is_some_and(ManagedTask::is_alive)
    }

    fn node_label(&self) -> String {
        self.context
            .as_ref()
            .map(|ctx| ctx.node_id().to_string())
            .unwrap_or_else(|| "?".to_string())
    }

    fn ensure_running(&self) -> Result<(), NodeError> {
        match self.state {
            NodeRunState::Running | NodeRunState::Transacting => Ok(()),
            NodeRunState::Uninitialized | NodeRunState::Initializing => {
                Err(NodeError::NotInitialized)
            }
            NodeRunState::ShuttingDown | NodeRunState::Stopped => Err(NodeError::Stopped),
        }
    }
}

struct StartedServices {
    server: ManagedTask,
    local_addr: SocketAddr,
    sender: Arc<TransactionSender>,
}

/// Runs one node.
pub struct Application {
    services: NodeServices,
    lifecycle: Mutex<Lifecycle>,
}

impl Application {
    /// The application must be initialized with [`Application::init`]
    /// before it can be used.
    pub fn new(services: NodeServices) -> Self {
        Self {
            services,
            lifecycle: Mutex::new(Lifecycle {
                state: NodeRunState::Uninitialized,
                context: None,
                server: None,
                local_addr: None,
                sender: None,
                pattern: None,
                executor: None,
            }),
        }
    }

    /// Start accepting connections on `node_port`, start the transaction
    /// sender and register the node as running.
    ///
    /// The lifecycle lock is not held while binding and registering, so
    /// `kill` stays responsive. If the node is killed meanwhile, everything
    /// started here is shut down again and `Stopped` is returned. On any
    /// other error the node stays uninitialized.
    pub fn init(
        &self,
        node_port: u16,
        genesis: GenesisBlock,
        key: SigningKey,
        own_node: OwnNode,
    ) -> Result<(), NodeError> {
        {
            let mut lifecycle = safe_lock(&self.lifecycle);
            match lifecycle.state {
                NodeRunState::Uninitialized => {}
                NodeRunState::ShuttingDown | NodeRunState::Stopped => {
                    return Err(NodeError::Stopped)
                }
                NodeRunState::Initializing
                | NodeRunState::Running
                | NodeRunState::Transacting => return Err(NodeError::AlreadyInitialized),
            }
            lifecycle.state = NodeRunState::Initializing;
        }

        let node_id = own_node.id();
        let started = self.start_services(node_port, node_id);

        let mut lifecycle = safe_lock(&self.lifecycle);
        let started = match started {
            Ok(started) => started,
            Err(e) => {
                if lifecycle.state == NodeRunState::Initializing {
                    lifecycle.state = NodeRunState::Uninitialized;
                }
                return Err(e);
            }
        };

        if lifecycle.state != NodeRunState::Initializing {
            drop(lifecycle);
            warn!("Node {}: killed during init, shutting down again", node_id);
            started.server.cancel();
            started.sender.shutdown_now();
            if let Err(e) = self.services.registry.set_running(node_id, false) {
                error!(
                    "Cannot update running status to stopped for node {}: {}",
                    node_id, e
                );
            }
            return Err(NodeError::Stopped);
        }

        let genesis_hash = hex::encode(genesis.hash());
        lifecycle.context = Some(NodeContext::new(
            own_node,
            &genesis,
            key,
            Arc::clone(&started.sender),
            Arc::clone(&self.services.main_chain),
        ));
        lifecycle.server = Some(started.server);
        lifecycle.local_addr = Some(started.local_addr);
        lifecycle.sender = Some(started.sender);
        lifecycle.state = NodeRunState::Running;

        info!(
            "🚀 Node {} initialized on {} (genesis {})",
            node_id, started.local_addr, genesis_hash
        );
        Ok(())
    }

    /// Bind, start the sender and register; undo what was started on error.
    fn start_services(
        &self,
        node_port: u16,
        node_id: NodeId,
    ) -> Result<StartedServices, NodeError> {
        let server = SocketServer::bind(node_port, Arc::clone(&self.services.handler))?;
        let local_addr = server.local_addr()?;
        let server = server.spawn(node_id)?;

        let transport = Arc::clone(&self.services.transport);
        let sender = match TransactionSender::start(node_id, transport) {
            Ok(sender) => sender,
            Err(e) => {
                server.cancel();
                return Err(e);
            }
        };

        if let Err(e) = self.services.registry.set_running(node_id, true) {
            error!("Node {}: registration with tracker failed: {}", node_id, e);
            server.cancel();
            sender.shutdown_now();
            return Err(e);
        }

        Ok(StartedServices {
            server,
            local_addr,
            sender,
        })
    }

    /// Install the pattern run by the next [`Application::start_transacting`].
    ///
    /// Fails with `AlreadyTransacting` while a pattern is running.
    pub fn set_transaction_pattern(
        &self,
        pattern: Arc<dyn TransactionPattern>,
    ) -> Result<(), NodeError> {
        let mut lifecycle = safe_lock(&self.lifecycle);
        lifecycle.ensure_running()?;
        if lifecycle.is_transacting() {
            return Err(NodeError::AlreadyTransacting);
        }
        debug!(
            "Node {}: set transaction pattern {}",
            lifecycle.node_label(),
            pattern.name()
        );
        lifecycle.pattern = Some(pattern);
        Ok(())
    }

    /// Run the installed pattern on its own thread.
    ///
    /// Fails with `AlreadyTransacting` while a pattern is running. Failures
    /// inside the pattern are logged by the executor thread.
    pub fn start_transacting(&self) -> Result<(), NodeError> {
        let mut lifecycle = safe_lock(&self.lifecycle);
        lifecycle.ensure_running()?;
        if lifecycle.is_transacting() {
            return Err(NodeError::AlreadyTransacting);
        }
        let pattern = lifecycle.pattern.clone().ok_or(NodeError::NoPattern)?;
        let ctx = lifecycle.context.clone().ok_or(NodeError::NotInitialized)?;
        let node_id = ctx.node_id();

        let executor = ManagedTask::spawn(format!("sdl-pattern-{}", node_id), move |signal| {
            run_pattern(pattern, ctx, signal)
        })?;
        lifecycle.executor = Some(executor);

        info!("Node {}: started transacting with transaction pattern", node_id);
        Ok(())
    }

    /// Ask the running pattern to stop. Returns without waiting for it.
    pub fn stop_transacting(&self) {
        let lifecycle = safe_lock(&self.lifecycle);
        if let Some(executor) = lifecycle.executor.as_ref().filter(|e| e.is_alive()) {
            executor.cancel();
            info!(
                "Node {}: stopped transacting with transaction pattern",
                lifecycle.node_label()
            );
        }
    }

    /// Whether a pattern thread exists and is still alive.
    pub fn is_transacting(&self) -> bool {
        safe_lock(&self.lifecycle).is_transacting()
    }

    pub fn run_state(&self) -> NodeRunState {
        let lifecycle = safe_lock(&self.lifecycle);
        match lifecycle.state {
            NodeRunState::Running if lifecycle.is_transacting() => NodeRunState::Transacting,
            state => state,
        }
    }

    /// Wait for the current pattern thread to exit.
    /// Returns `true` if no pattern is running by the deadline.
    pub fn wait_for_pattern(&self, timeout: Duration) -> bool {
        self.waiter(|lifecycle| lifecycle.executor.as_ref())
            .map_or(true, |waiter| waiter.wait_timeout(timeout))
    }

    /// Wait for the connection listener to release its port after `kill`.
    pub fn wait_for_listener(&self, timeout: Duration) -> bool {
        self.waiter(|lifecycle| lifecycle.server.as_ref())
            .map_or(true, |waiter| waiter.wait_timeout(timeout))
    }

    fn waiter(&self, select: impl FnOnce(&Lifecycle) -> Option<&ManagedTask>) -> Option<TaskWaiter> {
        let lifecycle = safe_lock(&self.lifecycle);
        select(&*lifecycle).map(ManagedTask::waiter)
    }

    /// Wait until all transactions have been sent, then mark this node as
    /// stopped on the tracker.
    ///
    /// Failures are logged; the call always returns normally.
    pub fn finish_transaction_sending(&self) {
        let (node_id, sender) = {
            let lifecycle = safe_lock(&self.lifecycle);
            match (lifecycle.context.as_ref(), lifecycle.sender.clone()) {
                (Some(ctx), Some(sender)) => (ctx.node_id(), sender),
                _ => {
                    warn!("finish_transaction_sending called on a node that was never initialized");
                    return;
                }
            }
        };

        if let Err(e) = sender.wait_until_done() {
            error!(
                "Node {}: {}, node is not marked stopped",
                node_id, e
            );
            return;
        }

        if let Err(e) = self.services.registry.set_running(node_id, false) {
            error!(
                "Cannot update running status to stopped for node {}: {}",
                node_id, e
            );
        }
    }

    /// Stop this node: no new connections are accepted, the running pattern
    /// is cancelled, unsent transactions are dropped and the main chain
    /// connection is released. Safe to call in any state, any number of times.
    pub fn kill(&self) {
        let mut lifecycle = safe_lock(&self.lifecycle);
        if lifecycle.state == NodeRunState::Stopped {
            debug!("Node {}: already stopped", lifecycle.node_label());
            return;
        }
        lifecycle.state = NodeRunState::ShuttingDown;

        if let Some(server) = lifecycle.server.as_ref().filter(|s| s.is_alive()) {
            server.cancel();
        }
        if let Some(executor) = lifecycle.executor.as_ref().filter(|e| e.is_alive()) {
            executor.cancel();
        }
        if let Some(sender) = lifecycle.sender.as_ref() {
            sender.shutdown_now();
        }
        self.services.main_chain.stop();

        lifecycle.state = NodeRunState::Stopped;
        info!("🛑 Node {} stopped", lifecycle.node_label());
    }

    pub fn node_id(&self) -> Option<NodeId> {
        safe_lock(&self.lifecycle)
            .context
            .as_ref()
            .map(NodeContext::node_id)
    }

    /// Address the connection listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        safe_lock(&self.lifecycle).local_addr
    }

    pub fn sender(&self) -> Option<Arc<TransactionSender>> {
        safe_lock(&self.lifecycle).sender.clone()
    }

    pub fn main_chain(&self) -> Arc<dyn MainChain> {
        Arc::clone(&self.services.main_chain)
    }
}
