// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCALE-OUT LEDGER (SDL) - CONNECTION LISTENER
//
// Accepts peer connections for the lifetime of the node. Binding happens
// synchronously so a taken port fails init; the accept loop then runs on a
// managed task and releases the port promptly once cancelled.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::error::NodeError;
use crate::node::NodeId;
use crate::task::{CancelSignal, ManagedTask};
use crossbeam::channel;
use crossbeam::select;
use log::{debug, info, warn};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Handles one accepted peer connection, on a thread of its own.
pub trait ConnectionHandler: Send + Sync {
    fn handle(&self, stream: TcpStream, peer: SocketAddr);
}

pub struct SocketServer {
    port: u16,
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
}

impl SocketServer {
    /// Bind on all interfaces. Port 0 picks a free port.
    pub fn bind(port: u16, handler: Arc<dyn ConnectionHandler>) -> Result<Self, NodeError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|source| NodeError::Bind { port, source })?;
        Ok(Self {
            port,
            listener,
            handler,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NodeError> {
        self.listener
            .local_addr()
            .map_err(|e| NodeError::Io("listener address", e))
    }

    /// Run the accept loop on its own thread.
    pub fn spawn(self, node_id: NodeId) -> Result<ManagedTask, NodeError> {
        ManagedTask::spawn(format!("sdl-server-{}", node_id), move |signal| {
            self.run(node_id, signal)
        })
    }

    fn run(self, node_id: NodeId, signal: CancelSignal) -> Result<(), NodeError> {
        let addr = self.local_addr()?;
        // Held until the accept loop returns; disconnecting it retires the waker.
        let (_running, exited) = channel::bounded::<()>(0);
        spawn_waker(node_id, addr, signal.clone(), exited)?;
        info!("📡 Accepting connections on {}", addr);

        loop {
            let accepted = self.listener.accept();
            if signal.is_cancelled() {
                break;
            }
            match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    let handler = Arc::clone(&self.handler);
                    let spawned = thread::Builder::new()
                        .name(format!("sdl-conn-{}", peer))
                        .spawn(move || handler.handle(stream, peer));
                    if let Err(e) = spawned {
                        warn!("Dropping connection from {}: {}", peer, e);
                    }
                }
                Err(e) => {
                    warn!("Accept failed on port {}: {}", self.port, e);
                    if !signal.sleep(ACCEPT_BACKOFF) {
                        break;
                    }
                }
            }
        }

        info!("📡 Stopped accepting connections on {}", addr);
        Ok(())
    }
}

/// Unblocks the accept loop once `signal` is cancelled by connecting to it.
fn spawn_waker(
    node_id: NodeId,
    listen_addr: SocketAddr,
    signal: CancelSignal,
    exited: channel::Receiver<()>,
) -> Result<(), NodeError> {
    let mut wake_addr = listen_addr;
    if wake_addr.ip().is_unspecified() {
        wake_addr.set_ip(match wake_addr {
            SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
        });
    }
    thread::Builder::new()
        .name(format!("sdl-server-waker-{}", node_id))
        .spawn(move || {
            select! {
                recv(signal.cancelled()) -> _ => {
                    if let Err(e) = TcpStream::connect_timeout(&wake_addr, WAKE_CONNECT_TIMEOUT) {
                        warn!("Cannot wake listener on {}: {}", wake_addr, e);
                    }
                },
                recv(exited) -> _ => {},
            }
        })
        .map(|_| ())
        .map_err(|e| NodeError::Io("spawn listener waker", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::safe_lock;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingHandler {
        peers: Mutex<Vec<SocketAddr>>,
    }

    impl ConnectionHandler for CountingHandler {
        fn handle(&self, _stream: TcpStream, peer: SocketAddr) {
            safe_lock(&self.peers).push(peer);
        }
    }

    #[test]
    fn test_accepts_until_cancelled() {
        let handler = Arc::new(CountingHandler::default());
        let server = SocketServer::bind(0, handler.clone()).unwrap();
        let port = server.local_addr().unwrap().port();
        let task = server.spawn(0).unwrap();

        TcpStream::connect(("127.0.0.1", port)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while safe_lock(&handler.peers).is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(safe_lock(&handler.peers).len(), 1);

        task.cancel();
        assert!(task.waiter().wait_timeout(Duration::from_secs(5)));

        // Listener dropped with the task: the port can be bound again.
        SocketServer::bind(port, handler).unwrap();
    }

    #[test]
    fn test_cancel_wakes_idle_listener() {
        let handler = Arc::new(CountingHandler::default());
        let server = SocketServer::bind(0, handler.clone()).unwrap();
        let port = server.local_addr().unwrap().port();
        let task = server.spawn(0).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let start = std::time::Instant::now();
        task.cancel();
        assert!(task.waiter().wait_timeout(Duration::from_secs(2)));
        assert!(start.elapsed() < Duration::from_secs(2));
        // The wake-up connection is not handed to the handler.
        assert!(safe_lock(&handler.peers).is_empty());
        SocketServer::bind(port, handler).unwrap();
    }

    #[test]
    fn test_bind_conflict_is_bind_error() {
        let handler = Arc::new(CountingHandler::default());
        let first = SocketServer::bind(0, handler.clone()).unwrap();
        let port = first.local_addr().unwrap().port();
        match SocketServer::bind(port, handler) {
            Err(NodeError::Bind { port: p, .. }) => assert_eq!(p, port),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("second bind succeeded"),
        }
    }
}
