// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCALE-OUT LEDGER (SDL) - TRANSACTION PATTERNS
//
// A pattern decides when and to whom this node transacts. The executor
// loop runs it on a dedicated thread until the pattern finishes, fails,
// or the node cancels it between steps.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::config::PatternConfig;
use crate::error::NodeError;
use crate::node::{NodeContext, NodeId};
use crate::task::CancelSignal;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternStep {
    Continue,
    Finished,
}

/// Strategy generating this node's transactions.
pub trait TransactionPattern: Send + Sync {
    fn name(&self) -> &str;

    /// Delay before the first step.
    fn initial_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Delay between two steps.
    fn next_delay(&self) -> Duration;

    /// Perform one step, usually a single transaction.
    fn perform(&self, ctx: &NodeContext) -> Result<PatternStep, NodeError>;
}

/// Executor loop. Cancellation is checked before every step and wakes the
/// loop from its delays; a step already running is never interrupted.
pub fn run_pattern(
    pattern: Arc<dyn TransactionPattern>,
    ctx: NodeContext,
    signal: CancelSignal,
) -> Result<(), NodeError> {
    let node_id = ctx.node_id();
    if !signal.sleep(pattern.initial_delay()) {
        debug!("Node {}: pattern {} cancelled before start", node_id, pattern.name());
        return Ok(());
    }

    let mut steps = 0u64;
    while !signal.is_cancelled() {
        match pattern.perform(&ctx)? {
            PatternStep::Continue => steps += 1,
            PatternStep::Finished => {
                info!(
                    "Node {}: pattern {} finished after {} steps",
                    node_id,
                    pattern.name(),
                    steps
                );
                return Ok(());
            }
        }
        if !signal.sleep(pattern.next_delay()) {
            break;
        }
    }

    info!(
        "Node {}: pattern {} cancelled after {} steps",
        node_id,
        pattern.name(),
        steps
    );
    Ok(())
}

/// Sends a uniformly random amount to a uniformly random peer, waiting a
/// uniformly random delay between transactions.
pub struct UniformRandomPattern {
    min_amount: u64,
    max_amount: u64,
    min_delay: Duration,
    max_delay: Duration,
    limit: Option<u64>,
    performed: AtomicU64,
}

impl UniformRandomPattern {
    pub fn new(
        min_amount: u64,
        max_amount: u64,
        min_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, NodeError> {
        if min_amount > max_amount {
            return Err(NodeError::Config(format!(
                "min_amount {} exceeds max_amount {}",
                min_amount, max_amount
            )));
        }
        if min_delay > max_delay {
            return Err(NodeError::Config(format!(
                "min delay {:?} exceeds max delay {:?}",
                min_delay, max_delay
            )));
        }
        Ok(Self {
            min_amount,
            max_amount,
            min_delay,
            max_delay,
            limit: None,
            performed: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &PatternConfig) -> Result<Self, NodeError> {
        let pattern = Self::new(
            config.min_amount,
            config.max_amount,
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )?;
        Ok(match config.limit {
            Some(limit) => pattern.with_limit(limit),
            None => pattern,
        })
    }

    /// Finish after `limit` transactions.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn performed(&self) -> u64 {
        self.performed.load(Ordering::SeqCst)
    }

    fn limit_reached(&self, performed: u64) -> bool {
        self.limit.is_some_and(|limit| performed >= limit)
    }
}

impl TransactionPattern for UniformRandomPattern {
    fn name(&self) -> &str {
        "uniform-random"
    }

    fn next_delay(&self) -> Duration {
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }

    fn perform(&self, ctx: &NodeContext) -> Result<PatternStep, NodeError> {
        if self.limit_reached(self.performed()) {
            return Ok(PatternStep::Finished);
        }

        let peers: Vec<NodeId> = ctx
            .peers()
            .iter()
            .copied()
            .filter(|peer| *peer != ctx.node_id())
            .collect();
        let mut rng = rand::thread_rng();
        let Some(&receiver) = peers.choose(&mut rng) else {
            warn!("Node {}: no peers to transact with", ctx.node_id());
            return Ok(PatternStep::Finished);
        };
        let amount = rng.gen_range(self.min_amount..=self.max_amount);

        let tx = ctx.build_transaction(receiver, amount);
        debug!(
            "Node {}: scheduling transaction {} of {} to node {}",
            ctx.node_id(),
            tx.nonce,
            amount,
            receiver
        );
        ctx.sender().schedule(tx)?;

        let performed = self.performed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.limit_reached(performed) {
            Ok(PatternStep::Finished)
        } else {
            Ok(PatternStep::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{GenesisBlock, OwnNode};
    use crate::sender::{OutboundTransaction, TransactionSender, TransactionTransport};
    use crate::task::{safe_lock, ManagedTask};
    use ed25519_dalek::{Signature, SigningKey, Verifier};
    use sdl_mainchain::{AnchorHash, CommitOutcome, MainChain};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<OutboundTransaction>>);

    impl TransactionTransport for Collect {
        fn send(&self, tx: &OutboundTransaction) -> Result<(), NodeError> {
            safe_lock(&self.0).push(tx.clone());
            Ok(())
        }
    }

    struct NoChain;

    impl MainChain for NoChain {
        fn commit_abstract(&self, _payload: &[u8]) -> CommitOutcome {
            CommitOutcome::Transport("offline".to_string())
        }
        fn is_present(&self, _hash: &AnchorHash) -> bool {
            false
        }
        fn stop(&self) {}
        fn is_stopped(&self) -> bool {
            true
        }
    }

    fn context(peers: &[NodeId], transport: Arc<Collect>) -> NodeContext {
        let sender = TransactionSender::start(1, transport).unwrap();
        NodeContext::new(
            OwnNode::new(1).with_peers(peers.iter().copied()),
            &GenesisBlock::new(b"genesis".to_vec()),
            SigningKey::from_bytes(&[7u8; 32]),
            sender,
            Arc::new(NoChain),
        )
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        assert!(UniformRandomPattern::new(10, 1, Duration::ZERO, Duration::ZERO).is_err());
        assert!(UniformRandomPattern::new(
            1,
            10,
            Duration::from_millis(5),
            Duration::from_millis(1)
        )
        .is_err());
    }

    #[test]
    fn test_delay_keeps_sub_millisecond_precision() {
        let fixed = UniformRandomPattern::new(
            1,
            1,
            Duration::from_micros(1500),
            Duration::from_micros(1500),
        )
        .unwrap();
        assert_eq!(fixed.next_delay(), Duration::from_micros(1500));

        let ranged =
            UniformRandomPattern::new(1, 1, Duration::from_micros(10), Duration::from_micros(900))
                .unwrap();
        for _ in 0..50 {
            let delay = ranged.next_delay();
            assert!(delay >= Duration::from_micros(10));
            assert!(delay <= Duration::from_micros(900));
        }
    }

    #[test]
    fn test_limited_pattern_finishes() {
        let transport = Arc::new(Collect::default());
        let ctx = context(&[2, 3], transport.clone());
        let pattern = Arc::new(
            UniformRandomPattern::new(1, 100, Duration::ZERO, Duration::ZERO)
                .unwrap()
                .with_limit(5),
        );

        run_pattern(pattern.clone(), ctx.clone(), CancelSignal::new()).unwrap();
        ctx.sender().wait_until_done().unwrap();

        assert_eq!(pattern.performed(), 5);
        let sent = safe_lock(&transport.0);
        assert_eq!(sent.len(), 5);
        for tx in sent.iter() {
            assert!(tx.receiver == 2 || tx.receiver == 3);
            assert!((1..=100).contains(&tx.amount));
            let signature = Signature::from_slice(&tx.signature).unwrap();
            assert!(ctx.verifying_key().verify(&tx.signing_bytes(), &signature).is_ok());
        }
        let nonces: Vec<u64> = sent.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_no_peers_finishes_immediately() {
        let transport = Arc::new(Collect::default());
        let ctx = context(&[], transport.clone());
        let pattern = Arc::new(UniformRandomPattern::new(1, 1, Duration::ZERO, Duration::ZERO).unwrap());
        run_pattern(pattern.clone(), ctx, CancelSignal::new()).unwrap();
        assert_eq!(pattern.performed(), 0);
    }

    #[test]
    fn test_cancel_stops_unbounded_pattern() {
        let transport = Arc::new(Collect::default());
        let ctx = context(&[2], transport);
        let pattern: Arc<dyn TransactionPattern> = Arc::new(
            UniformRandomPattern::new(1, 1, Duration::from_millis(1), Duration::from_millis(2))
                .unwrap(),
        );

        let task = ManagedTask::spawn("test-pattern", move |signal| {
            run_pattern(pattern, ctx, signal)
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(task.is_alive());
        task.cancel();
        assert!(task.waiter().wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_schedule_failure_ends_pattern() {
        let transport = Arc::new(Collect::default());
        let ctx = context(&[2], transport);
        ctx.sender().shutdown_now();
        let pattern = Arc::new(UniformRandomPattern::new(1, 1, Duration::ZERO, Duration::ZERO).unwrap());
        assert!(matches!(
            run_pattern(pattern, ctx, CancelSignal::new()),
            Err(NodeError::SenderShutdown)
        ));
    }
}
