//! Worker connection state machine and reconnect-with-backoff loop.
//!
//! `Disconnected → Connecting → Connected → Reconnecting → Connected | Disconnected`.
//! Transitions are published on a `watch` channel; logging subscribes to it
//! instead of living in the transport code.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Publishing side of the state channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StateHandle {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl StateHandle {
    pub fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn set(&self, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }
}

/// Log every state transition until the publisher goes away.
pub async fn log_state_changes(mut rx: watch::Receiver<ConnectionState>) {
    let mut previous = *rx.borrow_and_update();
    while rx.changed().await.is_ok() {
        let current = *rx.borrow_and_update();
        match current {
            ConnectionState::Connected => {
                tracing::info!(from = ?previous, "connected to coordinator")
            }
            ConnectionState::Reconnecting => {
                tracing::warn!(from = ?previous, "connection lost, reconnecting")
            }
            ConnectionState::Disconnected => {
                tracing::info!(from = ?previous, "disconnected from coordinator")
            }
            ConnectionState::Connecting => {
                tracing::info!(from = ?previous, "connecting to coordinator")
            }
        }
        previous = current;
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Ordered delay table. Attempt `k` (1-indexed) waits `delays[min(k-1, len-1)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
}

impl ReconnectPolicy {
    /// An empty table falls back to retrying after one second.
    pub fn new(delays: Vec<Duration>) -> Self {
        if delays.is_empty() {
            return Self {
                delays: vec![Duration::from_secs(1)],
            };
        }
        Self { delays }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let last = self.delays.len() - 1;
        let index = (attempt.max(1) as usize - 1).min(last);
        self.delays[index]
    }
}

/// How one connection attempt ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The channel could not be established.
    Failed(ChannelError),
    /// A session was established and later ended, cleanly or not.
    Disconnected(Option<ChannelError>),
}

/// Drive `attempt` until `cancel` fires.
///
/// `attempt` is expected to publish `Connected` itself once its handshake
/// succeeds. Cancellation interrupts both an in-progress attempt and a
/// backoff wait; no attempt is started after it.
pub async fn run_with_reconnect<F, Fut>(
    policy: &ReconnectPolicy,
    state: &StateHandle,
    cancel: &CancellationToken,
    mut attempt: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = AttemptOutcome>,
{
    let mut ever_connected = false;
    let mut pending_attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        state.set(if ever_connected {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = attempt() => outcome,
        };

        match outcome {
            AttemptOutcome::Failed(err) => {
                pending_attempt += 1;
                tracing::warn!(attempt = pending_attempt, error = %err, "connection attempt failed");
            }
            AttemptOutcome::Disconnected(reason) => {
                ever_connected = true;
                pending_attempt = 1;
                state.set(ConnectionState::Reconnecting);
                match reason {
                    Some(err) => tracing::warn!(error = %err, "session ended"),
                    None => tracing::info!("session closed by coordinator"),
                }
            }
        }

        let delay = policy.delay_for(pending_attempt);
        tracing::info!(
            attempt = pending_attempt,
            delay_ms = delay.as_millis() as u64,
            "waiting before reconnect",
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    state.set(ConnectionState::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::advance;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new([2, 5, 10, 15, 30].map(Duration::from_secs).to_vec())
    }

    #[rstest]
    #[case(1, 2)]
    #[case(2, 5)]
    #[case(3, 10)]
    #[case(4, 15)]
    #[case(5, 30)]
    #[case(6, 30)]
    #[case(1_000, 30)]
    fn delay_grows_through_table_then_holds(#[case] attempt: u32, #[case] secs: u64) {
        assert_eq!(policy().delay_for(attempt), Duration::from_secs(secs));
    }

    #[test]
    fn empty_table_still_backs_off() {
        let policy = ReconnectPolicy::new(Vec::new());
        assert_eq!(policy.delay_for(3), Duration::from_secs(1));
    }

    /// Let spawned tasks run up to their next timer.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn failed_attempts_follow_the_delay_table() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let (state, _rx) = StateHandle::new();

        let task = {
            let attempts = attempts.clone();
            let cancel = cancel.clone();
            let state = state.clone();
            tokio::spawn(async move {
                run_with_reconnect(&policy(), &state, &cancel, || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { AttemptOutcome::Failed(ChannelError::Protocol("refused".into())) }
                })
                .await
            })
        };

        settle().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(state.get(), ConnectionState::Connecting);

        // Attempt 2 after 2s, 3 after 5s more, 4 after 10s, 5 after 15s, 6 after 30s, 7 after 30s.
        for (wait, expected) in [(2, 2), (5, 3), (10, 4), (15, 5), (30, 6), (30, 7)] {
            advance(Duration::from_secs(wait) - Duration::from_millis(1)).await;
            settle().await;
            assert_eq!(attempts.load(Ordering::SeqCst), expected - 1, "before {wait}s wait");
            advance(Duration::from_millis(1)).await;
            settle().await;
            assert_eq!(attempts.load(Ordering::SeqCst), expected, "after {wait}s wait");
        }

        cancel.cancel();
        task.await.expect("join");
        assert_eq!(state.get(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn cancel_during_wait_stops_without_another_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let (state, _rx) = StateHandle::new();

        let task = {
            let attempts = attempts.clone();
            let cancel = cancel.clone();
            let state = state.clone();
            tokio::spawn(async move {
                run_with_reconnect(&policy(), &state, &cancel, || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { AttemptOutcome::Failed(ChannelError::Protocol("refused".into())) }
                })
                .await
            })
        };

        settle().await;
        advance(Duration::from_secs(1)).await;
        cancel.cancel();
        task.await.expect("join");

        advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(state.get(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn dropped_session_moves_to_reconnecting_and_restarts_the_table() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let (state, _rx) = StateHandle::new();

        let task = {
            let attempts = attempts.clone();
            let cancel = cancel.clone();
            let state = state.clone();
            tokio::spawn(async move {
                let inner = state.clone();
                run_with_reconnect(&policy(), &state, &cancel, move || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let inner = inner.clone();
                    async move {
                        match n {
                            1 | 2 => AttemptOutcome::Failed(ChannelError::Protocol("down".into())),
                            _ => {
                                inner.set(ConnectionState::Connected);
                                tokio::time::sleep(Duration::from_secs(60)).await;
                                AttemptOutcome::Disconnected(None)
                            }
                        }
                    }
                })
                .await
            })
        };

        settle().await;
        advance(Duration::from_secs(2)).await;
        settle().await;
        advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(state.get(), ConnectionState::Connected);

        advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(state.get(), ConnectionState::Reconnecting);

        // Backoff restarts from the first entry after a drop.
        advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 4);

        cancel.cancel();
        task.await.expect("join");
    }
}
