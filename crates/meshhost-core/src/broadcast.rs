//! Reliable Broadcaster
//!
//! Wraps the transport's unreliable broadcast with bounded retry. Attempt 1
//! is sent immediately and attempt n waits `(n - 1) * backoff_base` first.
//! The first success ends the call; after `max_attempts` failures the call
//! returns [`CoordinatorError::BroadcastExhausted`]. Reconnecting is the
//! caller's business.
//!
//! The future only suspends in backoff sleeps and transport sends, so
//! dropping or aborting it stops any further attempts.

use core::time::Duration;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::BroadcastConfig;
use crate::errors::{CoordinatorError, Result, TransportError};
use crate::transport::{MeshTransport, Priority};

// ----------------------------------------------------------------------------
// Broadcast Attempt
// ----------------------------------------------------------------------------

/// Retry bookkeeping for a single broadcast invocation
#[derive(Debug, Clone)]
pub struct BroadcastAttempt {
    pub payload: Vec<u8>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub last_error: Option<TransportError>,
}

impl BroadcastAttempt {
    pub fn new(payload: Vec<u8>, max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            payload,
            attempt_count: 0,
            max_attempts,
            backoff_base,
            last_error: None,
        }
    }

    /// Wait owed before the attempt most recently begun
    pub fn backoff(&self) -> Duration {
        self.backoff_base * self.attempt_count.saturating_sub(1)
    }

    /// Whether another attempt is allowed
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        !self.can_retry()
    }

    /// Record the start of the next attempt, returning its 1-based number
    fn begin(&mut self) -> u32 {
        debug_assert!(self.can_retry());
        self.attempt_count += 1;
        self.attempt_count
    }
}

// ----------------------------------------------------------------------------
// Reliable Broadcaster
// ----------------------------------------------------------------------------

/// Bounded-retry wrapper around [`MeshTransport::send_broadcast`]
pub struct ReliableBroadcaster<T: MeshTransport> {
    transport: Arc<T>,
    config: BroadcastConfig,
}

impl<T: MeshTransport> Clone for ReliableBroadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
        }
    }
}

impl<T: MeshTransport> ReliableBroadcaster<T> {
    pub fn new(transport: Arc<T>, config: BroadcastConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Broadcast `payload`, retrying with linear backoff
    ///
    /// Returns the number of attempts used on success.
    pub async fn broadcast(&self, payload: Vec<u8>, priority: Priority) -> Result<u32> {
        let mut attempt = BroadcastAttempt::new(
            payload,
            self.config.max_attempts,
            self.config.backoff_base,
        );

        while attempt.can_retry() {
            let number = attempt.begin();
            let backoff = attempt.backoff();
            if !backoff.is_zero() {
                debug!(attempt = number, ?backoff, "Backing off before broadcast retry");
                tokio::time::sleep(backoff).await;
            }

            match self
                .transport
                .send_broadcast(attempt.payload.clone(), priority)
                .await
            {
                Ok(()) => {
                    if number > 1 {
                        debug!(attempts = number, "Broadcast succeeded after retry");
                    }
                    return Ok(number);
                }
                Err(error) => {
                    warn!(
                        attempt = number,
                        max_attempts = attempt.max_attempts,
                        %error,
                        "Broadcast attempt failed"
                    );
                    attempt.last_error = Some(error);
                }
            }
        }

        Err(CoordinatorError::BroadcastExhausted {
            attempts: attempt.attempt_count,
            last_error: attempt.last_error.unwrap_or(TransportError::SendFailed {
                reason: "no attempt was made".into(),
            }),
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tokio::time::Instant;

    use crate::types::PeerId;

    /// Transport failing a scripted number of times, recording send instants
    struct ScriptedTransport {
        failures_left: Mutex<u32>,
        sends: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn failing(times: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_left: Mutex::new(times),
                sends: Mutex::new(Vec::new()),
            })
        }

        fn send_instants(&self) -> Vec<Instant> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MeshTransport for ScriptedTransport {
        fn connected_peers(&self) -> BTreeSet<PeerId> {
            BTreeSet::new()
        }

        async fn send_broadcast(
            &self,
            _bytes: Vec<u8>,
            _priority: Priority,
        ) -> core::result::Result<(), TransportError> {
            self.sends.lock().unwrap().push(Instant::now());
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                Err(TransportError::SendFailed {
                    reason: "scripted".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let transport = ScriptedTransport::failing(2);
        let broadcaster = ReliableBroadcaster::new(transport.clone(), BroadcastConfig::default());

        let attempts = broadcaster
            .broadcast(b"announce".to_vec(), Priority::High)
            .await
            .unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(transport.send_instants().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_stops_retrying() {
        let transport = ScriptedTransport::failing(0);
        let broadcaster = ReliableBroadcaster::new(transport.clone(), BroadcastConfig::default());

        assert_eq!(broadcaster.broadcast(vec![1], Priority::Normal).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.send_instants().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_max_attempts() {
        let transport = ScriptedTransport::failing(u32::MAX);
        let broadcaster = ReliableBroadcaster::new(transport.clone(), BroadcastConfig::default());

        let result = broadcaster.broadcast(vec![1], Priority::Normal).await;
        match result {
            Err(CoordinatorError::BroadcastExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(last_error, TransportError::SendFailed { .. }));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }

        // No fourth attempt, ever
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.send_instants().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_linear_in_attempt_number() {
        let transport = ScriptedTransport::failing(u32::MAX);
        let broadcaster = ReliableBroadcaster::new(transport.clone(), BroadcastConfig::default());
        let start = Instant::now();

        let _ = broadcaster.broadcast(vec![1], Priority::Normal).await;

        let offsets: Vec<Duration> = transport
            .send_instants()
            .iter()
            .map(|at| at.duration_since(start))
            .collect();
        // Attempt 1 immediate, attempt 2 after 1s, attempt 3 after a further 2s
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborting_stops_pending_retries() {
        let transport = ScriptedTransport::failing(u32::MAX);
        let broadcaster = ReliableBroadcaster::new(transport.clone(), BroadcastConfig::default());

        let task = tokio::spawn(async move { broadcaster.broadcast(vec![1], Priority::Normal).await });
        tokio::time::sleep(Duration::from_millis(500)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.send_instants().len(), 1);
    }

    #[test]
    fn test_attempt_bookkeeping() {
        let mut attempt = BroadcastAttempt::new(vec![], 2, Duration::from_millis(250));
        assert!(attempt.can_retry());
        assert_eq!(attempt.begin(), 1);
        assert_eq!(attempt.backoff(), Duration::ZERO);
        assert_eq!(attempt.begin(), 2);
        assert_eq!(attempt.backoff(), Duration::from_millis(250));
        assert!(attempt.is_exhausted());
        assert!(attempt.attempt_count <= attempt.max_attempts);
    }
}
