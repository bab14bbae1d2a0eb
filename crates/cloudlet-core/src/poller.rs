//! Tunnel-address polling scheduler
//!
//! After a create request succeeds the registry needs time to provision
//! the session, so a poller re-issues the status GET on a fixed delay
//! until an address arrives. One poller exists per (user_id, app_id)
//! pair; it cancels itself on the first usable response and is bounded
//! by an attempt budget so an abandoned session never leaves a polling
//! task behind.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::PollingConfig;
use crate::registry::CloudletRegistry;

/// Registry response meaning "no address assigned yet"
const NOT_READY: &str = "None";

/// Terminal outcome of one polling run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The registry assigned a tunnel address
    TunnelAssigned {
        user_id: String,
        app_id: String,
        ip: String,
    },
    /// The attempt budget ran out before an address arrived
    TimedOut { user_id: String, app_id: String },
}

/// Handle for a running poller
///
/// Dropping the handle aborts the polling task.
pub struct PollerHandle {
    abort_handle: tokio::task::AbortHandle,
}

impl PollerHandle {
    /// Stop polling
    pub fn cancel(self) {
        self.abort_handle.abort();
    }

    /// Whether the polling task is still running
    pub fn is_running(&self) -> bool {
        !self.abort_handle.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.abort_handle.abort();
    }
}

/// Fixed-delay status poller
pub struct TunnelPoller;

impl TunnelPoller {
    /// Spawn a polling task for one (user_id, app_id) pair
    ///
    /// The task sleeps for the configured first delay, then polls at the
    /// configured interval. Individual GET failures are retried at the next
    /// tick. The terminal outcome is delivered once on `outcome_tx` and the
    /// task exits.
    pub fn spawn(
        registry: Arc<dyn CloudletRegistry>,
        user_id: String,
        app_id: String,
        config: PollingConfig,
        outcome_tx: mpsc::UnboundedSender<PollOutcome>,
    ) -> PollerHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(config.first_delay_ms)).await;

            for attempt in 1..=config.max_attempts {
                if attempt > 1 {
                    tokio::time::sleep(Duration::from_millis(config.interval_ms)).await;
                }

                match registry.poll_status(&user_id, &app_id).await {
                    Ok(body) if body != NOT_READY && !body.is_empty() => {
                        tracing::info!(
                            user_id = %user_id,
                            app_id = %app_id,
                            "Tunnel address assigned: {body}"
                        );
                        let _ = outcome_tx.send(PollOutcome::TunnelAssigned {
                            user_id,
                            app_id,
                            ip: body,
                        });
                        return;
                    }
                    Ok(_) => {
                        tracing::trace!(
                            user_id = %user_id,
                            app_id = %app_id,
                            attempt,
                            "Tunnel address not assigned yet"
                        );
                    }
                    Err(e) => {
                        tracing::debug!(
                            user_id = %user_id,
                            app_id = %app_id,
                            attempt,
                            "Status poll failed, retrying: {e}"
                        );
                    }
                }
            }

            tracing::warn!(
                user_id = %user_id,
                app_id = %app_id,
                "Gave up polling after {} attempts",
                config.max_attempts
            );
            let _ = outcome_tx.send(PollOutcome::TimedOut { user_id, app_id });
        });

        PollerHandle {
            abort_handle: task.abort_handle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RegistryError, SessionAction};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Registry whose poll responses are scripted in order; the last entry
    /// repeats once the script is exhausted.
    struct ScriptedRegistry {
        responses: Mutex<VecDeque<Result<String, RegistryError>>>,
    }

    impl ScriptedRegistry {
        fn new(responses: Vec<Result<String, RegistryError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl CloudletRegistry for ScriptedRegistry {
        async fn request(
            &self,
            _action: SessionAction,
            _app_id: &str,
            _user_id: &str,
        ) -> Result<String, RegistryError> {
            Ok(String::new())
        }

        async fn poll_status(
            &self,
            _user_id: &str,
            _app_id: &str,
        ) -> Result<String, RegistryError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                match responses.front() {
                    Some(Ok(body)) => Ok(body.clone()),
                    Some(Err(_)) => Err(RegistryError::Status(500)),
                    None => Ok(NOT_READY.to_string()),
                }
            }
        }
    }

    fn fast_config(max_attempts: u32) -> PollingConfig {
        PollingConfig {
            first_delay_ms: 5,
            interval_ms: 5,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_not_ready_then_assigned() {
        let registry = ScriptedRegistry::new(vec![
            Ok(NOT_READY.to_string()),
            Ok(NOT_READY.to_string()),
            Ok("203.0.113.7".to_string()),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _handle = TunnelPoller::spawn(
            registry,
            "u1".to_string(),
            "appA".to_string(),
            fast_config(20),
            tx,
        );

        let outcome = rx.recv().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::TunnelAssigned {
                user_id: "u1".to_string(),
                app_id: "appA".to_string(),
                ip: "203.0.113.7".to_string(),
            }
        );

        // Exactly one outcome: the poller cancelled itself
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_poll_errors_are_retried() {
        let registry = ScriptedRegistry::new(vec![
            Err(RegistryError::Status(502)),
            Err(RegistryError::Status(502)),
            Ok("10.8.0.2".to_string()),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _handle = TunnelPoller::spawn(
            registry,
            "u1".to_string(),
            "appA".to_string(),
            fast_config(20),
            tx,
        );

        match rx.recv().await.unwrap() {
            PollOutcome::TunnelAssigned { ip, .. } => assert_eq!(ip, "10.8.0.2"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_attempt_budget_exhausted() {
        let registry = ScriptedRegistry::new(vec![Ok(NOT_READY.to_string())]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _handle = TunnelPoller::spawn(
            registry,
            "u1".to_string(),
            "appA".to_string(),
            fast_config(3),
            tx,
        );

        let outcome = rx.recv().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                user_id: "u1".to_string(),
                app_id: "appA".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_empty_body_is_not_usable() {
        let registry = ScriptedRegistry::new(vec![
            Ok(String::new()),
            Ok("198.51.100.3".to_string()),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _handle = TunnelPoller::spawn(
            registry,
            "u1".to_string(),
            "appA".to_string(),
            fast_config(20),
            tx,
        );

        match rx.recv().await.unwrap() {
            PollOutcome::TunnelAssigned { ip, .. } => assert_eq!(ip, "198.51.100.3"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_polling() {
        let registry = ScriptedRegistry::new(vec![Ok("203.0.113.9".to_string())]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = TunnelPoller::spawn(
            registry,
            "u1".to_string(),
            "appA".to_string(),
            PollingConfig {
                first_delay_ms: 200,
                interval_ms: 200,
                max_attempts: 5,
            },
            tx,
        );

        handle.cancel();

        // The first poll never fires; the channel closes with no outcome
        assert!(rx.recv().await.is_none());
    }
}
