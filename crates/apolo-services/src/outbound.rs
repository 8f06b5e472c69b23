//! Outbound notifications
//!
//! Actions such as `*http_post` only record a [`Notification`] while the
//! account lock is held. Once the mutation is committed and the lock is
//! released the caller hands the batch to an [`OutboundNotifier`], which
//! delivers it on a detached task.

use apolo_core::{config::ActionsConfig, AppError, AppResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// One pending HTTP notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub url: String,
    pub account: String,
    pub actions_id: String,
    pub body: serde_json::Value,
}

/// Delivers committed notifications
#[async_trait]
pub trait OutboundNotifier: Send + Sync {
    /// Must return promptly; delivery happens off the caller's path
    async fn dispatch(&self, notifications: Vec<Notification>);
}

/// reqwest-backed notifier posting JSON bodies
pub struct HttpPoster {
    http_client: Client,
    attempts: u32,
}

impl HttpPoster {
    pub fn new(config: &ActionsConfig) -> AppResult<Self> {
        let http_client = ClientBuilder::new()
            .timeout(Duration::from_millis(config.http_post_timeout_ms))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AppError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            http_client,
            attempts: config.http_post_attempts.max(1),
        })
    }

    #[instrument(skip(client, notification), fields(url = %notification.url, account = %notification.account))]
    async fn deliver(client: Client, attempts: u32, notification: Notification) {
        for attempt in 1..=attempts {
            match client
                .post(&notification.url)
                .json(&notification.body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Notification delivered on attempt {}", attempt);
                    return;
                }
                Ok(resp) => {
                    warn!(
                        "Notification attempt {}/{} got HTTP {}",
                        attempt,
                        attempts,
                        resp.status()
                    );
                }
                Err(e) => {
                    let kind = if e.is_timeout() { "timeout" } else { "connection" };
                    warn!(
                        "Notification attempt {}/{} failed ({}): {}",
                        attempt, attempts, kind, e
                    );
                }
            }
        }
        warn!("Notification to {} dropped after {} attempts", notification.url, attempts);
    }
}

#[async_trait]
impl OutboundNotifier for HttpPoster {
    async fn dispatch(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            let client = self.http_client.clone();
            tokio::spawn(Self::deliver(client, self.attempts, notification));
        }
    }
}

/// Keeps notifications in memory; used when outbound delivery is disabled and in tests
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl OutboundNotifier for RecordingNotifier {
    async fn dispatch(&self, notifications: Vec<Notification>) {
        for n in &notifications {
            debug!("Recorded notification to {} for {}", n.url, n.account);
        }
        self.sent.lock().extend(notifications);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_poster_creation() {
        let poster = HttpPoster::new(&ActionsConfig::default());
        assert!(poster.is_ok());
        assert_eq!(poster.unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_does_not_block_dispatch() {
        let poster = HttpPoster::new(&ActionsConfig {
            http_post_timeout_ms: 50,
            http_post_attempts: 1,
        })
        .unwrap();
        let n = Notification {
            url: "http://127.0.0.1:9/unreachable".into(),
            account: "cgrates.org:1001".into(),
            actions_id: "NOTIFY".into(),
            body: json!({"account": "cgrates.org:1001"}),
        };
        let started = std::time::Instant::now();
        poster.dispatch(vec![n]).await;
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let rec = RecordingNotifier::new();
        rec.dispatch(vec![Notification {
            url: "http://localhost/hook".into(),
            account: "cgrates.org:1001".into(),
            actions_id: "NOTIFY".into(),
            body: json!({}),
        }])
        .await;
        assert_eq!(rec.sent().len(), 1);
    }
}
