//! External collaborator: outbound email. `Mailer` is fire-and-forget with
//! retries and must never block the caller (§6: "never blocks the login
//! path"); [`dispatch`] is what gives callers that guarantee.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: usize = 5;

#[derive(Clone, Debug)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub title: Option<String>,
    pub button: Option<String>,
    pub subtext: Option<String>,
}

impl MailMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
            title: None,
            button: None,
            subtext: None,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_now(&self, message: &MailMessage) -> Result<(), String>;
}

/// Send `message` off the caller's critical path, retrying with exponential
/// backoff (capped at 30s, 5 attempts) and a 30s per-attempt timeout. Errors
/// are logged, never returned — a mail outage must never fail a login or
/// account-flow request.
pub fn dispatch(mailer: Arc<dyn Mailer>, message: MailMessage) {
    tokio::spawn(async move {
        let mut backoffs = fuzzly_std::backoff::get_backoff_iter();
        for attempt in 0..=MAX_RETRIES {
            match tokio::time::timeout(SEND_TIMEOUT, mailer.send_now(&message)).await {
                Ok(Ok(())) => {
                    info!(to = %message.to, attempt, "mail sent");
                    return;
                }
                Ok(Err(error)) => warn!(to = %message.to, attempt, error, "mail send failed"),
                Err(_) => warn!(to = %message.to, attempt, "mail send timed out"),
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(backoffs.next().expect("infinite iterator")).await;
            }
        }
        warn!(to = %message.to, "mail send exhausted all retries");
    });
}

/// Logs instead of sending (§6: `ENVIRONMENT` governs "email behavior (local
/// logs instead of sending)").
pub struct LoggingMailer;

#[async_trait]
impl Mailer for LoggingMailer {
    async fn send_now(&self, message: &MailMessage) -> Result<(), String> {
        info!(
            to = %message.to,
            subject = %message.subject,
            text = %message.text,
            "mail (local, not sent)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    struct CountingMailer {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Mailer for CountingMailer {
        async fn send_now(&self, _message: &MailMessage) -> Result<(), String> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_sends_without_blocking_caller() {
        let sent = Arc::new(AtomicUsize::new(0));
        let mailer = Arc::new(CountingMailer { sent: sent.clone() });
        dispatch(mailer, MailMessage::new("alice@example.com", "hi", "body"));
        // dispatch returns immediately; give the spawned task a tick to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logging_mailer_always_succeeds() {
        let mailer = LoggingMailer;
        assert!(mailer.send_now(&MailMessage::new("a@b.com", "s", "t")).await.is_ok());
    }
}
