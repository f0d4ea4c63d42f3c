//! User-facing notifications.
//!
//! Every operation reports progress and outcome through a [`Notifier`]
//! instead of returning strings up the stack. Subscribers (the CLI, a
//! UI bridge, tests) receive [`Notice`] values in emission order; each
//! notice is also written to the log so headless runs keep a record.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::errors::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeKind {
    Info,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub detail: String,
}

/// Broadcast fan-out for notices. Cheap to clone; all clones share the
/// same channel.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    #[allow(dead_code)]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn info(&self, title: impl Into<String>, detail: impl Into<String>) {
        self.emit(NoticeKind::Info, title.into(), detail.into());
    }

    pub fn error(&self, title: impl Into<String>, detail: impl Into<String>) {
        self.emit(NoticeKind::Error, title.into(), detail.into());
    }

    /// Report a failed operation. Contract-availability errors override
    /// the operation title so the user sees the actual obstacle.
    pub fn failure(&self, title: &str, err: &GatewayError) {
        match err {
            GatewayError::ContractNotInitialized(_) => {
                self.error("Contract Not Available", err.to_string());
            }
            _ => self.error(title, err.to_string()),
        }
    }

    fn emit(&self, kind: NoticeKind, title: String, detail: String) {
        match kind {
            NoticeKind::Info => info!(%title, "{detail}"),
            NoticeKind::Error => error!(%title, "{detail}"),
        }
        // Delivery is best-effort; a missing subscriber is not an error.
        let _ = self.tx.send(Notice { kind, title, detail });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ContractName;

    fn drain(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    #[tokio::test]
    async fn test_notices_arrive_in_order() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();

        notifier.info("Approval Submitted", "waiting for confirmation");
        notifier.info("Donation Submitted", "waiting for confirmation");
        notifier.error("Donation Failed", "rejected");

        let notices = drain(&mut rx);
        assert_eq!(notices.len(), 3);
        assert_eq!(notices[0].title, "Approval Submitted");
        assert_eq!(notices[1].title, "Donation Submitted");
        assert_eq!(notices[2].kind, NoticeKind::Error);
    }

    #[tokio::test]
    async fn test_failure_rewrites_missing_contract_title() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();

        notifier.failure(
            "Donation Failed",
            &GatewayError::ContractNotInitialized(ContractName::ZakatPool),
        );
        notifier.failure(
            "Donation Failed",
            &GatewayError::UserRejected("user denied".to_string()),
        );

        let notices = drain(&mut rx);
        assert_eq!(notices[0].title, "Contract Not Available");
        assert_eq!(notices[1].title, "Donation Failed");
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_ok() {
        let notifier = Notifier::default();
        notifier.info("Wallet Connected", "no one listening");
    }
}
