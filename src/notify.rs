//! Security notifications (new device, failed login, reset requested).
//!
//! Delivery is fire-and-forget: [`dispatch`] returns immediately and a
//! failing [`Notifier`] is only logged, so the request that triggered the
//! notification never waits on it or sees its errors.

use std::net::IpAddr;
use std::sync::Arc;

use axum::async_trait;
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    NewDeviceLogin,
    FailedLoginAttempt,
    PasswordResetRequested,
}

impl NotificationKind {
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationKind::NewDeviceLogin => "New Device Login",
            NotificationKind::FailedLoginAttempt => "Failed Login Attempt",
            NotificationKind::PasswordResetRequested => "Password Reset Requested",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub name: String,
    pub device: String,
    pub ip: Option<IpAddr>,
    pub location: Option<String>,
    pub at: OffsetDateTime,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log; stands in for a mail transport.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, n: Notification) -> anyhow::Result<()> {
        info!(
            subject = n.kind.subject(),
            recipient = %n.recipient,
            device = %n.device,
            ip = ?n.ip,
            location = n.location.as_deref().unwrap_or("unavailable"),
            "notification"
        );
        Ok(())
    }
}

pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) {
    tokio::spawn(async move {
        let kind = notification.kind;
        if let Err(e) = notifier.send(notification).await {
            warn!(error = %e, subject = kind.subject(), "notification delivery failed");
        }
    });
}
