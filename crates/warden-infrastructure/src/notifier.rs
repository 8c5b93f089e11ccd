//! Tracing-backed notifier.

use async_trait::async_trait;
use tracing::{error, info, warn};
use warden_domain::ports::{Notifier, NotifierEvent};

/// [`Notifier`] that writes events to the log stream. Best-effort by
/// construction; it never fails and never blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    /// Create a notifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn emit(&self, event: NotifierEvent) {
        match event {
            NotifierEvent::QuotaThreshold {
                rule_id,
                list_id,
                threshold,
                used_seconds,
                limit_seconds,
                ..
            } => {
                let percent = (threshold * 100.0).round() as u32;
                warn!(
                    rule_id,
                    list_id, used_seconds, limit_seconds, "quota usage crossed {percent}%"
                );
            }
            NotifierEvent::SubjectBlocked { subject, list_id } => {
                info!(%subject, ?list_id, "subject blocked");
            }
            NotifierEvent::ServiceFatal { message } => {
                error!("service fault: {message}");
            }
        }
    }
}
