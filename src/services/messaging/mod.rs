pub mod twilio;

use async_trait::async_trait;

/// Outbound text notifications to providers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, to: &str, body: &str) -> anyhow::Result<()>;
}

/// Used when no SMS credentials are configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, to: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(to = %to, body = %body, "notification (sms disabled)");
        Ok(())
    }
}
