//! One-shot invalid-credential notification gate
//!
//! Many instances can fail on the same dead credential at once; the flag on
//! the integration setting is flipped with a compare-and-set so exactly one
//! of them sends the admin notification. The flag is reset by the settings
//! collaborator when the credential rotates.

use std::sync::Arc;

use leavesync_domain::{IntegrationSetting, OutboundEvent, Result};
use tracing::{debug, info, warn};

use crate::ports::{NotificationSender, SettingStore};

#[derive(Clone)]
pub struct CredentialGate {
    settings: Arc<dyn SettingStore>,
    notifier: Arc<dyn NotificationSender>,
}

impl CredentialGate {
    pub fn new(settings: Arc<dyn SettingStore>, notifier: Arc<dyn NotificationSender>) -> Self {
        Self { settings, notifier }
    }

    /// Notify the admin that the setting's credential is invalid, at most
    /// once until the flag is cleared. Delivery is fire-and-forget: a send
    /// failure is logged, not propagated.
    pub async fn notify_invalid_credential(
        &self,
        setting: &IntegrationSetting,
        request_id: &str,
    ) -> Result<()> {
        let flipped = self.settings.try_mark_credential_notified(&setting.id).await?;
        if !flipped {
            debug!(
                integration_id = %setting.id,
                "credential notification suppressed, already sent"
            );
            return Ok(());
        }

        let event = OutboundEvent::NotifyInvalidCredential {
            request_id: request_id.to_string(),
            integration_name: setting.name.clone(),
            already_notified: false,
        };
        match self.notifier.send(&event).await {
            Ok(()) => {
                info!(integration_id = %setting.id, "invalid credential notification sent");
            }
            Err(err) => {
                warn!(
                    integration_id = %setting.id,
                    error = %err,
                    "failed to deliver credential notification"
                );
            }
        }
        Ok(())
    }
}
