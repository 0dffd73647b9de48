//! Webhook lifecycle manager: keeps upstream registrations pointed at the
//! current public URL.
//!
//! Reconciliation is delete-then-recreate: stored registrations are
//! removed upstream (404s ignored), the required event set is registered
//! against the new target, and the resulting ids replace the stored state.
//! Failures degrade to logged manual-setup instructions; polling alone
//! keeps the mirror converged, so webhook liveness is never a hard
//! prerequisite.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use inflow_connectors::{MissiveClient, TeamworkClient};
use inflow_core::{RegistrationRepository, Result, Source, WebhookRegistration};

/// Teamwork event types the connector subscribes to.
pub const TEAMWORK_EVENTS: &[&str] = &[
    "task.created",
    "task.updated",
    "task.completed",
    "task.deleted",
];

/// Missive hook types the connector subscribes to.
pub const MISSIVE_EVENTS: &[&str] = &["incoming_email", "new_comment"];

/// Reconciles upstream webhook registrations for all push-capable sources.
pub struct WebhookLifecycle {
    teamwork: Arc<TeamworkClient>,
    missive: Arc<MissiveClient>,
    registrations: Arc<dyn RegistrationRepository>,
}

impl WebhookLifecycle {
    pub fn new(
        teamwork: Arc<TeamworkClient>,
        missive: Arc<MissiveClient>,
        registrations: Arc<dyn RegistrationRepository>,
    ) -> Self {
        Self {
            teamwork,
            missive,
            registrations,
        }
    }

    /// Reconcile every source against `public_url`. Per-source failures are
    /// logged with manual instructions and do not abort the others.
    pub async fn reconcile(&self, public_url: &str) -> Result<()> {
        let public_url = public_url.trim_end_matches('/');

        if let Err(e) = self.reconcile_teamwork(public_url).await {
            error!(
                subsystem = "lifecycle",
                source = "teamwork",
                error = %e,
                "Webhook reconciliation failed"
            );
            self.log_manual_instructions(
                Source::Teamwork,
                &format!("{public_url}/webhook/teamwork"),
                TEAMWORK_EVENTS,
            );
        }

        if let Err(e) = self.reconcile_missive(public_url).await {
            error!(
                subsystem = "lifecycle",
                source = "missive",
                error = %e,
                "Webhook reconciliation failed"
            );
            self.log_manual_instructions(
                Source::Missive,
                &format!("{public_url}/webhook/missive"),
                MISSIVE_EVENTS,
            );
        }

        Ok(())
    }

    async fn reconcile_teamwork(&self, public_url: &str) -> Result<()> {
        let target_url = format!("{public_url}/webhook/teamwork");

        let stale = self.registrations.list_for_source(Source::Teamwork).await?;
        for registration in &stale {
            self.teamwork
                .delete_webhook(&registration.registration_id)
                .await?;
        }

        let mut fresh = Vec::with_capacity(TEAMWORK_EVENTS.len());
        for event in TEAMWORK_EVENTS {
            let registration_id = self.teamwork.create_webhook(&target_url, event).await?;
            fresh.push(WebhookRegistration {
                source: Source::Teamwork,
                registration_id,
                target_url: target_url.clone(),
                event: event.to_string(),
                created_at: Utc::now(),
            });
        }

        self.registrations
            .replace_for_source(Source::Teamwork, fresh)
            .await?;

        info!(
            subsystem = "lifecycle",
            source = "teamwork",
            target_url = %target_url,
            removed = stale.len(),
            created = TEAMWORK_EVENTS.len(),
            "Webhook registrations reconciled"
        );
        Ok(())
    }

    async fn reconcile_missive(&self, public_url: &str) -> Result<()> {
        let target_url = format!("{public_url}/webhook/missive");

        let stale = self.registrations.list_for_source(Source::Missive).await?;
        for registration in &stale {
            self.missive
                .delete_hook(&registration.registration_id)
                .await?;
        }

        let mut fresh = Vec::with_capacity(MISSIVE_EVENTS.len());
        for event in MISSIVE_EVENTS {
            let registration_id = self.missive.create_hook(&target_url, event).await?;
            fresh.push(WebhookRegistration {
                source: Source::Missive,
                registration_id,
                target_url: target_url.clone(),
                event: event.to_string(),
                created_at: Utc::now(),
            });
        }

        self.registrations
            .replace_for_source(Source::Missive, fresh)
            .await?;

        info!(
            subsystem = "lifecycle",
            source = "missive",
            target_url = %target_url,
            removed = stale.len(),
            created = MISSIVE_EVENTS.len(),
            "Webhook registrations reconciled"
        );
        Ok(())
    }

    fn log_manual_instructions(&self, source: Source, target_url: &str, events: &[&str]) {
        warn!(
            subsystem = "lifecycle",
            source = %source,
            target_url,
            events = %events.join(", "),
            "Automatic webhook setup failed; register this URL and event list \
             manually in the service's webhook settings. Polling continues to \
             keep data converged in the meantime."
        );
    }
}
