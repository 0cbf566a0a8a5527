//! Turns an Alertmanager delivery into CachetHQ incidents.

use crate::alertmanager::AlertManagerWebhook;
use crate::cachet::{CachetError, IncidentClient};
use crate::resolver::ComponentResolver;
use crate::types::{AlertOutcome, ComponentId, IncidentMode, IncidentStatus};
use metrics::counter;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_LABEL_NAME: &str = "alertname";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot resolve CachetHQ components: {0}")]
    Resolution(#[source] CachetError),
    #[error("cannot write incident for {component}: {source}")]
    UpstreamWrite {
        component: String,
        source: CachetError,
    },
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Resolution(_) => "resolution",
            SyncError::UpstreamWrite { .. } => "upstream_write",
        }
    }
}

/// What one delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: AlertOutcome,
    pub created: usize,
    pub updated: usize,
    pub skipped_unknown: usize,
    pub skipped_duplicate: usize,
}

impl SyncReport {
    fn new(outcome: AlertOutcome) -> Self {
        Self {
            outcome,
            created: 0,
            updated: 0,
            skipped_unknown: 0,
            skipped_duplicate: 0,
        }
    }
}

enum Written {
    Created,
    Updated,
}

pub struct IncidentSynchronizer {
    client: Arc<dyn IncidentClient>,
    label_name: String,
    mode: IncidentMode,
}

impl IncidentSynchronizer {
    pub fn new(client: Arc<dyn IncidentClient>, label_name: String, mode: IncidentMode) -> Self {
        Self {
            client,
            label_name,
            mode,
        }
    }

    /// Processes the alerts of one delivery in order.
    ///
    /// Alerts whose label does not name a known component are skipped, and
    /// each component gets at most one incident write per delivery. The
    /// first failing call aborts the rest of the batch.
    pub async fn process(&self, webhook: &AlertManagerWebhook) -> Result<SyncReport, SyncError> {
        let outcome = webhook.outcome();
        let mut report = SyncReport::new(outcome);

        let components = ComponentResolver::new(self.client.as_ref())
            .component_map()
            .await
            .map_err(SyncError::Resolution)?;

        let mut fired: HashSet<ComponentId> = HashSet::new();
        for alert in &webhook.alerts {
            let Some(name) = alert.labels.get(&self.label_name) else {
                debug!("alert without {} label, skipping", self.label_name);
                report.skipped_unknown += 1;
                counter!("cachet_bridge_alerts_total", "result" => "unknown_component").increment(1);
                continue;
            };
            let Some(&component_id) = components.get(name) else {
                debug!("no CachetHQ component named {:?}, skipping", name);
                report.skipped_unknown += 1;
                counter!("cachet_bridge_alerts_total", "result" => "unknown_component").increment(1);
                continue;
            };
            if !fired.insert(component_id) {
                debug!("component {} already handled in this delivery", name);
                report.skipped_duplicate += 1;
                counter!("cachet_bridge_alerts_total", "result" => "duplicate").increment(1);
                continue;
            }

            let written = self
                .write(name, component_id, outcome)
                .await
                .map_err(|source| SyncError::UpstreamWrite {
                    component: name.clone(),
                    source,
                })?;
            counter!("cachet_bridge_alerts_total", "result" => "written").increment(1);
            match written {
                Written::Created => {
                    info!("created {} incident for {} ({})", outcome, name, component_id);
                    report.created += 1;
                    counter!("cachet_bridge_incidents_total", "action" => "created").increment(1);
                }
                Written::Updated => {
                    info!("updated {} incident for {} ({})", outcome, name, component_id);
                    report.updated += 1;
                    counter!("cachet_bridge_incidents_total", "action" => "updated").increment(1);
                }
            }
        }

        Ok(report)
    }

    async fn write(
        &self,
        name: &str,
        component_id: ComponentId,
        outcome: AlertOutcome,
    ) -> Result<Written, CachetError> {
        if self.mode == IncidentMode::Update {
            let incidents = self.client.search_incidents(component_id).await?;
            if let Some(open) = incidents
                .first()
                .filter(|newest| newest.status != IncidentStatus::Fixed)
            {
                self.client
                    .update_incident(name, component_id, open.id, outcome)
                    .await?;
                return Ok(Written::Updated);
            }
        }

        self.client
            .create_incident(name, component_id, outcome, outcome.component_status())
            .await?;
        Ok(Written::Created)
    }
}
