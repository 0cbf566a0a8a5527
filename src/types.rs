use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use strum_macros::{Display, EnumString};

pub type ComponentId = u64;
pub type IncidentId = u64;

/// Component status codes, see https://docs.cachethq.io/docs/component-statuses
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum ComponentStatus {
    Unknown = 0,
    Operational = 1,
    PerformanceIssues = 2,
    PartialOutage = 3,
    MajorOutage = 4,
}

/// Incident status codes, see https://docs.cachethq.io/docs/incident-statuses
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum IncidentStatus {
    Scheduled = 0,
    Investigating = 1,
    Identified = 2,
    Watching = 3,
    Fixed = 4,
}

/// Batch-level outcome of an Alertmanager delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AlertOutcome {
    Firing,
    Resolved,
}

impl AlertOutcome {
    /// Anything but `firing` counts as resolved.
    pub fn from_status(status: &str) -> Self {
        if status == "firing" {
            AlertOutcome::Firing
        } else {
            AlertOutcome::Resolved
        }
    }

    pub fn component_status(self) -> ComponentStatus {
        match self {
            AlertOutcome::Firing => ComponentStatus::MajorOutage,
            AlertOutcome::Resolved => ComponentStatus::Operational,
        }
    }

    pub fn incident_status(self) -> IncidentStatus {
        match self {
            AlertOutcome::Firing => IncidentStatus::Identified,
            AlertOutcome::Resolved => IncidentStatus::Fixed,
        }
    }

    pub fn incident_name(self, component: &str) -> String {
        match self {
            AlertOutcome::Firing => format!("{} down", component),
            AlertOutcome::Resolved => format!("{} up", component),
        }
    }

    pub fn incident_message(self, component: &str) -> String {
        match self {
            AlertOutcome::Firing => format!("Prometheus flagged service {} as down", component),
            AlertOutcome::Resolved => {
                format!("Prometheus flagged service {} as recovered", component)
            }
        }
    }
}

/// How the synchronizer writes an incident for a component that fired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, ValueEnum, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum IncidentMode {
    /// Always open a new incident.
    #[default]
    Create,
    /// Update the newest open incident of the component, create one otherwise.
    Update,
}

/// How non-2xx answers from CachetHQ are treated, on reads and writes alike.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, ValueEnum, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum UpstreamPolicy {
    /// Log the response and keep going with whatever body came back.
    #[default]
    Lenient,
    /// Fail the call.
    Strict,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub component_id: ComponentId,
    pub status: IncidentStatus,
    pub component_status: Option<ComponentStatus>,
    pub name: String,
    pub message: String,
    pub visible: bool,
}
