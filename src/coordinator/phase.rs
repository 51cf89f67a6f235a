use std::fmt;

use serde::Serialize;

/// Primary-side states for one workload. The primary only reacts to instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrimaryPhase {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for PrimaryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryPhase::Idle => write!(f, "idle"),
            PrimaryPhase::Starting => write!(f, "starting"),
            PrimaryPhase::Running => write!(f, "running"),
            PrimaryPhase::Stopping => write!(f, "stopping"),
        }
    }
}

/// Secondary-side states for one workload, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecondaryPhase {
    Idle,
    AwaitingPeerOnline,
    RequestingReset,
    AwaitingResetConfirmed,
    RequestingStart,
    AwaitingStartConfirmed,
    Running,
    FinalReset,
}

impl fmt::Display for SecondaryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecondaryPhase::Idle => write!(f, "idle"),
            SecondaryPhase::AwaitingPeerOnline => write!(f, "awaiting-peer-online"),
            SecondaryPhase::RequestingReset => write!(f, "requesting-reset"),
            SecondaryPhase::AwaitingResetConfirmed => write!(f, "awaiting-reset-confirmed"),
            SecondaryPhase::RequestingStart => write!(f, "requesting-start"),
            SecondaryPhase::AwaitingStartConfirmed => write!(f, "awaiting-start-confirmed"),
            SecondaryPhase::Running => write!(f, "running"),
            SecondaryPhase::FinalReset => write!(f, "final-reset"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", content = "phase", rename_all = "lowercase")]
pub enum Phase {
    Primary(PrimaryPhase),
    Secondary(SecondaryPhase),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Primary(phase) => write!(f, "primary/{}", phase),
            Phase::Secondary(phase) => write!(f, "secondary/{}", phase),
        }
    }
}

impl From<PrimaryPhase> for Phase {
    fn from(phase: PrimaryPhase) -> Self {
        Phase::Primary(phase)
    }
}

impl From<SecondaryPhase> for Phase {
    fn from(phase: SecondaryPhase) -> Self {
        Phase::Secondary(phase)
    }
}
