//! Business predicates for negotiation
//!
//! Kept out of the state machine's control flow so each rule can be
//! exercised on its own.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ParticipantStatus, SessionParticipant};

/// Share every session converges to unless configured otherwise
pub const DEFAULT_TARGET_PERCENTAGE: f64 = 100.0;

/// Allowed drift between the participant sum and the target
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// Upper bound for any single percentage value
pub const MAX_PERCENTAGE: f64 = 100.0;

/// Two values closer than this are the same percentage
const SAME_VALUE_EPSILON: f64 = 1e-9;

/// Lock rule parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationPolicy {
    pub target_percentage: f64,
    pub tolerance: f64,
}

impl Default for NegotiationPolicy {
    fn default() -> Self {
        Self {
            target_percentage: DEFAULT_TARGET_PERCENTAGE,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl NegotiationPolicy {
    /// Reject nonsensical configurations before they reach a session
    pub fn validate(&self) -> Result<()> {
        if !self.target_percentage.is_finite() || self.target_percentage <= 0.0 {
            return Err(Error::Validation(format!(
                "target percentage must be positive, got {}",
                self.target_percentage
            )));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(Error::Validation(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    /// Sum is within tolerance of the target
    pub fn sums_to_target(&self, total: f64) -> bool {
        (total - self.target_percentage).abs() <= self.tolerance
    }

    /// The whole participant set is confirmed and sums to the target
    pub fn lock_condition_met(&self, participants: &[SessionParticipant]) -> bool {
        all_confirmed(participants) && self.sums_to_target(total_percentage(participants))
    }
}

/// Percentage lies in (0, 100]
pub fn validate_percentage(value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > MAX_PERCENTAGE {
        return Err(Error::Validation(format!(
            "percentage must be in (0, {MAX_PERCENTAGE}], got {value}"
        )));
    }
    Ok(())
}

/// Desired and max shares are both valid and desired does not exceed max
pub fn validate_intention(desired: f64, max: f64) -> Result<()> {
    validate_percentage(desired)?;
    validate_percentage(max)?;
    if desired > max {
        return Err(Error::Validation(format!(
            "desired percentage {desired} exceeds max percentage {max}"
        )));
    }
    Ok(())
}

pub fn percentage_changed(old: f64, new: f64) -> bool {
    (old - new).abs() > SAME_VALUE_EPSILON
}

/// A confirmation covers one specific number; moving the number withdraws it
pub fn revokes_confirmation(prior: ParticipantStatus, old: f64, new: f64) -> bool {
    prior == ParticipantStatus::Confirmed && percentage_changed(old, new)
}

pub fn total_percentage(participants: &[SessionParticipant]) -> f64 {
    participants.iter().map(|p| p.current_percentage).sum()
}

/// Every participant is confirmed. An empty set never counts.
pub fn all_confirmed(participants: &[SessionParticipant]) -> bool {
    !participants.is_empty()
        && participants
            .iter()
            .all(|p| p.status == ParticipantStatus::Confirmed)
}
