//! Cohome Core Library
//!
//! Core models, permissions, negotiation rules, the intention coordinator,
//! and storage for Cohome share negotiations.

pub mod coordinator;
pub mod error;
pub mod invariants;
pub mod models;
pub mod negotiation;
pub mod permissions;
pub mod storage;

pub use coordinator::{
    intentions_complete, merge_intentions, CompletionStatus, Coordinator, UpdateOutcome,
};
pub use error::{Error, Result};
pub use models::*;
pub use negotiation::{Applied, Negotiation, NegotiationPolicy, ParticipantView, SessionSnapshot};
pub use permissions::*;
pub use storage::{Database, Storage};
