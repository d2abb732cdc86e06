//! Data models for Cohome

mod calculation;
mod group;
mod intention;
mod negotiation;
mod user;

pub use calculation::*;
pub use group::*;
pub use intention::*;
pub use negotiation::*;
pub use user::*;
