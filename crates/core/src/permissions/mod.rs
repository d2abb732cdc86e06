//! Permission system for group-scoped negotiation operations

use crate::models::MemberStatus;

/// Actions a group member can take around a calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    OpenCalculation,

    // Intentions
    SetOwnIntentions,
    ViewIntentions,

    // Negotiation
    StartNegotiation,
    ViewNegotiation,
}

impl GroupAction {
    pub const ALL: [GroupAction; 5] = [
        GroupAction::OpenCalculation,
        GroupAction::SetOwnIntentions,
        GroupAction::ViewIntentions,
        GroupAction::StartNegotiation,
        GroupAction::ViewNegotiation,
    ];
}

/// Permission matrix for group membership states
///
/// Owners and members hold the same rights over a calculation; the owner
/// role only records who created the group. Mutating a running session is
/// gated on being one of its seeded participants, not on membership.
pub struct PermissionMatrix;

impl PermissionMatrix {
    /// Check if a member in this state may perform an action
    pub fn can_perform(status: MemberStatus, action: GroupAction) -> bool {
        match action {
            GroupAction::OpenCalculation
            | GroupAction::SetOwnIntentions
            | GroupAction::ViewIntentions
            | GroupAction::StartNegotiation
            | GroupAction::ViewNegotiation => status == MemberStatus::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_member_permissions() {
        for action in GroupAction::ALL {
            assert!(PermissionMatrix::can_perform(MemberStatus::Active, action));
        }
    }

    #[test]
    fn test_inactive_members_denied() {
        for status in [MemberStatus::Pending, MemberStatus::Left] {
            for action in GroupAction::ALL {
                assert!(!PermissionMatrix::can_perform(status, action));
            }
        }
    }
}
