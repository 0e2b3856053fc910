use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Admin = 1,
    Hr = 2,
    Employee = 3,
    System = 4,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Hr),
            3 => Some(Role::Employee),
            4 => Some(Role::System),
            _ => None,
        }
    }

    /// Roles allowed to approve adjustments, leave requests and edit balances.
    pub fn can_approve(&self) -> bool {
        matches!(self, Role::Admin | Role::Hr | Role::System)
    }
}

/// Who performed a ledger or attendance mutation.
///
/// Automated work (renewals, sweeps, recalibration) is attributed to
/// `System`; everything triggered from a request carries the acting user.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case", tag = "kind", content = "user_id")]
pub enum Actor {
    #[display(fmt = "user #{}", _0)]
    Human(u64),
    #[display(fmt = "system")]
    System,
}

impl Actor {
    /// Column value for `actor_id`; `NULL` stands for the system.
    pub fn user_id(&self) -> Option<u64> {
        match self {
            Actor::Human(id) => Some(*id),
            Actor::System => None,
        }
    }

    pub fn from_user_id(user_id: Option<u64>) -> Self {
        user_id.map(Actor::Human).unwrap_or(Actor::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_maps_to_nullable_column() {
        assert_eq!(Actor::Human(12).user_id(), Some(12));
        assert_eq!(Actor::System.user_id(), None);
        assert_eq!(Actor::from_user_id(None), Actor::System);
        assert_eq!(Actor::from_user_id(Some(3)), Actor::Human(3));
    }

    #[test]
    fn actor_display() {
        assert_eq!(Actor::Human(5).to_string(), "user #5");
        assert_eq!(Actor::System.to_string(), "system");
    }

    #[test]
    fn only_staff_roles_approve() {
        assert!(Role::Hr.can_approve());
        assert!(!Role::Employee.can_approve());
        assert_eq!(Role::from_id(9), None);
    }
}
