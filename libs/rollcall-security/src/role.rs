use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of roles a caller can hold.
///
/// Roles are assigned upstream and arrive already resolved with every
/// request. Parsing an unrecognized role string fails with [`UnknownRole`],
/// so the access model itself only ever sees valid roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SystemAdmin,
    Admin,
    Provider,
    InstructorCertified,
    InstructorProvisional,
    InstructorTrainee,
    InstructorNew,
}

/// Predicate family a role's data visibility is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleCategory {
    /// No row restriction.
    Administrative,
    /// Rows the caller teaches, created or issued, optionally within a location.
    OwnershipScoped,
    /// Rows where the caller is the student or the addressed user.
    ConsumerScoped,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::SystemAdmin,
        Role::Admin,
        Role::Provider,
        Role::InstructorCertified,
        Role::InstructorProvisional,
        Role::InstructorTrainee,
        Role::InstructorNew,
    ];

    /// Hierarchy rank; higher means broader default access.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::SystemAdmin => 100,
            Self::Admin => 90,
            Self::Provider => 70,
            Self::InstructorCertified => 50,
            Self::InstructorProvisional => 40,
            Self::InstructorTrainee => 30,
            Self::InstructorNew => 20,
        }
    }

    #[must_use]
    pub fn category(self) -> RoleCategory {
        match self {
            Self::SystemAdmin | Self::Admin => RoleCategory::Administrative,
            Self::Provider | Self::InstructorCertified | Self::InstructorProvisional => {
                RoleCategory::OwnershipScoped
            }
            Self::InstructorTrainee | Self::InstructorNew => RoleCategory::ConsumerScoped,
        }
    }

    /// The single top-rank role that receives blanket access.
    #[must_use]
    pub fn top_rank() -> Self {
        Self::SystemAdmin
    }

    #[must_use]
    pub fn is_top_rank(self) -> bool {
        self == Self::top_rank()
    }

    #[must_use]
    pub fn is_administrative(self) -> bool {
        self.category() == RoleCategory::Administrative
    }

    #[must_use]
    pub fn outranks(self, other: Role) -> bool {
        self.rank() > other.rank()
    }

    #[must_use]
    pub fn at_least(self, other: Role) -> bool {
        self.rank() >= other.rank()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemAdmin => "system_admin",
            Self::Admin => "admin",
            Self::Provider => "provider",
            Self::InstructorCertified => "instructor_certified",
            Self::InstructorProvisional => "instructor_provisional",
            Self::InstructorTrainee => "instructor_trainee",
            Self::InstructorNew => "instructor_new",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role string does not name a known role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_owned()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn ranks_are_strictly_ordered() {
        let ranks: Vec<u8> = Role::ALL.iter().map(|r| r.rank()).collect();
        assert!(ranks.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn only_system_admin_is_top_rank() {
        let tops: Vec<Role> = Role::ALL.into_iter().filter(|r| r.is_top_rank()).collect();
        assert_eq!(tops, vec![Role::SystemAdmin]);
    }

    #[test]
    fn categories() {
        assert_eq!(Role::Admin.category(), RoleCategory::Administrative);
        assert_eq!(Role::Provider.category(), RoleCategory::OwnershipScoped);
        assert_eq!(
            Role::InstructorProvisional.category(),
            RoleCategory::OwnershipScoped
        );
        assert_eq!(Role::InstructorNew.category(), RoleCategory::ConsumerScoped);
    }

    #[test]
    fn parse_roundtrip_and_reject_unknown() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        let err = "superuser".parse::<Role>().unwrap_err();
        assert_eq!(err, UnknownRole("superuser".to_owned()));
    }

    #[test]
    fn serde_matches_display() {
        let json = serde_json::to_string(&Role::InstructorTrainee).unwrap();
        assert_eq!(json, format!("\"{}\"", Role::InstructorTrainee));
    }

    #[test]
    fn hierarchy_comparisons() {
        assert!(Role::Admin.outranks(Role::Provider));
        assert!(!Role::Provider.outranks(Role::Provider));
        assert!(Role::Provider.at_least(Role::Provider));
    }
}
