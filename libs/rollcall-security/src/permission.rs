//! Static per-table, per-operation access matrix.
//!
//! Decision rule for `can_access(role, table, op)`:
//!
//! | Case | Result |
//! |------|--------|
//! | Table unknown to the matrix (no rule, not a system table) | deny, every role |
//! | Explicit rule lists `op` for `(role, table)` | allow |
//! | Top-rank role, read on any known table | allow |
//! | Top-rank role, write on a non-system table | allow |
//! | Anything else | deny |

use std::collections::{HashMap, HashSet};
use std::fmt;

use rollcall_errors::{ErrorKind, HasErrorKind};
use serde::{Deserialize, Serialize};

use crate::role::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Select,
        Operation::Insert,
        Operation::Update,
        Operation::Delete,
    ];

    #[must_use]
    pub fn is_write(self) -> bool {
        !matches!(self, Self::Select)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization refused locally. Carries what was attempted for audit logging.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("permission denied: role '{role}' may not {operation} on '{table}'")]
pub struct AccessDenied {
    pub role: Role,
    pub table: String,
    pub operation: Operation,
}

impl HasErrorKind for AccessDenied {
    fn kind(&self) -> ErrorKind {
        ErrorKind::PermissionDenied
    }
}

/// One row of the access matrix: `role` may perform `operations` on `table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub role: Role,
    pub table: String,
    pub operations: Vec<Operation>,
}

impl AccessRule {
    #[must_use]
    pub fn new(role: Role, table: &str, operations: &[Operation]) -> Self {
        Self {
            role,
            table: table.to_owned(),
            operations: operations.to_vec(),
        }
    }
}

/// Serialized shape of the matrix, as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AccessMatrixSpec {
    #[serde(default)]
    rules: Vec<AccessRule>,
    #[serde(default)]
    system_tables: Vec<String>,
}

/// Read-only access table, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AccessMatrixSpec", into = "AccessMatrixSpec")]
pub struct AccessMatrix {
    rules: Vec<AccessRule>,
    allowed: HashMap<(Role, String), HashSet<Operation>>,
    known_tables: HashSet<String>,
    system_tables: HashSet<String>,
}

impl From<AccessMatrixSpec> for AccessMatrix {
    fn from(spec: AccessMatrixSpec) -> Self {
        Self::new(spec.rules, spec.system_tables)
    }
}

impl From<AccessMatrix> for AccessMatrixSpec {
    fn from(matrix: AccessMatrix) -> Self {
        let mut system_tables: Vec<String> = matrix.system_tables.into_iter().collect();
        system_tables.sort();
        Self {
            rules: matrix.rules,
            system_tables,
        }
    }
}

impl AccessMatrix {
    #[must_use]
    pub fn new(rules: Vec<AccessRule>, system_tables: Vec<String>) -> Self {
        let mut allowed: HashMap<(Role, String), HashSet<Operation>> = HashMap::new();
        let mut known_tables: HashSet<String> = HashSet::new();
        for rule in &rules {
            known_tables.insert(rule.table.clone());
            allowed
                .entry((rule.role, rule.table.clone()))
                .or_default()
                .extend(rule.operations.iter().copied());
        }
        let system_tables: HashSet<String> = system_tables.into_iter().collect();
        known_tables.extend(system_tables.iter().cloned());
        Self {
            rules,
            allowed,
            known_tables,
            system_tables,
        }
    }

    /// A matrix with no rules: everything is denied.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    #[must_use]
    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    #[must_use]
    pub fn is_known_table(&self, table: &str) -> bool {
        self.known_tables.contains(table)
    }

    #[must_use]
    pub fn is_system_table(&self, table: &str) -> bool {
        self.system_tables.contains(table)
    }

    #[must_use]
    pub fn can_access(&self, role: Role, table: &str, operation: Operation) -> bool {
        if !self.is_known_table(table) {
            return false;
        }
        let explicit = self
            .allowed
            .get(&(role, table.to_owned()))
            .is_some_and(|ops| ops.contains(&operation));
        if explicit {
            return true;
        }
        role.is_top_rank() && !(operation.is_write() && self.is_system_table(table))
    }

    /// Same decision as [`Self::can_access`], as a typed result.
    ///
    /// # Errors
    /// Returns [`AccessDenied`] carrying the attempted role, table and operation.
    pub fn check(&self, role: Role, table: &str, operation: Operation) -> Result<(), AccessDenied> {
        if self.can_access(role, table, operation) {
            Ok(())
        } else {
            Err(AccessDenied {
                role,
                table: table.to_owned(),
                operation,
            })
        }
    }
}

pub mod tables {
    pub const SESSIONS: &str = "sessions";
    pub const ENROLLMENTS: &str = "enrollments";
    pub const CERTIFICATES: &str = "certificates";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const COURSE_ROSTERS: &str = "course_rosters";
    pub const PROFILES: &str = "profiles";
    pub const LOCATIONS: &str = "locations";
    pub const AUDIT_LOG: &str = "audit_log";
    pub const ACCESS_RULES: &str = "access_rules";
}

impl Default for AccessMatrix {
    /// Built-in table shipped with the product.
    fn default() -> Self {
        use Operation::{Delete, Insert, Select, Update};
        use tables::{
            ACCESS_RULES, AUDIT_LOG, CERTIFICATES, COURSE_ROSTERS, ENROLLMENTS, LOCATIONS,
            NOTIFICATIONS, PROFILES, SESSIONS,
        };

        const CRUD: &[Operation] = &[Select, Insert, Update, Delete];
        let business = [
            SESSIONS,
            ENROLLMENTS,
            CERTIFICATES,
            NOTIFICATIONS,
            COURSE_ROSTERS,
            PROFILES,
            LOCATIONS,
        ];

        let mut rules = Vec::new();
        for table in business {
            rules.push(AccessRule::new(Role::Admin, table, CRUD));
        }
        rules.push(AccessRule::new(Role::Admin, AUDIT_LOG, &[Select]));

        let owner_rules: [(Role, &str, &[Operation]); 21] = [
            (Role::Provider, SESSIONS, CRUD),
            (Role::Provider, ENROLLMENTS, CRUD),
            (Role::Provider, CERTIFICATES, &[Select, Insert, Update]),
            (Role::Provider, NOTIFICATIONS, &[Select, Insert]),
            (Role::Provider, COURSE_ROSTERS, &[Select, Insert, Update]),
            (Role::Provider, PROFILES, &[Select, Update]),
            (Role::Provider, LOCATIONS, &[Select, Update]),
            (Role::InstructorCertified, SESSIONS, &[Select, Insert, Update]),
            (Role::InstructorCertified, ENROLLMENTS, &[Select, Insert, Update]),
            (Role::InstructorCertified, CERTIFICATES, &[Select, Insert]),
            (Role::InstructorCertified, NOTIFICATIONS, &[Select, Insert]),
            (Role::InstructorCertified, COURSE_ROSTERS, &[Select, Update]),
            (Role::InstructorCertified, PROFILES, &[Select, Update]),
            (Role::InstructorCertified, LOCATIONS, &[Select]),
            (Role::InstructorProvisional, SESSIONS, &[Select, Insert, Update]),
            (Role::InstructorProvisional, ENROLLMENTS, &[Select, Insert, Update]),
            (Role::InstructorProvisional, CERTIFICATES, &[Select]),
            (Role::InstructorProvisional, NOTIFICATIONS, &[Select, Insert]),
            (Role::InstructorProvisional, COURSE_ROSTERS, &[Select, Update]),
            (Role::InstructorProvisional, PROFILES, &[Select, Update]),
            (Role::InstructorProvisional, LOCATIONS, &[Select]),
        ];
        rules.extend(
            owner_rules
                .into_iter()
                .map(|(role, table, ops)| AccessRule::new(role, table, ops)),
        );

        for role in [Role::InstructorTrainee, Role::InstructorNew] {
            rules.push(AccessRule::new(role, SESSIONS, &[Select]));
            rules.push(AccessRule::new(role, ENROLLMENTS, &[Select, Insert]));
            rules.push(AccessRule::new(role, CERTIFICATES, &[Select]));
            rules.push(AccessRule::new(role, NOTIFICATIONS, &[Select, Update]));
            rules.push(AccessRule::new(role, PROFILES, &[Select, Update]));
            rules.push(AccessRule::new(role, LOCATIONS, &[Select]));
        }

        Self::new(rules, vec![AUDIT_LOG.to_owned(), ACCESS_RULES.to_owned()])
    }
}
