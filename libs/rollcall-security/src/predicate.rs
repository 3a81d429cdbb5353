//! Row-level scope predicates.
//!
//! A predicate describes which records a caller may see or mutate. Each role
//! category has one builder; adding a role means picking its category, not
//! adding another branch to every table's rule.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fields;
use crate::role::{Role, RoleCategory};

/// Equality predicate: `field = value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEq {
    pub field: String,
    pub value: Uuid,
}

impl FieldEq {
    #[must_use]
    pub fn new(field: &str, value: Uuid) -> Self {
        Self {
            field: field.to_owned(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScopePredicate {
    /// No restriction.
    Unrestricted,
    Eq(FieldEq),
    /// Matches when ANY inner predicate matches.
    AnyOf { predicates: Vec<ScopePredicate> },
    /// Matches when ALL inner predicates match.
    AllOf { predicates: Vec<ScopePredicate> },
}

impl ScopePredicate {
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    fn any_field_eq(field_names: &[&str], value: Uuid) -> Self {
        Self::AnyOf {
            predicates: field_names
                .iter()
                .map(|f| Self::Eq(FieldEq::new(f, value)))
                .collect(),
        }
    }

    /// `instructor_id = caller OR created_by = caller OR issued_by = caller`,
    /// ANDed with `location_id = scope` when a scope is set.
    #[must_use]
    pub fn ownership(caller_id: Uuid, scope_id: Option<Uuid>) -> Self {
        let owned = Self::any_field_eq(&fields::OWNERSHIP_FIELDS, caller_id);
        match scope_id {
            Some(scope) => Self::AllOf {
                predicates: vec![
                    owned,
                    Self::Eq(FieldEq::new(fields::LOCATION_ID, scope)),
                ],
            },
            None => owned,
        }
    }

    /// `student_id = caller OR user_id = caller`.
    #[must_use]
    pub fn consumer(caller_id: Uuid) -> Self {
        Self::any_field_eq(&fields::CONSUMER_FIELDS, caller_id)
    }

    /// Evaluate against a record through a field lookup.
    ///
    /// Missing fields never match an equality.
    pub fn evaluate<F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<Uuid>,
    {
        match self {
            Self::Unrestricted => true,
            Self::Eq(eq) => lookup(&eq.field) == Some(eq.value),
            Self::AnyOf { predicates } => predicates.iter().any(|p| p.evaluate(lookup)),
            Self::AllOf { predicates } => predicates.iter().all(|p| p.evaluate(lookup)),
        }
    }
}

/// Build the predicate restricting `role` acting as `caller_id` within `scope_id`.
#[must_use]
pub fn build_scope_predicate(role: Role, caller_id: Uuid, scope_id: Option<Uuid>) -> ScopePredicate {
    match role.category() {
        RoleCategory::Administrative => ScopePredicate::Unrestricted,
        RoleCategory::OwnershipScoped => ScopePredicate::ownership(caller_id, scope_id),
        RoleCategory::ConsumerScoped => ScopePredicate::consumer(caller_id),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(map: &'a HashMap<&str, Uuid>) -> impl Fn(&str) -> Option<Uuid> + 'a {
        move |field| map.get(field).copied()
    }

    #[test]
    fn admins_are_unrestricted() {
        for role in [Role::SystemAdmin, Role::Admin] {
            assert!(build_scope_predicate(role, Uuid::new_v4(), None).is_unrestricted());
        }
    }

    #[test]
    fn ownership_matches_any_owner_field() {
        let me = Uuid::new_v4();
        let pred = build_scope_predicate(Role::InstructorCertified, me, None);

        for field in fields::OWNERSHIP_FIELDS {
            let row = HashMap::from([(field, me)]);
            assert!(pred.evaluate(&lookup(&row)), "{field} should grant access");
        }
        let other = HashMap::from([(fields::INSTRUCTOR_ID, Uuid::new_v4())]);
        assert!(!pred.evaluate(&lookup(&other)));
    }

    #[test]
    fn ownership_with_scope_requires_location() {
        let me = Uuid::new_v4();
        let loc = Uuid::new_v4();
        let pred = build_scope_predicate(Role::Provider, me, Some(loc));

        let in_loc = HashMap::from([(fields::CREATED_BY, me), (fields::LOCATION_ID, loc)]);
        assert!(pred.evaluate(&lookup(&in_loc)));

        let elsewhere = HashMap::from([
            (fields::CREATED_BY, me),
            (fields::LOCATION_ID, Uuid::new_v4()),
        ]);
        assert!(!pred.evaluate(&lookup(&elsewhere)));
    }

    #[test]
    fn consumer_matches_student_or_user() {
        let me = Uuid::new_v4();
        let pred = build_scope_predicate(Role::InstructorNew, me, Some(Uuid::new_v4()));

        let as_student = HashMap::from([(fields::STUDENT_ID, me)]);
        let as_user = HashMap::from([(fields::USER_ID, me)]);
        let as_instructor = HashMap::from([(fields::INSTRUCTOR_ID, me)]);
        assert!(pred.evaluate(&lookup(&as_student)));
        assert!(pred.evaluate(&lookup(&as_user)));
        assert!(!pred.evaluate(&lookup(&as_instructor)));
    }

    #[test]
    fn predicate_tag_serialization() {
        let pred = ScopePredicate::consumer(Uuid::nil());
        let json = serde_json::to_string(&pred).unwrap();
        assert!(json.contains(r#""op":"any_of""#));
        assert!(json.contains(r#""op":"eq""#));
    }
}
