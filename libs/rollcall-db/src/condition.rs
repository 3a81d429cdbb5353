use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use rollcall_security::ScopePredicate;

use crate::record::Record;

/// Row filter understood by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Const { value: bool },
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    /// All inner conditions hold; an empty list holds.
    All { conditions: Vec<Condition> },
    /// Any inner condition holds; an empty list never holds.
    Any { conditions: Vec<Condition> },
}

impl Condition {
    #[must_use]
    pub fn always() -> Self {
        Self::Const { value: true }
    }

    #[must_use]
    pub fn never() -> Self {
        Self::Const { value: false }
    }

    #[must_use]
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.to_owned(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn eq_uuid(field: &str, value: Uuid) -> Self {
        Self::eq(field, value.to_string())
    }

    #[must_use]
    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::Ne {
            field: field.to_owned(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Self::In {
            field: field.to_owned(),
            values,
        }
    }

    #[must_use]
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::All { conditions }
    }

    #[must_use]
    pub fn any(conditions: Vec<Condition>) -> Self {
        Self::Any { conditions }
    }

    /// Evaluate against a record. A missing field is never equal to anything
    /// and is always "not equal".
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Const { value } => *value,
            Self::Eq { field, value } => record.get(field) == Some(value),
            Self::Ne { field, value } => record.get(field) != Some(value),
            Self::In { field, values } => record.get(field).is_some_and(|v| values.contains(v)),
            Self::All { conditions } => conditions.iter().all(|c| c.matches(record)),
            Self::Any { conditions } => conditions.iter().any(|c| c.matches(record)),
        }
    }
}

/// Translate a caller's scope predicate into a row condition.
///
/// # Policy Rules
/// 1. `Unrestricted` → always true
/// 2. Field equality → `field = value`
/// 3. `AnyOf` / `AllOf` → OR / AND of the translated parts
#[must_use]
pub fn build_scope_condition(predicate: &ScopePredicate) -> Condition {
    match predicate {
        ScopePredicate::Unrestricted => Condition::always(),
        ScopePredicate::Eq(eq) => Condition::eq_uuid(&eq.field, eq.value),
        ScopePredicate::AnyOf { predicates } => {
            Condition::any(predicates.iter().map(build_scope_condition).collect())
        }
        ScopePredicate::AllOf { predicates } => {
            Condition::all(predicates.iter().map(build_scope_condition).collect())
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use rollcall_security::{Role, build_scope_predicate, fields};

    #[test]
    fn empty_any_is_false_empty_all_is_true() {
        let rec = Record::new();
        assert!(!Condition::any(vec![]).matches(&rec));
        assert!(Condition::all(vec![]).matches(&rec));
    }

    #[test]
    fn ne_matches_missing_field() {
        let rec = Record::new().with("status", "enrolled");
        assert!(Condition::ne("status", "cancelled").matches(&rec));
        assert!(!Condition::ne("status", "enrolled").matches(&rec));
        assert!(Condition::ne("other", "x").matches(&rec));
    }

    #[test]
    fn scope_condition_agrees_with_predicate() {
        let me = Uuid::new_v4();
        let loc = Uuid::new_v4();
        let pred = build_scope_predicate(Role::Provider, me, Some(loc));
        let cond = build_scope_condition(&pred);

        let rows = [
            Record::new()
                .with_uuid(fields::ISSUED_BY, me)
                .with_uuid(fields::LOCATION_ID, loc),
            Record::new()
                .with_uuid(fields::ISSUED_BY, me)
                .with_uuid(fields::LOCATION_ID, Uuid::new_v4()),
            Record::new().with_uuid(fields::STUDENT_ID, me),
        ];
        for row in &rows {
            assert_eq!(
                cond.matches(row),
                pred.evaluate(&|f: &str| row.get_uuid(f)),
                "row {row:?}"
            );
        }
        assert!(cond.matches(&rows[0]));
        assert!(!cond.matches(&rows[1]));
    }
}
