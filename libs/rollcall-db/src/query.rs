use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Backend query/mutation descriptor.
///
/// `filters` are the caller's own conditions. `scope` is the single slot the
/// access filter writes into; scoping replaces it rather than appending, so
/// applying the same caller's scope twice yields the same restriction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    table: String,
    filters: Vec<Condition>,
    scope: Option<Condition>,
    order_by: Option<OrderBy>,
    limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_owned(),
            filters: Vec::new(),
            scope: None,
            order_by: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.filters.push(condition);
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_owned(),
            direction,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub(crate) fn with_scope(mut self, scope: Condition) -> Self {
        self.scope = Some(scope);
        self
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn filters(&self) -> &[Condition] {
        &self.filters
    }

    #[must_use]
    pub fn scope(&self) -> Option<&Condition> {
        self.scope.as_ref()
    }

    #[must_use]
    pub fn ordering(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    #[must_use]
    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Effective WHERE clause: filters AND scope.
    #[must_use]
    pub fn condition(&self) -> Condition {
        let mut parts = self.filters.clone();
        if let Some(scope) = &self.scope {
            parts.push(scope.clone());
        }
        Condition::all(parts)
    }

    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|c| c.matches(record))
            && self.scope.as_ref().is_none_or(|s| s.matches(record))
    }
}
