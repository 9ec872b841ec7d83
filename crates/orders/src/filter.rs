//! Order search filter.
//!
//! Populated fields are combined with AND; the values listed inside one field
//! are combined with OR. An entirely empty filter is rejected because it would
//! match every row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ordertx_core::{DomainError, DomainResult, OrderId};

use crate::status::OrderStatus;

/// Half-open time window `[after, before)`.
///
/// At least one bound must be present. Equal bounds are valid and match no
/// instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn before(at: DateTime<Utc>) -> Self {
        Self {
            before: Some(at),
            after: None,
        }
    }

    pub fn after(at: DateTime<Utc>) -> Self {
        Self {
            before: None,
            after: Some(at),
        }
    }

    pub fn between(after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        Self {
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        match (self.after, self.before) {
            (None, None) => Err(DomainError::validation("both before and after are missing")),
            (Some(after), Some(before)) if after > before => Err(DomainError::validation(
                "after is later than before",
            )),
            _ => Ok(()),
        }
    }

    /// Whether `at` falls inside the window (`after` inclusive, `before` exclusive).
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.after.is_none_or(|after| at >= after) && self.before.is_none_or(|before| at < before)
    }
}

impl ordertx_core::ValueObject for TimeRange {}

/// Search intent for orders.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub ids: Vec<OrderId>,
    pub owner_ids: Vec<String>,
    /// Substring patterns matched against the order URL. `%` and `_` act as
    /// SQL `LIKE` wildcards.
    pub url_patterns: Vec<String>,
    pub statuses: Vec<OrderStatus>,
    /// Matches orders carrying any of the listed tags.
    pub tags: Vec<String>,
    pub created_at: Option<TimeRange>,
    pub updated_at: Option<TimeRange>,
}

impl OrderFilter {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
            && self.owner_ids.is_empty()
            && self.url_patterns.is_empty()
            && self.statuses.is_empty()
            && self.tags.is_empty()
            && self.created_at.is_none()
            && self.updated_at.is_none()
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.is_empty() {
            return Err(DomainError::validation("all fields are empty"));
        }

        if let Some(range) = &self.created_at {
            range.validate().map_err(|e| e.in_field("created_at"))?;
        }

        if let Some(range) = &self.updated_at {
            range.validate().map_err(|e| e.in_field("updated_at"))?;
        }

        Ok(())
    }
}
