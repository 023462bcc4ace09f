//! Predicate and pagination builder shared by every list query.
//!
//! Filter fields are trusted identifiers: callers translate user-facing
//! query keys through a fixed allow-list before anything reaches this
//! module. Nothing here inspects or escapes field names.

use rusqlite::types::Value;
use serde::Serialize;

/// Ordered set of filter conditions.
///
/// A field may carry a comparison operator after a single space, e.g.
/// `"created_at >="`. Without one the operator is `=`. Conditions whose
/// value is `None` are skipped when the clause is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    conditions: Vec<(String, Option<Value>)>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Option<Value>>) -> Self {
        self.push(field, value);
        self
    }

    pub fn push(&mut self, field: impl Into<String>, value: impl Into<Option<Value>>) {
        self.conditions.push((field.into(), value.into()));
    }

    pub fn extend(&mut self, other: &Filters) {
        self.conditions.extend(other.conditions.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// A rendered WHERE fragment and the values bound to its placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Render `filters` as `field op ?N` conditions joined by `AND`, numbering
/// placeholders from `start`. No live conditions yields `1 = 1`.
pub fn build_where(filters: &Filters, start: usize) -> WhereClause {
    let mut conditions = Vec::with_capacity(filters.len());
    let mut params = Vec::with_capacity(filters.len());
    let mut placeholder = start;

    for (field, value) in &filters.conditions {
        let value = match value {
            Some(value) => value,
            None => continue,
        };
        let (name, operator) = match field.trim().split_once(' ') {
            Some((name, operator)) => (name, operator.trim()),
            None => (field.trim(), "="),
        };
        conditions.push(format!("{} {} ?{}", name, operator, placeholder));
        params.push(value.clone());
        placeholder += 1;
    }

    if conditions.is_empty() {
        return WhereClause { sql: "1 = 1".to_string(), params };
    }

    WhereClause {
        sql: conditions.join(" AND "),
        params,
    }
}

/// Default and maximum page size for one family of listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct PageBounds {
    pub default_size: u32,
    pub max_size: u32,
}

impl PageBounds {
    /// Bounds for ordinary listings
    pub const GENERAL: PageBounds = PageBounds { default_size: 10, max_size: 1000 };
    /// Bounds for listings with heavier rows
    pub const STRICT: PageBounds = PageBounds { default_size: 5, max_size: 10 };
}

/// Offset/limit pair derived from a 1-indexed page number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u64,
}

impl PageRequest {
    /// Build from raw query values. Missing, unparseable or non-positive
    /// values fall back to page 1 and the default size; sizes above the
    /// maximum are clamped.
    pub fn from_query(page: Option<&str>, size: Option<&str>, bounds: PageBounds) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<u64>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(1);
        let size = size
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(|s| s.min(bounds.max_size as u64))
            .unwrap_or(bounds.default_size as u64);
        Self::new(page, size)
    }

    pub fn new(page: u64, size: u64) -> Self {
        let page = page.max(1);
        let size = size.max(1);
        Self {
            offset: (page - 1).saturating_mul(size),
            limit: size,
        }
    }
}

/// Pagination summary returned next to a page of rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub size: u64,
}

impl Pagination {
    pub fn new(total: u64, offset: u64, limit: u64) -> Self {
        let page = if limit == 0 {
            1
        } else {
            (offset as f64 / limit as f64).round() as u64 + 1
        };
        Self { total, page, size: limit }
    }
}
