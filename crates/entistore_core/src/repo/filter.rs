//! Entity list filters.
//!
//! # Responsibility
//! - Describe conjunctive `field op value` conditions for list queries.
//! - Render them into parameterized SQL against one entity type.
//!
//! # Invariants
//! - Field names are checked against the entity type before SQL is built,
//!   so only declared columns (or `id`) ever reach SQL text.
//! - Values are always bound, never inlined.

use crate::model::entity::FieldValue;
use crate::model::schema::{
    ensure_finite, quote_ident, EntityType, FieldError, FieldKind, ID_COLUMN,
};
use rusqlite::types::Value;
use std::fmt::{Display, Formatter};

/// Comparison operator of one filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    /// Operator tokens, longest first so prefix matching is unambiguous.
    pub const TOKENS: [(&'static str, Comparison); 6] = [
        ("!=", Comparison::Ne),
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("=", Comparison::Eq),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `field op value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Comparison,
    pub value: FieldValue,
}

/// Conjunction of conditions plus an optional cap on returned entities.
///
/// The default filter matches every entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    conditions: Vec<Condition>,
    limit: Option<u32>,
}

impl EntityFilter {
    /// Matches every entity.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        field: impl Into<String>,
        op: Comparison,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Eq, value)
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Ne, value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Lt, value)
    }

    pub fn le(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Le, value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Gt, value)
    }

    pub fn ge(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(field, Comparison::Ge, value)
    }

    /// Caps the total number of entities a listing yields.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn max_results(&self) -> Option<u32> {
        self.limit
    }

    /// Renders `WHERE` fragments and their bind values.
    pub(crate) fn to_sql(
        &self,
        entity_type: &EntityType,
    ) -> Result<(Vec<String>, Vec<Value>), FieldError> {
        let mut clauses = Vec::with_capacity(self.conditions.len());
        let mut bind_values = Vec::new();

        for condition in &self.conditions {
            let kind = column_kind(entity_type, &condition.field)?;
            if !kind.accepts(&condition.value) {
                return Err(FieldError::KindMismatch {
                    field: condition.field.clone(),
                    expected: kind,
                    actual: condition.value.clone(),
                });
            }

            ensure_finite(&condition.field, &condition.value)?;

            let column = quote_ident(&condition.field);
            if condition.value.is_null() {
                match condition.op {
                    Comparison::Eq => clauses.push(format!("{column} IS NULL")),
                    Comparison::Ne => clauses.push(format!("{column} IS NOT NULL")),
                    _ => return Err(FieldError::NullComparison(condition.field.clone())),
                }
                continue;
            }

            clauses.push(format!("{column} {} ?", condition.op.as_str()));
            bind_values.push(condition.value.to_sql_value());
        }

        Ok((clauses, bind_values))
    }
}

fn column_kind(entity_type: &EntityType, field: &str) -> Result<FieldKind, FieldError> {
    if field == ID_COLUMN {
        return Ok(FieldKind::Integer);
    }
    entity_type
        .field(field)
        .map(|def| def.kind)
        .ok_or_else(|| FieldError::UnknownField {
            entity_type: entity_type.name().to_string(),
            field: field.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::EntityFilter;
    use crate::model::schema::{EntityType, FieldDef, FieldError, FieldKind};
    use rusqlite::types::Value;

    fn item() -> EntityType {
        EntityType::new(
            "item",
            vec![
                FieldDef::new("name", FieldKind::Text),
                FieldDef::new("price", FieldKind::Real),
                FieldDef::new("active", FieldKind::Bool),
            ],
        )
        .unwrap()
    }

    #[test]
    fn renders_bound_conditions_in_order() {
        let filter = EntityFilter::all()
            .eq("name", "pen")
            .ge("price", 2)
            .eq("active", true)
            .gt("id", 10);
        let (clauses, values) = filter.to_sql(&item()).unwrap();

        assert_eq!(
            clauses,
            vec![
                "\"name\" = ?",
                "\"price\" >= ?",
                "\"active\" = ?",
                "\"id\" > ?"
            ]
        );
        assert_eq!(
            values,
            vec![
                Value::Text("pen".to_string()),
                Value::Integer(2),
                Value::Integer(1),
                Value::Integer(10)
            ]
        );
    }

    #[test]
    fn null_equality_becomes_is_null() {
        let filter = EntityFilter::all()
            .eq("name", None::<String>)
            .ne("price", None::<f64>);
        let (clauses, values) = filter.to_sql(&item()).unwrap();

        assert_eq!(clauses, vec!["\"name\" IS NULL", "\"price\" IS NOT NULL"]);
        assert!(values.is_empty());
    }

    #[test]
    fn rejects_unknown_fields_kind_mismatch_and_null_ordering() {
        let err = EntityFilter::all().eq("color", "red").to_sql(&item()).unwrap_err();
        assert!(matches!(err, FieldError::UnknownField { .. }));

        let err = EntityFilter::all().eq("price", "cheap").to_sql(&item()).unwrap_err();
        assert!(matches!(err, FieldError::KindMismatch { .. }));

        let err = EntityFilter::all()
            .lt("price", None::<f64>)
            .to_sql(&item())
            .unwrap_err();
        assert_eq!(err, FieldError::NullComparison("price".to_string()));

        let err = EntityFilter::all()
            .gt("price", f64::NAN)
            .to_sql(&item())
            .unwrap_err();
        assert_eq!(err, FieldError::NonFinite("price".to_string()));
    }
}
