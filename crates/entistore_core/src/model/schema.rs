//! Entity type definitions and field validation.
//!
//! # Responsibility
//! - Describe the table shape of one entity type.
//! - Validate and normalize field maps before they reach SQL.
//!
//! # Invariants
//! - Type and field names are safe SQL identifiers.
//! - `id` is never a user field; it is owned by the store.
//! - `required` fields never hold `Null` after a successful write.

use crate::model::entity::{FieldValue, Fields};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Column name of the store-assigned identifier.
pub const ID_COLUMN: &str = "id";

/// Internal tables an entity type must not shadow.
const RESERVED_TABLES: &[&str] = &["entity_types"];

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier regex must compile")
});

/// Scalar storage kind of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Bool,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Bool => "bool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Some(Self::Integer),
            "real" | "float" => Some(Self::Real),
            "text" | "string" => Some(Self::Text),
            "bool" | "boolean" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Whether `value` can be stored in a column of this kind.
    ///
    /// `Null` is always accepted here; nullability is checked separately.
    pub fn accepts(self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (_, FieldValue::Null)
                | (Self::Integer, FieldValue::Integer(_))
                | (Self::Real, FieldValue::Real(_) | FieldValue::Integer(_))
                | (Self::Text, FieldValue::Text(_))
                | (Self::Bool, FieldValue::Bool(_))
        )
    }

    /// Parses a textual literal into a value of this kind.
    ///
    /// The literal `null` always parses as `FieldValue::Null`.
    pub fn parse_value(self, raw: &str) -> Option<FieldValue> {
        if raw == "null" {
            return Some(FieldValue::Null);
        }
        match self {
            Self::Integer => raw.trim().parse().ok().map(FieldValue::Integer),
            Self::Real => raw.trim().parse().ok().map(FieldValue::Real),
            Self::Text => Some(FieldValue::Text(raw.to_string())),
            Self::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(FieldValue::Bool(true)),
                "false" | "0" => Some(FieldValue::Bool(false)),
                _ => None,
            },
        }
    }

    pub(crate) fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Bool => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }

    fn normalize(self, value: FieldValue) -> FieldValue {
        match (self, value) {
            (Self::Real, FieldValue::Integer(raw)) => FieldValue::Real(raw as f64),
            (_, other) => other,
        }
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of one entity field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
}

impl FieldDef {
    /// Creates an optional, non-unique field.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            unique: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Parses `name:kind[:required][:unique]`.
    pub fn parse(spec: &str) -> Result<Self, SchemaError> {
        let mut parts = spec.split(':');
        let name = parts.next().unwrap_or_default();
        let kind_text = parts
            .next()
            .ok_or_else(|| SchemaError::InvalidFieldSpec(spec.to_string()))?;
        let kind = FieldKind::parse(kind_text)
            .ok_or_else(|| SchemaError::InvalidFieldSpec(spec.to_string()))?;

        let mut field = Self::new(name, kind);
        for flag in parts {
            match flag {
                "required" => field.required = true,
                "unique" => field.unique = true,
                _ => return Err(SchemaError::InvalidFieldSpec(spec.to_string())),
            }
        }
        Ok(field)
    }
}

/// Shape of one entity type: its table name and field declarations.
///
/// Deserialization runs the same checks as [`EntityType::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEntityType")]
pub struct EntityType {
    name: String,
    fields: Vec<FieldDef>,
}

#[derive(Deserialize)]
struct RawEntityType {
    name: String,
    fields: Vec<FieldDef>,
}

impl TryFrom<RawEntityType> for EntityType {
    type Error = SchemaError;

    fn try_from(raw: RawEntityType) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.fields)
    }
}

impl EntityType {
    /// Creates a validated entity type.
    ///
    /// # Errors
    /// - Names that are not plain SQL identifiers.
    /// - Reserved table names, the reserved `id` field, duplicate fields.
    /// - Types without any field.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Result<Self, SchemaError> {
        let entity_type = Self {
            name: name.into(),
            fields,
        };
        entity_type.check()?;
        Ok(entity_type)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Re-checks invariants before a definition reaches the catalog.
    pub(crate) fn check(&self) -> Result<(), SchemaError> {
        if !is_identifier(&self.name) {
            return Err(SchemaError::InvalidName(self.name.clone()));
        }
        let lowered = self.name.to_ascii_lowercase();
        if lowered.starts_with("sqlite_") || RESERVED_TABLES.contains(&lowered.as_str()) {
            return Err(SchemaError::ReservedName(self.name.clone()));
        }
        if self.fields.is_empty() {
            return Err(SchemaError::NoFields(self.name.clone()));
        }

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !is_identifier(&field.name) {
                return Err(SchemaError::InvalidName(field.name.clone()));
            }
            if field.name.eq_ignore_ascii_case(ID_COLUMN) {
                return Err(SchemaError::ReservedName(field.name.clone()));
            }
            // SQLite column names are case-insensitive.
            if !seen.insert(field.name.to_ascii_lowercase()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }
        Ok(())
    }

    /// Validates a create payload and fills in every undeclared field as `Null`.
    pub fn validate_create(&self, fields: &Fields) -> Result<Fields, FieldError> {
        self.reject_unknown(fields)?;

        let mut normalized = Fields::new();
        for def in &self.fields {
            let value = fields.get(&def.name).cloned().unwrap_or(FieldValue::Null);
            normalized.insert(def.name.clone(), self.check_value(def, value)?);
        }
        Ok(normalized)
    }

    /// Validates a partial update payload; only the named fields are returned.
    pub fn validate_update(&self, fields: &Fields) -> Result<Fields, FieldError> {
        self.reject_unknown(fields)?;

        let mut normalized = Fields::new();
        for (name, value) in fields {
            if let Some(def) = self.field(name) {
                normalized.insert(name.clone(), self.check_value(def, value.clone())?);
            }
        }
        Ok(normalized)
    }

    fn reject_unknown(&self, fields: &Fields) -> Result<(), FieldError> {
        match fields.keys().find(|name| self.field(name).is_none()) {
            Some(name) if name == ID_COLUMN => Err(FieldError::ImmutableId),
            Some(name) => Err(FieldError::UnknownField {
                entity_type: self.name.clone(),
                field: name.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_value(&self, def: &FieldDef, value: FieldValue) -> Result<FieldValue, FieldError> {
        if !def.kind.accepts(&value) {
            return Err(FieldError::KindMismatch {
                field: def.name.clone(),
                expected: def.kind,
                actual: value,
            });
        }
        if def.required && value.is_null() {
            return Err(FieldError::RequiredNull(def.name.clone()));
        }
        ensure_finite(&def.name, &value)?;
        Ok(def.kind.normalize(value))
    }
}

/// SQLite stores NaN as NULL, so non-finite reals never reach a column.
pub(crate) fn ensure_finite(field: &str, value: &FieldValue) -> Result<(), FieldError> {
    match value {
        FieldValue::Real(raw) if !raw.is_finite() => {
            Err(FieldError::NonFinite(field.to_string()))
        }
        _ => Ok(()),
    }
}

pub(crate) fn is_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

/// Quotes a validated identifier for SQL text.
pub(crate) fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Invalid entity type declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidName(String),
    ReservedName(String),
    DuplicateField(String),
    NoFields(String),
    InvalidFieldSpec(String),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(
                f,
                "invalid name `{name}`; expected [A-Za-z_][A-Za-z0-9_]*, at most 63 chars"
            ),
            Self::ReservedName(name) => write!(f, "name `{name}` is reserved"),
            Self::DuplicateField(name) => write!(f, "field `{name}` is declared twice"),
            Self::NoFields(name) => write!(f, "entity type `{name}` declares no fields"),
            Self::InvalidFieldSpec(spec) => write!(
                f,
                "invalid field spec `{spec}`; expected name:kind[:required][:unique]"
            ),
        }
    }
}

impl Error for SchemaError {}

/// Field payload that does not fit its entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    UnknownField { entity_type: String, field: String },
    ImmutableId,
    KindMismatch {
        field: String,
        expected: FieldKind,
        actual: FieldValue,
    },
    RequiredNull(String),
    NullComparison(String),
    NonFinite(String),
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { entity_type, field } => {
                write!(f, "entity type `{entity_type}` has no field `{field}`")
            }
            Self::ImmutableId => write!(f, "`{ID_COLUMN}` is assigned by the store"),
            Self::KindMismatch {
                field,
                expected,
                actual,
            } => write!(f, "field `{field}` expects {expected}, got {actual}"),
            Self::RequiredNull(field) => write!(f, "field `{field}` is required"),
            Self::NullComparison(field) => {
                write!(f, "field `{field}` cannot be ordered against null")
            }
            Self::NonFinite(field) => write!(f, "field `{field}` must be a finite number"),
        }
    }
}

impl Error for FieldError {}

#[cfg(test)]
mod tests {
    use super::{EntityType, FieldDef, FieldError, FieldKind, SchemaError};
    use crate::model::entity::FieldValue;

    fn person() -> EntityType {
        EntityType::new(
            "person",
            vec![
                FieldDef::new("name", FieldKind::Text).required(),
                FieldDef::new("age", FieldKind::Integer),
                FieldDef::new("score", FieldKind::Real),
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_and_reserved_names() {
        let field = || vec![FieldDef::new("x", FieldKind::Text)];
        assert!(matches!(
            EntityType::new("bad-name", field()),
            Err(SchemaError::InvalidName(_))
        ));
        assert!(matches!(
            EntityType::new("sqlite_master", field()),
            Err(SchemaError::ReservedName(_))
        ));
        assert!(matches!(
            EntityType::new("entity_types", field()),
            Err(SchemaError::ReservedName(_))
        ));
        assert!(matches!(
            EntityType::new("t", vec![FieldDef::new("ID", FieldKind::Integer)]),
            Err(SchemaError::ReservedName(_))
        ));
        assert!(matches!(
            EntityType::new("t", Vec::new()),
            Err(SchemaError::NoFields(_))
        ));
    }

    #[test]
    fn rejects_case_insensitive_duplicate_fields() {
        let result = EntityType::new(
            "t",
            vec![
                FieldDef::new("Name", FieldKind::Text),
                FieldDef::new("name", FieldKind::Text),
            ],
        );
        assert_eq!(result, Err(SchemaError::DuplicateField("name".to_string())));
    }

    #[test]
    fn validate_create_fills_missing_fields_and_widens_integers() {
        let fields = crate::fields! { "name" => "ada", "score" => 3 };
        let normalized = person().validate_create(&fields).unwrap();

        assert_eq!(normalized["name"], FieldValue::Text("ada".to_string()));
        assert_eq!(normalized["age"], FieldValue::Null);
        assert_eq!(normalized["score"], FieldValue::Real(3.0));
    }

    #[test]
    fn validate_create_rejects_missing_required_field() {
        let err = person()
            .validate_create(&crate::fields! { "age" => 3 })
            .unwrap_err();
        assert_eq!(err, FieldError::RequiredNull("name".to_string()));
    }

    #[test]
    fn validate_update_keeps_only_named_fields() {
        let normalized = person()
            .validate_update(&crate::fields! { "age" => 40 })
            .unwrap();
        assert_eq!(normalized.len(), 1);

        let err = person()
            .validate_update(&crate::fields! { "id" => 9 })
            .unwrap_err();
        assert_eq!(err, FieldError::ImmutableId);

        let err = person()
            .validate_update(&crate::fields! { "age" => "old" })
            .unwrap_err();
        assert!(matches!(err, FieldError::KindMismatch { .. }));
    }

    #[test]
    fn field_def_parses_flags() {
        let field = FieldDef::parse("email:text:required:unique").unwrap();
        assert_eq!(field.kind, FieldKind::Text);
        assert!(field.required);
        assert!(field.unique);

        assert!(FieldDef::parse("email").is_err());
        assert!(FieldDef::parse("email:blob").is_err());
        assert!(FieldDef::parse("email:text:primary").is_err());
    }

    #[test]
    fn parse_value_follows_kind() {
        assert_eq!(
            FieldKind::Integer.parse_value("12"),
            Some(FieldValue::Integer(12))
        );
        assert_eq!(FieldKind::Integer.parse_value("x"), None);
        assert_eq!(FieldKind::Bool.parse_value("TRUE"), Some(FieldValue::Bool(true)));
        assert_eq!(FieldKind::Text.parse_value("null"), Some(FieldValue::Null));
    }

    #[test]
    fn deserialization_runs_the_same_checks_as_new() {
        let decoded: EntityType = serde_json::from_str(
            r#"{"name":"person","fields":[{"name":"name","kind":"text","required":true}]}"#,
        )
        .unwrap();
        assert_eq!(decoded.name(), "person");

        let invalid = serde_json::from_str::<EntityType>(
            r#"{"name":"bad name","fields":[{"name":"v","kind":"text"}]}"#,
        );
        assert!(invalid.is_err());

        let reserved_field = serde_json::from_str::<EntityType>(
            r#"{"name":"t","fields":[{"name":"id","kind":"integer"}]}"#,
        );
        assert!(reserved_field.is_err());
    }

    #[test]
    fn rejects_non_finite_reals() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = person()
                .validate_create(&crate::fields! { "name" => "ada", "score" => value })
                .unwrap_err();
            assert_eq!(err, FieldError::NonFinite("score".to_string()));

            let err = person()
                .validate_update(&crate::fields! { "score" => value })
                .unwrap_err();
            assert_eq!(err, FieldError::NonFinite("score".to_string()));
        }
    }
}
