use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int,
    Float,
    Bool,
    Timestamp,
    Uuid,
    TextArray,
    TimestampArray,
    UuidArray,
    /// Structured values; projectable only.
    Json,
}

impl FieldKind {
    pub fn is_array(self) -> bool {
        matches!(
            self,
            FieldKind::TextArray | FieldKind::TimestampArray | FieldKind::UuidArray
        )
    }

    /// Kind of a single element; scalars are their own element kind.
    pub fn element(self) -> FieldKind {
        match self {
            FieldKind::TextArray => FieldKind::Text,
            FieldKind::TimestampArray => FieldKind::Timestamp,
            FieldKind::UuidArray => FieldKind::Uuid,
            other => other,
        }
    }
}

/// A typed value bound into a generated statement.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(OffsetDateTime),
    Uuid(Uuid),
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts);
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|d| d.midnight().assume_utc())
}

/// Casts a raw query value to the column type.
pub fn cast(field: &str, kind: FieldKind, raw: &str) -> AppResult<FilterValue> {
    let invalid = || AppError::bad_request(format!("Invalid {field}: {raw}."));
    let value = match kind.element() {
        FieldKind::Text => FilterValue::Text(raw.to_string()),
        FieldKind::Int => FilterValue::Int(raw.trim().parse().map_err(|_| invalid())?),
        FieldKind::Float => {
            let v: f64 = raw.trim().parse().map_err(|_| invalid())?;
            if !v.is_finite() {
                return Err(invalid());
            }
            FilterValue::Float(v)
        }
        FieldKind::Bool => match raw.trim() {
            "true" => FilterValue::Bool(true),
            "false" => FilterValue::Bool(false),
            _ => return Err(invalid()),
        },
        FieldKind::Timestamp => FilterValue::Timestamp(parse_timestamp(raw.trim()).ok_or_else(invalid)?),
        FieldKind::Uuid => FilterValue::Uuid(Uuid::parse_str(raw.trim()).map_err(|_| invalid())?),
        FieldKind::Json | FieldKind::TextArray | FieldKind::TimestampArray | FieldKind::UuidArray => {
            return Err(AppError::bad_request(format!("Invalid field: {field}")))
        }
    };
    Ok(value)
}

/// One API field: its camelCase name, the SQL expression producing it and its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub field: &'static str,
    pub expr: &'static str,
    pub kind: FieldKind,
}

impl Column {
    pub const fn new(field: &'static str, expr: &'static str, kind: FieldKind) -> Self {
        Self { field, expr, kind }
    }

    pub fn filterable(&self) -> bool {
        self.kind != FieldKind::Json
    }

    pub fn sortable(&self) -> bool {
        self.kind != FieldKind::Json && !self.kind.is_array()
    }
}

/// A field resolved by a correlated subquery returning JSON, e.g. a tour's
/// guides or reviews. When a column with the same field exists, the
/// expansion replaces it wherever that column is projected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub field: &'static str,
    pub sql: &'static str,
}

#[derive(Debug)]
pub struct ResourceSchema {
    pub table: &'static str,
    pub columns: &'static [Column],
    /// Fields left out of the default projection.
    pub hidden: &'static [&'static str],
}

impl ResourceSchema {
    pub fn column(&self, field: &str) -> Option<&'static Column> {
        self.columns.iter().find(|c| c.field == field)
    }

    pub fn require(&self, field: &str) -> AppResult<&'static Column> {
        self.column(field)
            .ok_or_else(|| AppError::bad_request(format!("Invalid field: {field}")))
    }

    pub fn id_column(&self) -> &'static Column {
        self.columns
            .iter()
            .find(|c| c.field == "id")
            .unwrap_or(&self.columns[0])
    }

    pub fn default_projection(&self) -> Vec<Column> {
        self.columns
            .iter()
            .filter(|c| !self.hidden.contains(&c.field))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn casts_by_kind() {
        assert_eq!(cast("price", FieldKind::Float, "497").unwrap(), FilterValue::Float(497.0));
        assert_eq!(cast("duration", FieldKind::Int, " 5 ").unwrap(), FilterValue::Int(5));
        assert_eq!(cast("secretTour", FieldKind::Bool, "true").unwrap(), FilterValue::Bool(true));
        assert_eq!(
            cast("difficulty", FieldKind::Text, "easy").unwrap(),
            FilterValue::Text("easy".into())
        );
        assert_eq!(
            cast("startDates", FieldKind::TimestampArray, "2021-06-19").unwrap(),
            FilterValue::Timestamp(datetime!(2021-06-19 0:00 UTC))
        );
        assert_eq!(
            cast("createdAt", FieldKind::Timestamp, "2021-06-19T09:30:00Z").unwrap(),
            FilterValue::Timestamp(datetime!(2021-06-19 9:30 UTC))
        );
    }

    #[test]
    fn cast_failure_names_field_and_value() {
        let err = cast("price", FieldKind::Float, "abc").unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(err.to_string(), "Invalid price: abc.");
        assert!(cast("duration", FieldKind::Int, "4.5").is_err());
        assert!(cast("price", FieldKind::Float, "NaN").is_err());
        assert!(cast("guides", FieldKind::UuidArray, "nope").is_err());
        assert!(cast("locations", FieldKind::Json, "x").is_err());
    }
}
