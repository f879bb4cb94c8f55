//! Field mapping seam between raw source records and stored records

use serde_json::Value;

use crate::sync::identity::SCOPE_FIELD;
use crate::sync::store::Fields;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Missing required field {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Turns one raw source record into the fields to store.
///
/// `year` is the run's camp year for year-scoped entities and `None` for
/// global ones. A mapping error skips that record and counts as an error.
pub trait FieldMapper: Send + Sync {
    fn map(&self, raw: Fields, year: Option<i32>) -> Result<Fields, MapError>;
}

impl<F> FieldMapper for F
where
    F: Fn(Fields, Option<i32>) -> Result<Fields, MapError> + Send + Sync,
{
    fn map(&self, raw: Fields, year: Option<i32>) -> Result<Fields, MapError> {
        self(raw, year)
    }
}

/// Stores source fields as-is, stamping the run year on scoped records.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl FieldMapper for Passthrough {
    fn map(&self, mut raw: Fields, year: Option<i32>) -> Result<Fields, MapError> {
        if let Some(year) = year {
            raw.insert(SCOPE_FIELD.to_string(), Value::from(year));
        }
        Ok(raw)
    }
}

/// Keeps only the listed fields, failing when one of `required` is absent.
#[derive(Debug, Clone)]
pub struct Project {
    keep: Vec<String>,
    required: Vec<String>,
}

impl Project {
    pub fn new(keep: &[&str]) -> Self {
        Self {
            keep: keep.iter().map(|f| f.to_string()).collect(),
            required: Vec::new(),
        }
    }

    pub fn require(mut self, fields: &[&str]) -> Self {
        self.required = fields.iter().map(|f| f.to_string()).collect();
        self
    }
}

impl FieldMapper for Project {
    fn map(&self, raw: Fields, year: Option<i32>) -> Result<Fields, MapError> {
        if let Some(missing) = self
            .required
            .iter()
            .find(|f| raw.get(f.as_str()).is_none_or(Value::is_null))
        {
            return Err(MapError::MissingField(missing.clone()));
        }

        let projected = raw
            .into_iter()
            .filter(|(name, _)| self.keep.contains(name))
            .collect();
        Passthrough.map(projected, year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_passthrough_stamps_year_only_when_scoped() {
        let scoped = Passthrough.map(fields(json!({"id": 1})), Some(2025)).unwrap();
        assert_eq!(scoped["year"], json!(2025));

        let global = Passthrough.map(fields(json!({"id": 1})), None).unwrap();
        assert!(global.get("year").is_none());
    }

    #[test]
    fn test_project_keeps_and_requires() {
        let mapper = Project::new(&["id", "name"]).require(&["id"]);
        let mapped = mapper
            .map(fields(json!({"id": 3, "name": "Cabin 3", "internal": true})), Some(2024))
            .unwrap();
        assert_eq!(mapped.len(), 3);
        assert!(mapped.get("internal").is_none());

        let err = mapper.map(fields(json!({"id": null, "name": "x"})), None).unwrap_err();
        assert!(matches!(err, MapError::MissingField(f) if f == "id"));
    }

    #[test]
    fn test_closure_mapper() {
        let upper = |mut raw: Fields, _year: Option<i32>| {
            let name = raw
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| MapError::MissingField("name".into()))?
                .to_uppercase();
            raw.insert("name".into(), Value::from(name));
            Ok(raw)
        };
        let mapped = upper.map(fields(json!({"name": "lake"})), None).unwrap();
        assert_eq!(mapped["name"], json!("LAKE"));
    }
}
