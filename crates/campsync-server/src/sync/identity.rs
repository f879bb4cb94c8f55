//! Composite identity keys
//!
//! A [`CompositeKey`] names one source record inside one reconciliation run:
//! the natural identifier(s) from the source system plus an optional scope
//! (the camp year). Keys stay structured for their whole life inside the
//! engine and are only rendered to a string at the storage boundary, so the
//! scoped form can never be assembled by hand in two different places.
//!
//! Rendered form: parts joined by `:` followed by `|<scope>` for scoped keys,
//! e.g. `100|2025` or `4411:72|2025`. Global entities render as the bare
//! natural key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Separates the natural key from the scope discriminator
pub const SCOPE_SEPARATOR: char = '|';

/// Separates the components of a multi-part natural key
pub const PART_SEPARATOR: char = ':';

/// Field that carries the scope discriminator on stored and mapped records
pub const SCOPE_FIELD: &str = "year";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Composite key needs at least one natural key part")]
    Empty,
    #[error("Natural key part must not be blank")]
    BlankPart,
    #[error("Natural key part '{0}' contains a reserved separator")]
    ReservedSeparator(String),
    #[error("Invalid scope '{0}'")]
    InvalidScope(String),
}

/// One component of a natural key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Id(i64),
    Text(String),
}

impl KeyPart {
    /// Interpret a raw field value as a key part.
    ///
    /// Integral numbers and numeric strings both become [`KeyPart::Id`] so
    /// that `100`, `100.0` and `"100"` identify the same entity. Blank strings,
    /// nulls, booleans and structured values are not identifiers.
    pub fn from_value(value: &Value) -> Option<KeyPart> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(KeyPart::Id(i))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| KeyPart::Id(f as i64))
                }
            },
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else if let Ok(i) = trimmed.parse::<i64>() {
                    Some(KeyPart::Id(i))
                } else {
                    Some(KeyPart::Text(trimmed.to_string()))
                }
            },
            _ => None,
        }
    }

    /// Canonical form: trimmed text, and numeric text as [`KeyPart::Id`].
    ///
    /// Two parts that would render the same must compare equal.
    fn normalized(self) -> KeyPart {
        match self {
            KeyPart::Text(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<i64>() {
                    Ok(i) => KeyPart::Id(i),
                    Err(_) if trimmed.len() == s.len() => KeyPart::Text(s),
                    Err(_) => KeyPart::Text(trimmed.to_string()),
                }
            },
            id => id,
        }
    }

    fn validate(&self) -> Result<(), KeyError> {
        match self {
            KeyPart::Id(_) => Ok(()),
            KeyPart::Text(s) if s.trim().is_empty() => Err(KeyError::BlankPart),
            KeyPart::Text(s) if s.contains(SCOPE_SEPARATOR) || s.contains(PART_SEPARATOR) => {
                Err(KeyError::ReservedSeparator(s.clone()))
            },
            KeyPart::Text(_) => Ok(()),
        }
    }
}

impl From<i64> for KeyPart {
    fn from(id: i64) -> Self {
        KeyPart::Id(id)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Id(id) => write!(f, "{}", id),
            KeyPart::Text(s) => f.write_str(s),
        }
    }
}

/// Identity of one record within one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeKey {
    parts: Vec<KeyPart>,
    scope: Option<i32>,
}

impl CompositeKey {
    /// Build a key from natural key parts and an optional scope.
    ///
    /// Parts are normalized first, so `Text("12")` and `Id(12)` are the same key.
    pub fn new(parts: Vec<KeyPart>, scope: Option<i32>) -> Result<Self, KeyError> {
        if parts.is_empty() {
            return Err(KeyError::Empty);
        }
        let parts: Vec<KeyPart> = parts.into_iter().map(KeyPart::normalized).collect();
        for part in &parts {
            part.validate()?;
        }
        Ok(Self { parts, scope })
    }

    /// Key for an entity identified by a single integer id.
    pub fn id(id: i64, scope: Option<i32>) -> Self {
        Self {
            parts: vec![KeyPart::Id(id)],
            scope,
        }
    }

    /// Key for an entity identified by an ordered tuple of integer ids,
    /// e.g. (person, session).
    pub fn ids(ids: &[i64], scope: Option<i32>) -> Result<Self, KeyError> {
        Self::new(ids.iter().copied().map(KeyPart::Id).collect(), scope)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    pub fn scope(&self) -> Option<i32> {
        self.scope
    }

    /// The same natural key under a different scope.
    pub fn with_scope(&self, scope: Option<i32>) -> Self {
        Self {
            parts: self.parts.clone(),
            scope,
        }
    }

    /// Render for storage. Equal keys always render identically.
    pub fn to_storage_key(&self) -> String {
        self.to_string()
    }
}

/// Build a composite key; when `scope` is `None` the key is the bare natural key.
pub fn build_key(parts: &[KeyPart], scope: Option<i32>) -> Result<CompositeKey, KeyError> {
    CompositeKey::new(parts.to_vec(), scope)
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", PART_SEPARATOR)?;
            }
            write!(f, "{}", part)?;
        }
        if let Some(scope) = self.scope {
            write!(f, "{}{}", SCOPE_SEPARATOR, scope)?;
        }
        Ok(())
    }
}

impl FromStr for CompositeKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (natural, scope) = match s.split_once(SCOPE_SEPARATOR) {
            Some((natural, scope)) => {
                let scope = scope
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| KeyError::InvalidScope(scope.to_string()))?;
                (natural, Some(scope))
            },
            None => (s, None),
        };

        let parts = natural
            .split(PART_SEPARATOR)
            .map(|raw| KeyPart::from_value(&Value::String(raw.to_string())).ok_or(KeyError::BlankPart))
            .collect::<Result<Vec<_>, _>>()?;

        CompositeKey::new(parts, scope)
    }
}

/// Read a scope value (year) from a field value.
///
/// Accepts `2025`, `2025.0` and `"2025"` alike.
pub fn scope_from_value(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i32::try_from(i).ok(),
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() <= f64::from(i32::MAX))
                .map(|f| f as i32),
        },
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Describes how to derive a [`CompositeKey`] from a flat record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    /// Natural key fields, in key order
    pub fields: Vec<String>,
    /// Whether the key carries the record's `year` as scope
    pub scoped: bool,
}

impl KeySpec {
    pub fn scoped(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            scoped: true,
        }
    }

    pub fn global(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            scoped: false,
        }
    }

    /// Extract the key from a record's fields.
    ///
    /// Returns `None` when a key field is missing or unusable, or when a
    /// scoped record has no readable year.
    pub fn extract(&self, fields: &Map<String, Value>) -> Option<CompositeKey> {
        let parts = self
            .fields
            .iter()
            .map(|name| fields.get(name).and_then(KeyPart::from_value))
            .collect::<Option<Vec<_>>>()?;

        let scope = if self.scoped {
            Some(fields.get(SCOPE_FIELD).and_then(scope_from_value)?)
        } else {
            None
        };

        CompositeKey::new(parts, scope).ok()
    }
}
