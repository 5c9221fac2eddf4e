// Token coercion: raw TSV text to typed values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{IngestError, Result};
use crate::normalize::TypedRecord;
use crate::schema::FieldKind;
use crate::source::{SourceColumn, SourceRecord};

/// Null marker used by the published dumps
pub const DEFAULT_NULL_SENTINEL: &str = "\\N";

const TRUE_TOKENS: [&str; 5] = ["1", "true", "t", "yes", "y"];
const FALSE_TOKENS: [&str; 5] = ["0", "false", "f", "no", "n"];

/// A coerced field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Text form used for key lookups; `None` for nulls
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Text(s) => f.write_str(s),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

/// Why a token could not be coerced to a numeric kind
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoercionError {
    #[error("{token:?} is not an integer")]
    NotInteger { token: String },

    #[error("{token:?} does not fit in a {bits}-bit integer")]
    OutOfRange { token: String, bits: u8 },

    #[error("{token:?} is not a number")]
    NotFloat { token: String },
}

/// What to do with a numeric token that does not parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegerPolicy {
    /// Fail the job with the offending line and column
    #[default]
    Strict,
    /// Drop the record and count it
    SkipRow,
    /// Store null and log a warning
    Null,
}

impl FromStr for IntegerPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "strict" => Ok(IntegerPolicy::Strict),
            "skip_row" | "skip" => Ok(IntegerPolicy::SkipRow),
            "null" => Ok(IntegerPolicy::Null),
            other => Err(format!(
                "unknown integer policy '{}', expected strict, skip-row or null",
                other
            )),
        }
    }
}

impl fmt::Display for IntegerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegerPolicy::Strict => f.write_str("strict"),
            IntegerPolicy::SkipRow => f.write_str("skip-row"),
            IntegerPolicy::Null => f.write_str("null"),
        }
    }
}

/// Coerce one raw token to `kind`
///
/// The null sentinel is null for every kind. Booleans that match neither
/// token set become null with a single warning; integers and floats that do
/// not parse are returned as errors for the caller's policy to handle.
pub fn coerce(
    token: &str,
    kind: FieldKind,
    null_sentinel: &str,
) -> std::result::Result<Value, CoercionError> {
    if token == null_sentinel {
        return Ok(Value::Null);
    }

    match kind {
        FieldKind::Text | FieldKind::Categorical => Ok(Value::Text(token.to_string())),
        FieldKind::SmallInt | FieldKind::Int | FieldKind::BigInt => {
            let n: i64 = token.parse().map_err(|_| CoercionError::NotInteger {
                token: token.to_string(),
            })?;
            let bits = kind.int_bits().unwrap_or(64);
            let fits = match bits {
                16 => i16::try_from(n).is_ok(),
                32 => i32::try_from(n).is_ok(),
                _ => true,
            };
            if fits {
                Ok(Value::Int(n))
            } else {
                Err(CoercionError::OutOfRange {
                    token: token.to_string(),
                    bits,
                })
            }
        }
        FieldKind::Float => match token.parse::<f64>() {
            Ok(x) if x.is_finite() => Ok(Value::Float(x)),
            _ => Err(CoercionError::NotFloat {
                token: token.to_string(),
            }),
        },
        FieldKind::Boolean => Ok(parse_bool(token).map(Value::Bool).unwrap_or_else(|| {
            warn!(token, "Unrecognised boolean, storing null");
            Value::Null
        })),
    }
}

fn parse_bool(token: &str) -> Option<bool> {
    let lower = token.to_ascii_lowercase();
    if TRUE_TOKENS.contains(&lower.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&lower.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Applies [`coerce`] across a record according to an [`IntegerPolicy`]
#[derive(Debug, Clone)]
pub struct Coercer {
    null_sentinel: String,
    policy: IntegerPolicy,
}

impl Coercer {
    pub fn new(null_sentinel: impl Into<String>, policy: IntegerPolicy) -> Self {
        Self {
            null_sentinel: null_sentinel.into(),
            policy,
        }
    }

    pub fn policy(&self) -> IntegerPolicy {
        self.policy
    }

    /// Coerce every declared column of `record`
    ///
    /// Returns `Ok(None)` when the record is dropped under
    /// [`IntegerPolicy::SkipRow`].
    pub fn coerce_record(
        &self,
        record: &SourceRecord,
        columns: &[SourceColumn],
    ) -> Result<Option<TypedRecord>> {
        let mut values = Vec::with_capacity(columns.len());

        for (column, token) in columns.iter().zip(&record.tokens) {
            match coerce(token, column.kind, &self.null_sentinel) {
                Ok(value) => values.push(value),
                Err(e) => match self.policy {
                    IntegerPolicy::Strict => {
                        return Err(IngestError::Coercion {
                            line: record.line,
                            column: column.name.to_string(),
                            source: e,
                        })
                    }
                    IntegerPolicy::SkipRow => {
                        warn!(line = record.line, column = column.name, error = %e, "Skipping row");
                        return Ok(None);
                    }
                    IntegerPolicy::Null => {
                        warn!(line = record.line, column = column.name, error = %e, "Storing null");
                        values.push(Value::Null);
                    }
                },
            }
        }

        Ok(Some(TypedRecord::new(values)))
    }
}
