//! Canonical JSON and SHA-256 digests (RFC 8785-class).
//!
//! Object keys are emitted sorted, integer-valued floats are written as
//! integers and non-finite numbers are rejected. Two specs that differ only
//! in key order or `1.0` vs `1` share a digest.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use super::error::{KilnError, Result};

fn canonicalize(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(canonicalize)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Number(n) => canonical_number(n).map(Value::Number),
        other => Ok(other.clone()),
    }
}

fn canonical_number(n: &Number) -> Result<Number> {
    if n.is_i64() || n.is_u64() {
        return Ok(n.clone());
    }
    let Some(f) = n.as_f64() else {
        return Ok(n.clone());
    };
    if !f.is_finite() {
        return Err(KilnError::InvalidSpec(
            "non-finite number in canonical JSON".to_string(),
        ));
    }
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Ok(Number::from(f as i64))
    } else {
        Ok(n.clone())
    }
}

/// Compact canonical serialization of `value`.
pub fn canonical_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&canonicalize(value)?)?)
}

/// Lowercase hex SHA-256 of the canonical serialization.
pub fn compute_digest(value: &Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}
