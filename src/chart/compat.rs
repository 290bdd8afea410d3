//! Compatibility shim for stringified `data` fields.
//!
//! Some model responses carry the chart `data` array as a JSON string, and
//! occasionally as a string holding another JSON string. This module undoes
//! that encoding at the input boundary only. Drop it once upstream emits
//! native arrays consistently.

use crate::error::{truncate_chars, PipelineError};
use crate::Result;
use serde_json::Value;
use tracing::debug;

/// Parse passes attempted before giving up on a string value
const MAX_DECODE_PASSES: usize = 2;

/// Characters of the offending value kept in diagnostics
pub const SAMPLE_CHARS: usize = 100;

/// Decode a possibly (double-)stringified value. Non-strings pass through.
pub fn decode_stringified(field: &str, value: Value) -> Result<Value> {
    let mut current = value;

    for pass in 0..MAX_DECODE_PASSES {
        let Value::String(raw) = &current else {
            return Ok(current);
        };

        debug!(field, pass = pass + 1, "Decoding stringified tool field");

        current = serde_json::from_str(raw).map_err(|e| PipelineError::ChartValidation {
            field: field.to_string(),
            sample: format!("{} ({})", truncate_chars(raw, SAMPLE_CHARS), e),
        })?;
    }

    match current {
        Value::String(raw) => Err(PipelineError::ChartValidation {
            field: field.to_string(),
            sample: format!(
                "still a string after {} decode passes: {}",
                MAX_DECODE_PASSES,
                truncate_chars(&raw, SAMPLE_CHARS)
            ),
        }),
        other => Ok(other),
    }
}
