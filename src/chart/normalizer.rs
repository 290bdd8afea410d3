//! Tool-output normalizer
//!
//! Turns the raw input of a chart tool invocation into a
//! [`NormalizedChartPayload`]:
//! 1. repair stringified `data` (see [`compat`](super::compat))
//! 2. validate `chartType` and `data`
//! 3. reshape pie records to `{segment, value}`
//! 4. assign palette slots to series in declaration order

use super::compat::{self, SAMPLE_CHARS};
use super::schema::{ChartConfig, ChartType, NormalizedChartPayload, Record, SeriesConfig};
use crate::error::{truncate_chars, PipelineError};
use crate::Result;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

const PIE_SEGMENT_KEY: &str = "segment";
const PIE_VALUE_KEY: &str = "value";
const PIE_SEGMENT_FALLBACKS: [&str; 3] = ["segment", "category", "name"];

/// Validate and repair a chart tool invocation's input.
pub fn normalize(tool_input: &Value) -> Result<NormalizedChartPayload> {
    let input = tool_input
        .as_object()
        .ok_or_else(|| invalid("input", tool_input))?;

    let data = match input.get("data") {
        Some(raw) => compat::decode_stringified("data", raw.clone())?,
        None => return Err(missing("data")),
    };

    let chart_type: ChartType = match input.get("chartType") {
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|_| invalid("chartType", raw))?,
        None => return Err(missing("chartType")),
    };

    let records = into_records(&data)?;

    let mut config: ChartConfig = match input.get("config") {
        Some(Value::Null) | None => ChartConfig::default(),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|_| invalid("config", raw))?,
    };

    let mut series: IndexMap<String, SeriesConfig> = match input.get("chartConfig") {
        Some(Value::Null) | None => IndexMap::new(),
        Some(raw) => {
            serde_json::from_value(raw.clone()).map_err(|_| invalid("chartConfig", raw))?
        }
    };

    let data = if chart_type == ChartType::Pie {
        let reshaped = reshape_pie(records, &config, &series);
        config.x_axis_key = Some(PIE_SEGMENT_KEY.to_string());
        series = pie_series(series);
        reshaped
    } else {
        drop_orphan_series(&mut series, &records);
        records
    };

    assign_colors(&mut series);

    debug!(
        ?chart_type,
        records = data.len(),
        series = series.len(),
        "Chart payload normalized"
    );

    Ok(NormalizedChartPayload {
        chart_type,
        config,
        data,
        chart_config: series,
    })
}

fn into_records(data: &Value) -> Result<Vec<Record>> {
    let items = data.as_array().ok_or_else(|| invalid("data", data))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(record) => Ok(record.clone()),
            other => Err(invalid(&format!("data[{}]", i), other)),
        })
        .collect()
}

/// Map every record to exactly `{segment, value}`.
fn reshape_pie(
    records: Vec<Record>,
    config: &ChartConfig,
    series: &IndexMap<String, SeriesConfig>,
) -> Vec<Record> {
    let segment_key = config.x_axis_key.as_deref().unwrap_or(PIE_SEGMENT_KEY);
    let value_key = series.keys().next().map(String::as_str);

    records
        .into_iter()
        .map(|record| {
            let segment = record
                .get(segment_key)
                .or_else(|| PIE_SEGMENT_FALLBACKS.iter().find_map(|k| record.get(*k)))
                .cloned()
                .unwrap_or(Value::Null);

            let value = value_key
                .and_then(|k| record.get(k))
                .or_else(|| record.get(PIE_VALUE_KEY))
                .cloned()
                .unwrap_or(Value::Null);

            let mut reshaped = Record::new();
            reshaped.insert(PIE_SEGMENT_KEY.to_string(), segment);
            reshaped.insert(PIE_VALUE_KEY.to_string(), value);
            reshaped
        })
        .collect()
}

/// A pie carries one series, stored under `value` after the reshape.
fn pie_series(series: IndexMap<String, SeriesConfig>) -> IndexMap<String, SeriesConfig> {
    if series.len() > 1 {
        warn!(
            dropped = series.len() - 1,
            "Pie chart keeps only its first series"
        );
    }

    let config = series
        .into_iter()
        .next()
        .map(|(key, mut config)| {
            if config.label.trim().is_empty() {
                config.label = key;
            }
            config
        })
        .unwrap_or_else(|| SeriesConfig {
            label: PIE_VALUE_KEY.to_string(),
            stacked: None,
            color: None,
        });

    IndexMap::from([(PIE_VALUE_KEY.to_string(), config)])
}

/// Series must reference a field that at least one record carries.
fn drop_orphan_series(series: &mut IndexMap<String, SeriesConfig>, records: &[Record]) {
    series.retain(|key, _| {
        let present = records.iter().any(|r| r.contains_key(key));
        if !present {
            warn!(series = %key, "Dropping chart series with no matching data field");
        }
        present
    });
}

/// Palette slot N goes to the N-th declared series.
fn assign_colors(series: &mut IndexMap<String, SeriesConfig>) {
    for (slot, (key, config)) in series.iter_mut().enumerate() {
        if config.label.trim().is_empty() {
            config.label = key.clone();
        }
        config.color = Some(format!("hsl(var(--chart-{}))", slot + 1));
    }
}

fn missing(field: &str) -> PipelineError {
    PipelineError::ChartValidation {
        field: field.to_string(),
        sample: "missing".to_string(),
    }
}

fn invalid(field: &str, value: &Value) -> PipelineError {
    PipelineError::ChartValidation {
        field: field.to_string(),
        sample: truncate_chars(&value.to_string(), SAMPLE_CHARS),
    }
}
