//! Chart tool contract and output normalization
//!
//! The model is offered one charting tool. Whatever it emits is validated,
//! repaired and reshaped here before anything downstream sees it.

pub mod compat;
pub mod normalizer;
pub mod schema;

pub use normalizer::normalize;
pub use schema::{
    chart_tool, ChartConfig, ChartType, NormalizedChartPayload, Record, SeriesConfig,
    ToolDefinition, Trend, TrendDirection, CHART_TOOL_NAME, SYSTEM_DIRECTIVE,
};
