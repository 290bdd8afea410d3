//! Chart payload types, tool declaration and system directive

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Name of the single chart-generating tool offered to the model
pub const CHART_TOOL_NAME: &str = "generate_graph_data";

/// Fixed instruction sent with every generation request
pub const SYSTEM_DIRECTIVE: &str = r#"You are a financial data visualization assistant for wealth-management professionals.

Response style:
- Answer in well-structured markdown: short paragraphs, headings and bullet lists where they help.
- Be precise with numbers, units and dates. Never invent data that was not provided or retrieved.
- When portfolio data or live search results are included in the message, ground your answer in them.

Charting:
When a visualization would help, call the generate_graph_data tool. Pick the chart type that fits the data:
- bar: compare discrete categories (holdings by value, sector totals).
- multiBar: compare several series across the same categories (this year vs last year per sector).
- line: show a trend over time (price history, cumulative returns).
- pie: show parts of a whole (asset allocation, sector weights). Use a single numeric series.
- area: show magnitude over time for one series (portfolio value over time).
- stackedArea: show how several series contribute to a total over time.

Tool rules:
- `data` must be an array of flat records, never a string.
- Every key in `chartConfig` must be a numeric field present in the records.
- Set `config.xAxisKey` to the record field holding the category or time label.

Never mention, narrate or announce that you are calling the charting tool. Just write your answer; the chart is rendered alongside it."#;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChartType {
    Bar,
    MultiBar,
    Line,
    Pie,
    Area,
    StackedArea,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trend {
    pub percentage: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_axis_key: Option<String>,
}

/// Display settings for one data series
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeriesConfig {
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacked: Option<bool>,
    /// Palette reference, e.g. `hsl(var(--chart-1))`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// One data row: field name to scalar value
pub type Record = Map<String, Value>;

/// Chart payload the rendering layer can use without further checks.
///
/// Built once per request from the model's tool invocation and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedChartPayload {
    pub chart_type: ChartType,
    pub config: ChartConfig,
    pub data: Vec<Record>,
    pub chart_config: IndexMap<String, SeriesConfig>,
}

/// A tool the model may invoke
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// Declaration of the chart tool as JSON Schema.
pub fn chart_tool() -> ToolDefinition {
    ToolDefinition {
        name: CHART_TOOL_NAME,
        description: "Generates structured chart data for financial visualizations. \
                      Use it whenever a chart would clarify the answer.",
        parameters: json!({
            "type": "object",
            "properties": {
                "chartType": {
                    "type": "string",
                    "enum": ["bar", "multiBar", "line", "pie", "area", "stackedArea"],
                    "description": "Type of chart to render"
                },
                "config": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "trend": {
                            "type": "object",
                            "properties": {
                                "percentage": { "type": "number" },
                                "direction": { "type": "string", "enum": ["up", "down"] }
                            },
                            "required": ["percentage", "direction"]
                        },
                        "footer": { "type": "string" },
                        "totalLabel": { "type": "string" },
                        "xAxisKey": { "type": "string" }
                    },
                    "required": ["title", "description"]
                },
                "data": {
                    "type": "array",
                    "description": "Array of flat records, one per category or point in time",
                    "items": {
                        "type": "object",
                        "additionalProperties": { "type": ["string", "number"] }
                    }
                },
                "chartConfig": {
                    "type": "object",
                    "description": "Map from series key (a numeric field in data) to {label, stacked?}",
                    "additionalProperties": {
                        "type": "object",
                        "properties": {
                            "label": { "type": "string" },
                            "stacked": { "type": "boolean" }
                        },
                        "required": ["label"]
                    }
                }
            },
            "required": ["chartType", "config", "data", "chartConfig"]
        }),
    }
}
