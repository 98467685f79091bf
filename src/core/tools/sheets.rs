//! Google Sheets tools.
//!
//! Reads public (or API-key shared) spreadsheets through the Sheets v4 values
//! API. Besides plain header-plus-rows tables, two other layouts seen in
//! practice are handled: a markdown table pasted into a single column, and a
//! single row of alternating key/value cells.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use url::Url;

use super::{TOOL_HTTP_TIMEOUT, ToolBackend, ToolDefinition, ToolError, arg_str, require_arg};
use crate::core::integrations::config_str;

pub const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DEFAULT_RANGE: &str = "Sheet1";

static SEPARATOR_CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[:\-]+$").expect("separator pattern is valid"));

type Row = Map<String, Value>;

/// Parsed contents of a sheet range.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetData {
    Empty,
    Table {
        markdown: bool,
        headers: Vec<String>,
        items: Vec<Row>,
    },
    /// Headers-only sheet read as alternating key/value cells. Best effort:
    /// a header row without data looks the same.
    KeyValue(Row),
}

impl SheetData {
    fn items(&self) -> &[Row] {
        match self {
            SheetData::Table { items, .. } => items,
            _ => &[],
        }
    }

    fn to_json(&self) -> Value {
        match self {
            SheetData::Empty => json!({
                "message": "Sheet is empty",
                "headers": [],
                "items": [],
                "total_rows": 0,
            }),
            SheetData::Table {
                markdown,
                headers,
                items,
            } => {
                let format = if *markdown { "markdown_table" } else { "table" };
                json!({
                    "format": format,
                    "headers": headers,
                    "items": items,
                    "total_rows": items.len(),
                })
            }
            SheetData::KeyValue(data) => json!({
                "format": "key_value",
                "data": data,
                "message": "Sheet contains key-value pairs (metadata format)",
                "best_effort": true,
                "total_items": 1,
            }),
        }
    }
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn markdown_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed
        .strip_prefix('|')
        .and_then(|s| s.strip_suffix('|'))
        .unwrap_or(trimmed);
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

/// Parse a markdown table pasted into the first column. `None` when the range
/// does not look like one or has no data rows.
pub fn parse_markdown_table(rows: &[Vec<String>]) -> Option<SheetData> {
    let first = rows.first()?.first()?;
    if !(first.starts_with('|') && first.ends_with('|')) {
        return None;
    }

    let mut headers: Vec<String> = Vec::new();
    let mut items = Vec::new();
    for line in rows.iter().filter_map(|r| r.first()) {
        if !line.starts_with('|') {
            continue;
        }
        let cells = markdown_cells(line);
        let is_separator = cells
            .iter()
            .filter(|c| !c.is_empty())
            .all(|c| SEPARATOR_CELL.is_match(c));
        if is_separator {
            continue;
        }
        if headers.is_empty() {
            headers = cells;
            continue;
        }
        let item: Row = headers
            .iter()
            .zip(cells.iter())
            .filter(|(h, _)| !h.is_empty())
            .map(|(h, c)| (h.clone(), Value::String(c.clone())))
            .collect();
        if !item.is_empty() {
            items.push(item);
        }
    }

    if headers.is_empty() || items.is_empty() {
        return None;
    }
    Some(SheetData::Table {
        markdown: true,
        headers,
        items,
    })
}

/// Interpret raw sheet values.
pub fn parse_sheet(values: &[Vec<String>]) -> SheetData {
    if values.is_empty() {
        return SheetData::Empty;
    }
    if let Some(table) = parse_markdown_table(values) {
        return table;
    }

    let header_idx = values
        .iter()
        .position(|row| row.iter().any(|c| !c.trim().is_empty()))
        .unwrap_or(0);
    let headers = &values[header_idx];
    let rows = &values[header_idx + 1..];

    if headers.len() >= 2 && rows.is_empty() {
        let pairs: Row = headers
            .chunks(2)
            .filter(|pair| pair.len() == 2 && !pair[0].is_empty())
            .map(|pair| (pair[0].clone(), Value::String(pair[1].clone())))
            .collect();
        if !pairs.is_empty() {
            return SheetData::KeyValue(pairs);
        }
    }

    let items = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.is_empty())
                .map(|(i, h)| (h.clone(), Value::String(row.get(i).cloned().unwrap_or_default())))
                .collect::<Row>()
        })
        .filter(|item| !item.is_empty())
        .collect();

    SheetData::Table {
        markdown: false,
        headers: headers.iter().filter(|h| !h.is_empty()).cloned().collect(),
        items,
    }
}

fn item_values(item: &Row) -> impl Iterator<Item = String> + '_ {
    item.values().map(|v| cell_text(v).to_lowercase())
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Spreadsheet tools backed by the `google_sheets` integration.
pub struct GoogleSheetsTools {
    client: reqwest::Client,
    api_key: String,
    default_spreadsheet_id: Option<String>,
    base_url: String,
}

impl GoogleSheetsTools {
    pub fn new(api_key: impl Into<String>, default_spreadsheet_id: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(TOOL_HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            default_spreadsheet_id,
            base_url: SHEETS_API_URL.to_string(),
        }
    }

    /// Build from an integration config (`api_key`, optional `spreadsheet_id`).
    pub fn from_integration(config: &Value) -> Option<Self> {
        let api_key = config_str(config, "api_key")?;
        Some(Self::new(
            api_key,
            config_str(config, "spreadsheet_id").map(str::to_string),
        ))
    }

    /// Point at a different API root (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn spreadsheet_id<'a>(&'a self, arguments: &'a Value) -> Result<&'a str, ToolError> {
        arg_str(arguments, "spreadsheet_id")
            .or(self.default_spreadsheet_id.as_deref())
            .ok_or_else(|| {
                ToolError::InvalidArgument(
                    "No spreadsheet ID provided. Please specify the spreadsheet_id.".to_string(),
                )
            })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ToolError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ToolError::ExecutionFailed(format!("Invalid Sheets API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ToolError::ExecutionFailed("Invalid Sheets API URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn fetch(&self, arguments: &Value) -> Result<SheetData, ToolError> {
        let spreadsheet_id = self.spreadsheet_id(arguments)?;
        let range = arg_str(arguments, "range").unwrap_or(DEFAULT_RANGE);
        let url = self.url(&[spreadsheet_id, "values", range])?;

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(ToolError::NotFound(
                    "Spreadsheet not found or not accessible. Make sure the sheet is public or shared."
                        .to_string(),
                ));
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(
                    status = status.as_u16(),
                    response = %body.chars().take(500).collect::<String>(),
                    "Sheets API error"
                );
                return Err(ToolError::ExecutionFailed(format!(
                    "Failed to read sheet: {}",
                    status.as_u16()
                )));
            }
        }

        let body: ValuesResponse = response.json().await?;
        let values: Vec<Vec<String>> = body
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        Ok(parse_sheet(&values))
    }

    async fn get_data(&self, arguments: &Value) -> Result<Value, ToolError> {
        Ok(self.fetch(arguments).await?.to_json())
    }

    async fn search(&self, arguments: &Value) -> Result<Value, ToolError> {
        let query = require_arg(arguments, "query")?;
        let data = self.fetch(arguments).await?;
        let needle = query.to_lowercase();
        let matches: Vec<&Row> = data
            .items()
            .iter()
            .filter(|item| item_values(item).any(|v| v.contains(&needle)))
            .collect();
        Ok(json!({
            "query": query,
            "matches": matches,
            "total_matches": matches.len(),
        }))
    }

    async fn get_item(&self, arguments: &Value) -> Result<Value, ToolError> {
        let item_name = require_arg(arguments, "item_name")?;
        let data = self.fetch(arguments).await?;
        let needle = item_name.to_lowercase();

        if let Some(item) = data
            .items()
            .iter()
            .find(|item| item_values(item).any(|v| v == needle))
        {
            return Ok(json!({"found": true, "item": item}));
        }
        if let Some(item) = data
            .items()
            .iter()
            .find(|item| item_values(item).any(|v| v.contains(&needle)))
        {
            return Ok(json!({"found": true, "item": item, "partial_match": true}));
        }
        Ok(json!({
            "found": false,
            "message": format!("No item found matching '{item_name}'"),
        }))
    }

    async fn list_sheets(&self, arguments: &Value) -> Result<Value, ToolError> {
        let spreadsheet_id = self.spreadsheet_id(arguments)?;
        let mut url = self.url(&[spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");

        let response = self.client.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(ToolError::ExecutionFailed(format!(
                "Failed to get spreadsheet info: {}",
                response.status().as_u16()
            )));
        }
        let body: SpreadsheetResponse = response.json().await?;
        let sheets: Vec<String> = body.sheets.into_iter().map(|s| s.properties.title).collect();
        Ok(json!({"sheets": sheets, "total_sheets": sheets.len()}))
    }
}

fn spreadsheet_id_property(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

#[async_trait]
impl ToolBackend for GoogleSheetsTools {
    fn name(&self) -> &'static str {
        "google_sheets"
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let id_prop = spreadsheet_id_property(
            "Spreadsheet ID from the sheet URL. Optional when a default is configured.",
        );
        let range_prop = json!({
            "type": "string",
            "description": "Range to read, e.g. 'Sheet1', 'Menu!A:E'. Defaults to 'Sheet1'."
        });
        vec![
            ToolDefinition::new(
                "sheets_get_data",
                "Read tabular data such as menus, product lists or prices from a Google Sheet.",
                json!({
                    "type": "object",
                    "properties": {"spreadsheet_id": id_prop, "range": range_prop},
                    "required": []
                }),
            ),
            ToolDefinition::new(
                "sheets_search",
                "Find rows in a Google Sheet containing a keyword, e.g. a dish, category or product.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Search term, e.g. 'vegetarian'"},
                        "spreadsheet_id": id_prop,
                        "range": range_prop
                    },
                    "required": ["query"]
                }),
            ),
            ToolDefinition::new(
                "sheets_get_item",
                "Get one row from a Google Sheet by item name. Exact matches win over partial ones.",
                json!({
                    "type": "object",
                    "properties": {
                        "item_name": {"type": "string", "description": "Item name, e.g. 'Caesar Salad'"},
                        "spreadsheet_id": id_prop,
                        "range": range_prop
                    },
                    "required": ["item_name"]
                }),
            ),
            ToolDefinition::new(
                "sheets_list_sheets",
                "List the tabs of a Google Spreadsheet to discover what data it holds.",
                json!({
                    "type": "object",
                    "properties": {"spreadsheet_id": id_prop},
                    "required": []
                }),
            ),
        ]
    }

    async fn execute(&self, tool: &str, arguments: &Value) -> Result<Value, ToolError> {
        match tool {
            "sheets_get_data" => self.get_data(arguments).await,
            "sheets_search" => self.search(arguments).await,
            "sheets_get_item" => self.get_item(arguments).await,
            "sheets_list_sheets" => self.list_sheets(arguments).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}
