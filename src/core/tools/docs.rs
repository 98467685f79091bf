//! Google Docs knowledge-base tools.
//!
//! The document is exported as plain text through the Drive API and split into
//! sections on markdown headings, ALL CAPS lines, and single-word `Label:`
//! lines. Text before the first heading belongs to "Introduction".

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use url::Url;

use super::{TOOL_HTTP_TIMEOUT, ToolBackend, ToolDefinition, ToolError, arg_str, require_arg};
use crate::core::integrations::config_str;

pub const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

const DEFAULT_SECTION: &str = "Introduction";
const MIN_CAPS_HEADING_CHARS: usize = 3;
const MIN_LABEL_HEADING_CHARS: usize = 3;
const SECTION_PREVIEW_CHARS: usize = 300;
const MAX_LINE_MATCHES: usize = 10;
const CONTEXT_LINES: usize = 2;

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}

fn heading_name(line: &str) -> Option<String> {
    let stripped = line.trim();

    if stripped.starts_with('#') {
        let name = stripped.trim_start_matches('#').trim();
        return (!name.is_empty()).then(|| name.to_string());
    }

    let letters: Vec<char> = stripped.chars().filter(|c| *c != ' ').collect();
    if stripped.chars().count() >= MIN_CAPS_HEADING_CHARS
        && !letters.is_empty()
        && letters.iter().all(|c| c.is_alphabetic() && !c.is_lowercase())
        && letters.iter().any(|c| c.is_uppercase())
    {
        return Some(title_case(stripped));
    }

    if stripped.ends_with(':')
        && stripped.chars().count() >= MIN_LABEL_HEADING_CHARS
        && !stripped.contains(' ')
    {
        let name = stripped.trim_end_matches(':');
        return (!name.is_empty()).then(|| name.to_string());
    }

    None
}

fn commit_section(sections: &mut Vec<(String, String)>, name: &str, body: &[&str]) {
    if body.is_empty() {
        return;
    }
    let text = body.join("\n").trim().to_string();
    match sections.iter_mut().find(|(n, _)| n.as_str() == name) {
        Some(existing) => existing.1 = text,
        None => sections.push((name.to_string(), text)),
    }
}

/// Split document text into (heading, body) sections in document order. A
/// heading seen twice keeps its first position and its last body.
pub fn parse_sections(content: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut current = DEFAULT_SECTION.to_string();
    let mut body: Vec<&str> = Vec::new();

    for line in content.split('\n') {
        match heading_name(line) {
            Some(name) => {
                commit_section(&mut sections, &current, &body);
                current = name;
                body.clear();
            }
            None => body.push(line),
        }
    }
    commit_section(&mut sections, &current, &body);
    sections
}

fn preview(text: &str) -> String {
    if text.chars().count() > SECTION_PREVIEW_CHARS {
        let cut: String = text.chars().take(SECTION_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// Knowledge-base tools backed by the `google_docs` integration.
pub struct GoogleDocsTools {
    client: reqwest::Client,
    api_key: String,
    default_document_id: Option<String>,
    base_url: String,
}

impl GoogleDocsTools {
    pub fn new(api_key: impl Into<String>, default_document_id: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(TOOL_HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            default_document_id,
            base_url: DRIVE_FILES_URL.to_string(),
        }
    }

    /// Build from an integration config (`api_key`, optional `document_id`).
    pub fn from_integration(config: &Value) -> Option<Self> {
        let api_key = config_str(config, "api_key")?;
        Some(Self::new(
            api_key,
            config_str(config, "document_id").map(str::to_string),
        ))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Plain-text document content; empty when the document is blank.
    async fn fetch(&self, arguments: &Value) -> Result<String, ToolError> {
        let document_id = arg_str(arguments, "document_id")
            .or(self.default_document_id.as_deref())
            .ok_or_else(|| {
                ToolError::InvalidArgument(
                    "No document ID provided. Please specify the document_id.".to_string(),
                )
            })?;

        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ToolError::ExecutionFailed(format!("Invalid Drive API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ToolError::ExecutionFailed("Invalid Drive API URL".to_string()))?
            .pop_if_empty()
            .extend([document_id, "export"]);
        url.query_pairs_mut()
            .append_pair("mimeType", "text/plain")
            .append_pair("key", &self.api_key);

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(ToolError::NotFound(
                    "Document not found or not accessible. Make sure the document is shared as \
                     'Anyone with the link can view'."
                        .to_string(),
                ));
            }
            StatusCode::FORBIDDEN => {
                return Err(ToolError::PermissionDenied(
                    "Access denied. Please ensure the Google Doc is shared publicly \
                     ('Anyone with the link can view')."
                        .to_string(),
                ));
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(
                    status = status.as_u16(),
                    response = %body.chars().take(500).collect::<String>(),
                    "Drive API error"
                );
                return Err(ToolError::ExecutionFailed(format!(
                    "Failed to read document: {}",
                    status.as_u16()
                )));
            }
        }

        let content = response.text().await?;
        Ok(if content.trim().is_empty() {
            String::new()
        } else {
            content
        })
    }

    async fn get_knowledge(&self, arguments: &Value) -> Result<Value, ToolError> {
        let content = self.fetch(arguments).await?;
        if content.is_empty() {
            return Ok(json!({"message": "Document is empty", "content": "", "word_count": 0}));
        }
        let sections: Vec<String> = parse_sections(&content)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        Ok(json!({
            "content": content,
            "sections": sections,
            "word_count": content.split_whitespace().count(),
            "char_count": content.chars().count(),
        }))
    }

    async fn search(&self, arguments: &Value) -> Result<Value, ToolError> {
        let query = require_arg(arguments, "query")?;
        let content = self.fetch(arguments).await?;
        if content.is_empty() {
            return Ok(json!({"query": query, "matches": [], "message": "Document is empty"}));
        }

        let needle = query.to_lowercase();
        let lines: Vec<&str> = content.split('\n').collect();
        let line_matches: Vec<Value> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.to_lowercase().contains(&needle))
            .map(|(i, line)| {
                let start = i.saturating_sub(CONTEXT_LINES);
                let end = (i + CONTEXT_LINES + 1).min(lines.len());
                json!({
                    "line_number": i + 1,
                    "line": line.trim(),
                    "context": lines[start..end].join("\n").trim(),
                })
            })
            .collect();

        let section_matches: Vec<Value> = parse_sections(&content)
            .into_iter()
            .filter(|(name, body)| {
                name.to_lowercase().contains(&needle) || body.to_lowercase().contains(&needle)
            })
            .map(|(name, body)| json!({"section": name, "preview": preview(&body)}))
            .collect();

        Ok(json!({
            "query": query,
            "line_matches": line_matches.iter().take(MAX_LINE_MATCHES).collect::<Vec<_>>(),
            "section_matches": section_matches,
            "total_line_matches": line_matches.len(),
            "total_section_matches": section_matches.len(),
        }))
    }

    async fn get_section(&self, arguments: &Value) -> Result<Value, ToolError> {
        let section_name = require_arg(arguments, "section_name")?;
        let content = self.fetch(arguments).await?;
        if content.is_empty() {
            return Ok(json!({"found": false, "message": "Document is empty"}));
        }

        let sections = parse_sections(&content);
        let wanted = section_name.to_lowercase();
        let found = |name: &str, body: &str, partial: bool| {
            let mut result = json!({
                "found": true,
                "section_name": name,
                "content": body,
                "word_count": body.split_whitespace().count(),
            });
            if partial {
                result["partial_match"] = json!(true);
            }
            result
        };

        if let Some((name, body)) = sections.iter().find(|(n, _)| n.to_lowercase() == wanted) {
            return Ok(found(name, body, false));
        }
        if let Some((name, body)) = sections.iter().find(|(n, _)| {
            let n = n.to_lowercase();
            n.contains(&wanted) || wanted.contains(&n)
        }) {
            return Ok(found(name, body, true));
        }

        let available: Vec<&str> = sections.iter().map(|(n, _)| n.as_str()).collect();
        Ok(json!({
            "found": false,
            "message": format!("No section found matching '{section_name}'"),
            "available_sections": available,
        }))
    }
}

#[async_trait]
impl ToolBackend for GoogleDocsTools {
    fn name(&self) -> &'static str {
        "google_docs"
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let doc_prop = json!({
            "type": "string",
            "description": "Google Doc ID from the document URL. Optional when a default is configured."
        });
        vec![
            ToolDefinition::new(
                "docs_get_knowledge",
                "Fetch the whole knowledge-base document: business details, policies, FAQs \
                 and other reference material, as plain text.",
                json!({
                    "type": "object",
                    "properties": {"document_id": doc_prop},
                    "required": []
                }),
            ),
            ToolDefinition::new(
                "docs_search_knowledge",
                "Search the knowledge-base document for specific details such as opening hours, \
                 parking or a return policy.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Search term, e.g. 'parking'"},
                        "document_id": doc_prop
                    },
                    "required": ["query"]
                }),
            ),
            ToolDefinition::new(
                "docs_get_section",
                "Get one section of the knowledge-base document by its heading, e.g. 'Menu' or 'FAQ'.",
                json!({
                    "type": "object",
                    "properties": {
                        "section_name": {"type": "string", "description": "Section heading"},
                        "document_id": doc_prop
                    },
                    "required": ["section_name"]
                }),
            ),
        ]
    }

    async fn execute(&self, tool: &str, arguments: &Value) -> Result<Value, ToolError> {
        match tool {
            "docs_get_knowledge" => self.get_knowledge(arguments).await,
            "docs_search_knowledge" => self.search(arguments).await,
            "docs_get_section" => self.get_section(arguments).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOC: &str = "Welcome to Joe's Diner.\n\
                       # Hours\n\
                       Mon-Fri 9am to 5pm\n\
                       Closed on holidays\n\
                       PARKING INFO\n\
                       Free lot behind the building\n\
                       Menu:\n\
                       Burgers and fries\n\
                       Vegetarian options available";

    #[test]
    fn test_heading_detection() {
        assert_eq!(heading_name("## Opening Hours ").as_deref(), Some("Opening Hours"));
        assert_eq!(heading_name("OUR MENU").as_deref(), Some("Our Menu"));
        assert_eq!(heading_name("FAQ:").as_deref(), Some("FAQ"));
        assert_eq!(heading_name("Menu:").as_deref(), Some("Menu"));
        assert_eq!(heading_name("Note that:"), None);
        assert_eq!(heading_name("OK"), None);
        assert_eq!(heading_name("#"), None);
        assert_eq!(heading_name("Plain sentence."), None);
    }

    #[test]
    fn test_parse_sections() {
        let sections = parse_sections(DOC);
        let names: Vec<&str> = sections.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Introduction", "Hours", "Parking Info", "Menu"]);
        assert_eq!(sections[1].1, "Mon-Fri 9am to 5pm\nClosed on holidays");
    }

    #[test]
    fn test_preview_truncates() {
        let long = "a".repeat(400);
        assert_eq!(preview(&long).chars().count(), SECTION_PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }

    async fn server_with_doc(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc-1/export"))
            .and(query_param("mimeType", "text/plain"))
            .and(query_param("key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn tools(server: &MockServer) -> GoogleDocsTools {
        GoogleDocsTools::new("k", Some("doc-1".into())).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_search_returns_lines_and_sections() {
        let server = server_with_doc(DOC).await;
        let result = tools(&server)
            .execute("docs_search_knowledge", &json!({"query": "vegetarian"}))
            .await
            .unwrap();
        assert_eq!(result["total_line_matches"], 1);
        assert_eq!(result["line_matches"][0]["line_number"], 9);
        assert_eq!(result["section_matches"][0]["section"], "Menu");
    }

    #[tokio::test]
    async fn test_get_section_exact_partial_and_missing() {
        let server = server_with_doc(DOC).await;
        let tools = tools(&server);

        let exact = tools
            .execute("docs_get_section", &json!({"section_name": "hours"}))
            .await
            .unwrap();
        assert_eq!(exact["section_name"], "Hours");
        assert!(exact.get("partial_match").is_none());

        let partial = tools
            .execute("docs_get_section", &json!({"section_name": "parking"}))
            .await
            .unwrap();
        assert_eq!(partial["section_name"], "Parking Info");
        assert_eq!(partial["partial_match"], true);

        let missing = tools
            .execute("docs_get_section", &json!({"section_name": "careers"}))
            .await
            .unwrap();
        assert_eq!(missing["found"], false);
        assert_eq!(missing["available_sections"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_empty_document() {
        let server = server_with_doc("  \n ").await;
        let result = tools(&server)
            .execute("docs_get_knowledge", &json!({}))
            .await
            .unwrap();
        assert_eq!(result["message"], "Document is empty");
    }

    #[tokio::test]
    async fn test_forbidden_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private/export"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let err = tools(&server)
            .execute("docs_get_knowledge", &json!({"document_id": "private"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }
}
