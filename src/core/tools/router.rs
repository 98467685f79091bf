//! Per-session tool routing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::Instrument;

use super::{
    ContactStore, CrmTools, GoogleDocsTools, GoogleSheetsTools, ToolBackend, ToolDefinition,
    ToolError, ToolResult,
};
use crate::core::credentials::TenantId;
use crate::core::integrations::{GOOGLE_DOCS, GOOGLE_SHEETS, Integrations};

/// Argument keys whose values never reach the logs.
static SENSITIVE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(key|token|secret|password|passwd|auth|credential|ssn)")
        .expect("sensitive key pattern is valid")
});

const MAX_LOGGED_STRING: usize = 64;

/// Copy of `arguments` safe to log: sensitive keys masked, long strings cut.
pub fn redact_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let value = if SENSITIVE_KEY.is_match(k) {
                        Value::String("***".to_string())
                    } else {
                        redact_arguments(v)
                    };
                    (k.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_arguments).collect()),
        Value::String(s) if s.chars().count() > MAX_LOGGED_STRING => {
            let cut: String = s.chars().take(MAX_LOGGED_STRING).collect();
            Value::String(format!("{cut}..."))
        }
        other => other.clone(),
    }
}

/// Routes tool calls for one session to the backend that serves them.
pub struct ToolRouter {
    backends: Vec<Arc<dyn ToolBackend>>,
    /// tool name -> index into `backends`
    routes: HashMap<String, usize>,
    definitions: HashMap<String, ToolDefinition>,
    enabled: HashSet<String>,
    timeout: Duration,
}

impl ToolRouter {
    /// Router exposing only the `enabled` tools, each bounded by `timeout`.
    pub fn new(enabled: &[String], timeout: Duration) -> Self {
        Self {
            backends: Vec::new(),
            routes: HashMap::new(),
            definitions: HashMap::new(),
            enabled: enabled.iter().cloned().collect(),
            timeout,
        }
    }

    /// Add a backend. A tool name already served by an earlier backend keeps its
    /// first owner.
    pub fn register(&mut self, backend: Arc<dyn ToolBackend>) {
        let index = self.backends.len();
        for definition in backend.tool_definitions() {
            if self.routes.contains_key(&definition.name) {
                tracing::warn!(
                    tool = %definition.name,
                    backend = backend.name(),
                    "Tool already registered by another backend; ignoring"
                );
                continue;
            }
            self.routes.insert(definition.name.clone(), index);
            self.definitions.insert(definition.name.clone(), definition);
        }
        self.backends.push(backend);
    }

    /// Router for one session: CRM tools when a contact store is available,
    /// spreadsheet and knowledge-base tools when their integrations are enabled.
    pub fn for_session(
        enabled: &[String],
        timeout: Duration,
        tenant: &TenantId,
        integrations: &Integrations,
        contacts: Option<Arc<dyn ContactStore>>,
    ) -> Self {
        let mut router = Self::new(enabled, timeout);

        if let Some(store) = contacts {
            router.register(Arc::new(CrmTools::new(tenant.clone(), store)));
        }

        if let Some(config) = integrations.get(GOOGLE_SHEETS) {
            match GoogleSheetsTools::from_integration(config) {
                Some(tools) => router.register(Arc::new(tools)),
                None => tracing::warn!(
                    integration = GOOGLE_SHEETS,
                    "Integration enabled without an api_key; tools unavailable"
                ),
            }
        }

        if let Some(config) = integrations.get(GOOGLE_DOCS) {
            match GoogleDocsTools::from_integration(config) {
                Some(tools) => router.register(Arc::new(tools)),
                None => tracing::warn!(
                    integration = GOOGLE_DOCS,
                    "Integration enabled without an api_key; tools unavailable"
                ),
            }
        }

        tracing::debug!(
            requested = enabled.len(),
            available = router.routes.len(),
            "Tool router built"
        );
        router
    }

    pub fn with_backend(mut self, backend: Arc<dyn ToolBackend>) -> Self {
        self.register(backend);
        self
    }

    /// Whether `name` is enabled and served by some backend.
    pub fn has_tool(&self, name: &str) -> bool {
        self.enabled.contains(name) && self.routes.contains_key(name)
    }

    /// Definitions for the requested tools that are enabled and available, in
    /// request order. Unavailable names are omitted silently.
    pub fn get_all_tool_definitions(&self, requested: &[String]) -> Vec<ToolDefinition> {
        let mut seen = HashSet::new();
        requested
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .filter(|name| self.has_tool(name))
            .filter_map(|name| self.definitions.get(name.as_str()).cloned())
            .collect()
    }

    /// Execute a tool. Always returns exactly one result within the timeout:
    /// unknown tools, handler errors, panics and timeouts become failures.
    pub async fn execute_tool(&self, name: &str, arguments: Value) -> ToolResult {
        let redacted = redact_arguments(&arguments);
        tracing::info!(tool = %name, arguments = %redacted, "Executing tool");

        let backend = match self.routes.get(name) {
            Some(&index) if self.enabled.contains(name) => self.backends[index].clone(),
            _ => {
                tracing::warn!(tool = %name, "Unknown or disabled tool requested");
                return ToolError::UnknownTool(name.to_string()).into();
            }
        };

        let started = Instant::now();
        let tool = name.to_string();
        let task = tokio::spawn(
            async move { backend.execute(&tool, &arguments).await }.in_current_span(),
        );
        let abort = task.abort_handle();

        let outcome = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(join_err)) => Err(ToolError::ExecutionFailed(if join_err.is_panic() {
                format!("Tool '{name}' crashed")
            } else {
                format!("Tool '{name}' was cancelled")
            })),
            Err(_) => {
                abort.abort();
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(data) => {
                tracing::info!(tool = %name, elapsed_ms, "Tool succeeded");
                ToolResult::success(data)
            }
            Err(err) => {
                tracing::warn!(
                    tool = %name,
                    code = err.code(),
                    elapsed_ms,
                    arguments = %redacted,
                    error = %err,
                    "Tool failed"
                );
                err.into()
            }
        }
    }

    /// Release backend resources. Safe to call more than once.
    pub async fn close(&self) {
        futures::future::join_all(self.backends.iter().map(|b| b.close())).await;
    }
}
