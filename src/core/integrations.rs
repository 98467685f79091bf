//! Enabled third-party integrations per workspace.
//!
//! Integration configs are opaque JSON objects owned by the platform (for
//! example `{"api_key": "...", "spreadsheet_id": "..."}` for `google_sheets`).
//! Tool backends read the fields they need and ignore the rest.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::credentials::{StoreError, TenantId, WorkspaceId};

pub const GOOGLE_SHEETS: &str = "google_sheets";
pub const GOOGLE_DOCS: &str = "google_docs";

/// Integration name to its configuration.
pub type Integrations = HashMap<String, Value>;

/// Source of enabled integrations for a workspace.
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn enabled_integrations(
        &self,
        tenant: &TenantId,
        workspace: &WorkspaceId,
    ) -> Result<Integrations, StoreError>;
}

/// In-process integration store.
#[derive(Debug, Default)]
pub struct InMemoryIntegrationStore {
    records: DashMap<(TenantId, WorkspaceId), Integrations>,
}

impl InMemoryIntegrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self, tenant: TenantId, workspace: WorkspaceId, name: &str, config: Value) {
        self.records
            .entry((tenant, workspace))
            .or_default()
            .insert(name.to_string(), config);
    }
}

#[async_trait]
impl IntegrationStore for InMemoryIntegrationStore {
    async fn enabled_integrations(
        &self,
        tenant: &TenantId,
        workspace: &WorkspaceId,
    ) -> Result<Integrations, StoreError> {
        Ok(self
            .records
            .get(&(tenant.clone(), workspace.clone()))
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

/// Read a non-empty string field from an integration config.
pub fn config_str<'a>(config: &'a Value, field: &str) -> Option<&'a str> {
    config
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_integrations_are_workspace_scoped() {
        let store = InMemoryIntegrationStore::new();
        store.enable(
            "t1".into(),
            "ws-1".into(),
            GOOGLE_SHEETS,
            json!({"api_key": "k", "spreadsheet_id": "sheet"}),
        );

        let ws1 = store
            .enabled_integrations(&"t1".into(), &"ws-1".into())
            .await
            .unwrap();
        assert!(ws1.contains_key(GOOGLE_SHEETS));

        let ws2 = store
            .enabled_integrations(&"t1".into(), &"ws-2".into())
            .await
            .unwrap();
        assert!(ws2.is_empty());

        let other_tenant = store
            .enabled_integrations(&"t2".into(), &"ws-1".into())
            .await
            .unwrap();
        assert!(other_tenant.is_empty());
    }

    #[test]
    fn test_config_str_skips_blank() {
        let config = json!({"api_key": "  ", "document_id": "doc"});
        assert_eq!(config_str(&config, "api_key"), None);
        assert_eq!(config_str(&config, "document_id"), Some("doc"));
        assert_eq!(config_str(&config, "missing"), None);
    }
}
