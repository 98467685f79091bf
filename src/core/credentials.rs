//! Workspace-scoped provider credentials.
//!
//! A [`CredentialSet`] belongs to exactly one (tenant, workspace) scope. A
//! workspace-scoped lookup only ever matches the record for that workspace and a
//! tenant-level lookup only matches the record whose workspace is unset; there is
//! no fallback between the two.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::errors::SessionError;

// =============================================================================
// Identity
// =============================================================================

/// Owning tenant (user account) of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(String);

/// Workspace inside a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkspaceId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(TenantId);
string_id!(WorkspaceId);

// =============================================================================
// Secrets
// =============================================================================

/// Provider API key. Zeroed on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(Zeroizing<String>);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    /// Raw key value, for building provider requests only.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Provider keys configured for one (tenant, workspace) scope.
#[derive(Debug, Clone)]
pub struct CredentialSet {
    tenant_id: TenantId,
    workspace_id: Option<WorkspaceId>,
    keys: HashMap<String, ApiKey>,
}

impl CredentialSet {
    pub fn new(tenant_id: TenantId, workspace_id: Option<WorkspaceId>) -> Self {
        Self {
            tenant_id,
            workspace_id,
            keys: HashMap::new(),
        }
    }

    /// Add a key for `provider`. Blank keys are treated as not configured.
    pub fn with_key(mut self, provider: &str, key: impl Into<String>) -> Self {
        self.insert(provider, key);
        self
    }

    pub fn insert(&mut self, provider: &str, key: impl Into<String>) {
        let key = key.into();
        if key.trim().is_empty() {
            return;
        }
        self.keys
            .insert(provider.to_ascii_lowercase(), ApiKey::new(key.trim()));
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn workspace_id(&self) -> Option<&WorkspaceId> {
        self.workspace_id.as_ref()
    }

    pub fn key_for(&self, provider: &str) -> Option<&ApiKey> {
        self.keys.get(&provider.to_ascii_lowercase())
    }

    /// Key for `provider`, or `MissingCredential` naming it.
    pub fn require(&self, provider: &str) -> Result<&ApiKey, SessionError> {
        self.key_for(provider)
            .ok_or_else(|| SessionError::missing_credential(provider))
    }

    /// Configured provider names, sorted. Never includes key material.
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn matches_scope(&self, tenant: &TenantId, workspace: Option<&WorkspaceId>) -> bool {
        &self.tenant_id == tenant && self.workspace_id.as_ref() == workspace
    }
}

// =============================================================================
// Stores
// =============================================================================

/// Errors from credential or integration storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Source of credential records, keyed by exact (tenant, workspace) scope.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup(
        &self,
        tenant: &TenantId,
        workspace: Option<&WorkspaceId>,
    ) -> Result<Option<CredentialSet>, StoreError>;
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: DashMap<(TenantId, Option<WorkspaceId>), CredentialSet>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for the set's own scope.
    pub fn insert(&self, set: CredentialSet) {
        let scope = (set.tenant_id.clone(), set.workspace_id.clone());
        self.records.insert(scope, set);
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn lookup(
        &self,
        tenant: &TenantId,
        workspace: Option<&WorkspaceId>,
    ) -> Result<Option<CredentialSet>, StoreError> {
        let scope = (tenant.clone(), workspace.cloned());
        Ok(self.records.get(&scope).map(|entry| entry.value().clone()))
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves the credential record for a session scope.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Exact-scope lookup. A record whose scope differs from the request is
    /// discarded and reported as not found.
    pub async fn resolve(
        &self,
        tenant: &TenantId,
        workspace: Option<&WorkspaceId>,
    ) -> Result<Option<CredentialSet>, StoreError> {
        let record = self.store.lookup(tenant, workspace).await?;
        match record {
            Some(set) if set.matches_scope(tenant, workspace) => Ok(Some(set)),
            Some(set) => {
                tracing::warn!(
                    tenant_id = %tenant,
                    workspace_id = ?workspace.map(WorkspaceId::as_str),
                    record_workspace_id = ?set.workspace_id().map(WorkspaceId::as_str),
                    "Credential store returned a record for a different scope; ignoring it"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
