use std::time::Instant;

use tracing::Span;
use uuid::Uuid;

use super::credentials::{TenantId, WorkspaceId};

/// Identity of one voice session, attached to every log line it produces.
#[derive(Debug, Clone)]
pub struct SessionContext {
    session_id: String,
    tenant_id: TenantId,
    workspace_id: Option<WorkspaceId>,
    started_at: Instant,
}

impl SessionContext {
    pub fn new(tenant_id: TenantId, workspace_id: Option<WorkspaceId>) -> Self {
        Self::with_session_id(Uuid::new_v4().to_string(), tenant_id, workspace_id)
    }

    pub fn with_session_id(
        session_id: impl Into<String>,
        tenant_id: TenantId,
        workspace_id: Option<WorkspaceId>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            tenant_id,
            workspace_id,
            started_at: Instant::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn workspace_id(&self) -> Option<&WorkspaceId> {
        self.workspace_id.as_ref()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Span carrying the session identity; tasks spawned for the session are
    /// instrumented with it.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "voice_session",
            session_id = %self.session_id,
            tenant_id = %self.tenant_id,
            workspace_id = self.workspace_id.as_ref().map(WorkspaceId::as_str).unwrap_or("-"),
        )
    }
}
