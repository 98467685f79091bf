//! State shared by both session shapes and the tasks they spawn.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, info, warn};

use super::state::SessionState;
use crate::config::{AgentConfiguration, OrchestratorConfig};
use crate::core::context::SessionContext;
use crate::core::credentials::{CredentialResolver, CredentialSet};
use crate::core::integrations::{IntegrationStore, Integrations};
use crate::core::providers::{DefaultProviderFactory, ProviderFactory, ProviderSet};
use crate::core::tools::{ContactStore, ToolCall, ToolResult, ToolRouter};
use crate::core::transcript::TranscriptHandle;
use crate::errors::{SessionError, SessionResult};

/// Upper bound on waiting for session tasks during cleanup.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Platform services a session draws on.
#[derive(Clone)]
pub struct SessionDeps {
    pub credentials: CredentialResolver,
    pub integrations: Arc<dyn IntegrationStore>,
    /// CRM tools are offered only when a contact store is present
    pub contacts: Option<Arc<dyn ContactStore>>,
    pub factory: Arc<dyn ProviderFactory>,
    pub config: Arc<OrchestratorConfig>,
}

impl SessionDeps {
    /// Dependencies using the built-in provider factory and no contact store.
    pub fn new(
        credentials: CredentialResolver,
        integrations: Arc<dyn IntegrationStore>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            credentials,
            integrations,
            contacts: None,
            factory: Arc::new(DefaultProviderFactory::new()),
            config,
        }
    }

    pub fn with_contacts(mut self, contacts: Arc<dyn ContactStore>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.factory = factory;
        self
    }
}

pub(crate) struct SessionShared {
    pub context: SessionContext,
    pub agent: AgentConfiguration,
    pub deps: SessionDeps,
    pub transcript: TranscriptHandle,
    /// Cancels every task the session spawned
    pub cancel: CancellationToken,
    span: Span,
    state: Mutex<SessionState>,
    router: Mutex<Option<Arc<ToolRouter>>>,
    tasks: TaskTracker,
}

impl SessionShared {
    pub fn new(context: SessionContext, agent: AgentConfiguration, deps: SessionDeps) -> Self {
        let span = context.span();
        let transcript = TranscriptHandle::new(context.started_at());
        Self {
            context,
            agent,
            deps,
            transcript,
            cancel: CancellationToken::new(),
            span,
            state: Mutex::new(SessionState::Created),
            router: Mutex::new(None),
            tasks: TaskTracker::new(),
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.deps.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to `next` if the lifecycle allows it.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            warn!(from = %*state, to = %next, "Ignoring invalid session state transition");
            return false;
        }
        debug!(from = %*state, to = %next, "Session state changed");
        *state = next;
        true
    }

    /// `Created → Initializing`, or `InvalidState` naming the operation.
    pub fn begin_initialize(&self) -> SessionResult<()> {
        let mut state = self.state.lock();
        if *state != SessionState::Created {
            return Err(SessionError::InvalidState {
                operation: "initialize",
                state: *state,
            });
        }
        *state = SessionState::Initializing;
        Ok(())
    }

    /// Claim cleanup. Returns the state cleanup started from, or `None` when
    /// another call already cleaned up or is doing so.
    pub fn begin_cleanup(&self) -> Option<SessionState> {
        let mut state = self.state.lock();
        let previous = *state;
        match previous {
            SessionState::CleaningUp | SessionState::Closed => None,
            // Failed is terminal; resources are still released
            SessionState::Failed => Some(previous),
            _ => {
                *state = SessionState::CleaningUp;
                Some(previous)
            }
        }
    }

    /// Resolve credentials and integrations, build the tool router and ask
    /// the factory for providers. Nothing is connected yet.
    pub async fn prepare(&self) -> SessionResult<ProviderSet> {
        let tenant = self.context.tenant_id();
        let workspace = self.context.workspace_id();

        let credentials = match self.deps.credentials.resolve(tenant, workspace).await? {
            Some(set) => set,
            None => {
                info!("No credential record for session scope");
                CredentialSet::new(tenant.clone(), workspace.cloned())
            }
        };

        let integrations = match workspace {
            Some(workspace) => {
                self.deps
                    .integrations
                    .enabled_integrations(tenant, workspace)
                    .await?
            }
            None => Integrations::new(),
        };

        let router = ToolRouter::for_session(
            &self.agent.enabled_tools,
            self.config().tool_timeout,
            tenant,
            &integrations,
            self.deps.contacts.clone(),
        );
        let tools = router.get_all_tool_definitions(&self.agent.enabled_tools);
        *self.router.lock() = Some(Arc::new(router));

        let providers =
            self.deps
                .factory
                .build(&self.agent, &credentials, &tools, self.config())?;
        info!(
            mode = self.agent.mode().as_str(),
            providers = %providers.describe(),
            tools = tools.len(),
            "Session providers selected"
        );
        Ok(providers)
    }

    /// Dispatch a model tool call. Always yields one result.
    pub async fn handle_tool_call(&self, call: &ToolCall) -> ToolResult {
        let router = self.router.lock().clone();
        let Some(router) = router else {
            warn!(tool = %call.name, "Tool call with no tool router");
            return ToolResult::failure("Tools are not available for this session");
        };
        if !call.arguments.is_object() {
            warn!(tool = %call.name, "Tool call arguments are not an object");
            return ToolResult::failure(format!("Invalid arguments for tool '{}'", call.name));
        }
        router.execute_tool(&call.name, call.arguments.clone()).await
    }

    /// Spawn a session task, tracked for cleanup and tagged with the session span.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(future.instrument(self.span()))
    }

    /// Cancel every session task and wait for them to finish.
    pub async fn shutdown_tasks(&self) {
        self.cancel.cancel();
        self.tasks.close();
        if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tasks.len(),
                "Session tasks did not stop in time"
            );
        }
    }

    pub async fn release_tools(&self) {
        let router = self.router.lock().take();
        if let Some(router) = router {
            router.close().await;
        }
    }
}
