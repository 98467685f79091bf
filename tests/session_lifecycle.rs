//! Session lifecycle tests: initialization, failure cleanup and idempotent
//! teardown, driven through injected providers.

mod fakes;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use serde_json::json;

use fakes::{FakeFactory, FakeLlm, FakeRealtime, FakeStt, FakeTts, deps_with, realtime_agent};
use voice_orchestrator::config::{AgentConfiguration, OrchestratorConfig, SessionMode};
use voice_orchestrator::core::{
    CredentialResolver, CredentialSet, InMemoryCredentialStore, InMemoryIntegrationStore,
    SessionContext, ToolCall,
};
use voice_orchestrator::errors::SessionError;
use voice_orchestrator::session::{
    CallMetadata, CallTransport, SessionDeps, SessionState, VoiceSession,
};

fn context() -> SessionContext {
    SessionContext::new("tenant-a".into(), Some("ws-1".into()))
}

fn pipeline_factory() -> (Arc<FakeStt>, Arc<FakeFactory>) {
    let stt = FakeStt::new();
    let factory = FakeFactory::pipeline(stt.clone(), FakeLlm::scripted(vec![]), FakeTts::instant());
    (stt, factory)
}

#[tokio::test]
async fn test_mode_follows_agent_configuration() {
    let (_, factory) = pipeline_factory();
    let session = VoiceSession::new(context(), AgentConfiguration::default(), deps_with(factory));
    assert_eq!(session.mode(), SessionMode::Pipeline);

    let session = VoiceSession::new(
        context(),
        realtime_agent(),
        deps_with(FakeFactory::realtime(FakeRealtime::new())),
    );
    assert_eq!(session.mode(), SessionMode::Realtime);
    assert_eq!(session.state(), SessionState::Created);
}

#[tokio::test]
async fn test_initialize_then_cleanup_is_idempotent() {
    let provider = FakeRealtime::new();
    let session = VoiceSession::new(
        context(),
        realtime_agent(),
        deps_with(FakeFactory::realtime(provider.clone())),
    );

    session.initialize().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);

    session.cleanup().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(provider.disconnects(), 1);

    session.cleanup().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(provider.disconnects(), 1);
}

#[tokio::test]
async fn test_cleanup_before_initialize() {
    let (stt, factory) = pipeline_factory();
    let session = VoiceSession::new(context(), AgentConfiguration::default(), deps_with(factory.clone()));

    session.cleanup().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(stt.disconnects(), 0);

    let err = session.initialize().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState { operation: "initialize", state: SessionState::Closed }
    ));
    assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_initialize_twice_is_rejected() {
    let (_, factory) = pipeline_factory();
    let session = VoiceSession::new(context(), AgentConfiguration::default(), deps_with(factory));
    session.initialize().await.unwrap();

    let err = session.initialize().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { state: SessionState::Active, .. }));
    session.cleanup().await;
}

#[tokio::test]
async fn test_missing_deepgram_key_fails_initialize() {
    let store = InMemoryCredentialStore::new();
    store.insert(
        CredentialSet::new("tenant-a".into(), Some("ws-1".into()))
            .with_key("openai", "sk-test")
            .with_key("elevenlabs", "el-test"),
    );
    let deps = SessionDeps::new(
        CredentialResolver::new(Arc::new(store)),
        Arc::new(InMemoryIntegrationStore::new()),
        Arc::new(OrchestratorConfig::default()),
    );
    let agent = AgentConfiguration::from_json(json!({"stt_provider": "deepgram"})).unwrap();
    let session = VoiceSession::new(context(), agent, deps);

    let err = session.initialize().await.unwrap_err();
    match err {
        SessionError::MissingCredential { provider } => assert_eq!(provider, "deepgram"),
        other => panic!("expected MissingCredential, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Failed);

    // Cleanup after a failed initialize is safe and keeps the terminal state
    session.cleanup().await;
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_workspace_session_never_uses_tenant_credentials() {
    let store = InMemoryCredentialStore::new();
    store.insert(
        CredentialSet::new("tenant-a".into(), None)
            .with_key("deepgram", "dg-tenant")
            .with_key("openai", "sk-tenant")
            .with_key("elevenlabs", "el-tenant"),
    );
    let deps = SessionDeps::new(
        CredentialResolver::new(Arc::new(store)),
        Arc::new(InMemoryIntegrationStore::new()),
        Arc::new(OrchestratorConfig::default()),
    );
    let session = VoiceSession::new(context(), AgentConfiguration::default(), deps.clone());
    assert!(matches!(
        session.initialize().await,
        Err(SessionError::MissingCredential { .. })
    ));

    // The same record serves a tenant-level session
    let tenant_session = VoiceSession::new(
        SessionContext::new("tenant-a".into(), None),
        AgentConfiguration::from_json(json!({"stt_provider": "google", "llm_provider": "openai"}))
            .unwrap(),
        deps,
    );
    match tenant_session.initialize().await {
        Err(SessionError::MissingCredential { provider }) => assert_eq!(provider, "google"),
        other => panic!("expected MissingCredential for google, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_failure_closes_provider() {
    let stt = FakeStt::failing();
    let factory = FakeFactory::pipeline(stt.clone(), FakeLlm::scripted(vec![]), FakeTts::instant());
    let session = VoiceSession::new(context(), AgentConfiguration::default(), deps_with(factory));

    let err = session.initialize().await.unwrap_err();
    assert!(matches!(err, SessionError::ProviderConnectionFailure { ref provider, .. } if provider == "fake-stt"));
    assert!(err.is_fatal());
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(stt.disconnects(), 1);
}

#[tokio::test]
async fn test_realtime_connection_failure() {
    let provider = FakeRealtime::failing();
    let session = VoiceSession::new(
        context(),
        realtime_agent(),
        deps_with(FakeFactory::realtime(provider.clone())),
    );
    assert!(session.initialize().await.is_err());
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(provider.disconnects(), 1);
    assert!(provider.commands().is_empty());
}

#[tokio::test]
async fn test_sheets_tool_without_integration_is_omitted() {
    let (_, factory) = pipeline_factory();
    let agent = AgentConfiguration::from_json(json!({"enabled_tools": ["sheets_search"]})).unwrap();
    let session = VoiceSession::new(context(), agent, deps_with(factory.clone()));

    session.initialize().await.unwrap();
    assert!(factory.tools().is_empty());

    let result = session
        .handle_tool_call(&ToolCall::new(None, "sheets_search", json!({"query": "x"})))
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("sheets_search"));
    session.cleanup().await;
}

#[tokio::test]
async fn test_tool_call_before_initialize_fails_cleanly() {
    let (_, factory) = pipeline_factory();
    let session = VoiceSession::new(context(), AgentConfiguration::default(), deps_with(factory));
    let result = session
        .handle_tool_call(&ToolCall::new(Some("c1".into()), "crm_lookup_contact", json!({})))
        .await;
    assert!(!result.success);
}

#[tokio::test]
async fn test_run_requires_active_session() {
    let (_, factory) = pipeline_factory();
    let session = VoiceSession::new(context(), AgentConfiguration::default(), deps_with(factory));
    let (transport, _peer) = CallTransport::channel(CallMetadata::default(), 8);

    let err = session.run(transport).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { operation: "run", state: SessionState::Created }));
}

#[tokio::test]
async fn test_send_audio_outside_active_is_ignored() {
    let (stt, factory) = pipeline_factory();
    let session = VoiceSession::new(context(), AgentConfiguration::default(), deps_with(factory));

    session.send_audio(Bytes::from_static(&[0xff; 160])).await;
    assert_eq!(stt.audio_bytes.load(Ordering::SeqCst), 0);

    session.initialize().await.unwrap();
    session.send_audio(Bytes::from_static(&[0xff; 160])).await;
    assert_eq!(stt.audio_bytes.load(Ordering::SeqCst), 160);
    session.cleanup().await;
}

#[tokio::test]
async fn test_cleanup_stops_running_session() {
    let (stt, factory) = pipeline_factory();
    let session = Arc::new(VoiceSession::new(
        context(),
        AgentConfiguration::default(),
        deps_with(factory),
    ));
    session.initialize().await.unwrap();

    let (transport, _peer) = CallTransport::channel(CallMetadata::new("MZ1", "CA1"), 8);
    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run(transport).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    session.cleanup().await;
    let result = tokio::time::timeout(std::time::Duration::from_secs(2), runner)
        .await
        .expect("run did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(stt.disconnects(), 1);
}

#[tokio::test]
async fn test_transcript_readable_in_any_state() {
    let (_, factory) = pipeline_factory();
    let session = VoiceSession::new(context(), AgentConfiguration::default(), deps_with(factory));
    assert_eq!(session.get_transcript(), "");
    assert!(session.get_transcript_entries().is_empty());
    session.cleanup().await;
    assert_eq!(session.get_transcript(), "");
}
