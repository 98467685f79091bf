pub mod audio;
pub mod context;
pub mod credentials;
pub mod integrations;
pub mod llm;
pub mod providers;
pub mod realtime;
pub mod stt;
pub mod tools;
pub mod transcript;
pub mod tts;
pub mod vad;
pub mod ws;

// Re-export commonly used types for convenience
pub use context::SessionContext;

pub use credentials::{
    ApiKey, CredentialResolver, CredentialSet, CredentialStore, InMemoryCredentialStore,
    StoreError, TenantId, WorkspaceId,
};

pub use integrations::{InMemoryIntegrationStore, IntegrationStore, Integrations};

pub use stt::{SpeechToText, SttEvent, get_supported_stt_providers};

pub use tts::{TextToSpeech, get_supported_tts_providers};

pub use llm::{ChatMessage, ChatRole, LanguageModel, LlmEvent};

pub use realtime::{RealtimeEvent, SpeechToSpeech, get_supported_realtime_providers};

pub use providers::{
    DefaultProviderFactory, PipelineProviders, ProviderFactory, ProviderSet, ProviderStage,
};

pub use tools::{ToolCall, ToolDefinition, ToolResult, ToolRouter};

pub use transcript::{TranscriptEntry, TranscriptHandle, TranscriptRole};
