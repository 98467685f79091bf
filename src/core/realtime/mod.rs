//! Integrated speech-to-speech providers.
//!
//! # Supported Providers
//!
//! - **OpenAI Realtime API**
//! - **xAI Grok Realtime** (same event protocol, different endpoint and voices)
//!
//! # Audio Format
//!
//! Both vendors are configured for g711 µ-law at 8 kHz in and out, so
//! telephony audio passes through without resampling.

mod base;
pub mod client;
pub mod messages;

pub use base::{REALTIME_EVENT_CAPACITY, RealtimeEvent, SpeechToSpeech};
pub use client::{
    DEFAULT_OPENAI_REALTIME_MODEL, DEFAULT_XAI_REALTIME_MODEL, OPENAI_REALTIME_URL,
    RealtimeClient, RealtimeClientConfig, RealtimeVendor, XAI_REALTIME_URL,
};

/// Names accepted by the `realtime_provider` option.
pub fn get_supported_realtime_providers() -> Vec<&'static str> {
    vec!["openai", "grok", "xai"]
}
