//! Voice Activity Detection (VAD) module
//!
//! Acoustic speech detection for pipeline sessions. The detector drives
//! barge-in (caller speech while the assistant is talking) and segments
//! utterances for speech-to-text backends that do not stream.
//!
//! # Example
//!
//! ```rust
//! use voice_orchestrator::core::vad::{EnergyVad, VadConfig, VoiceActivityDetector};
//!
//! let mut vad = EnergyVad::new(VadConfig::default());
//! for result in vad.process_mulaw(&[0xFF; 320]) {
//!     assert!(!result.speech_start);
//! }
//! assert!(!vad.is_speaking());
//! ```

pub mod config;
pub mod detector;

pub use config::VadConfig;
pub use detector::{EnergyVad, VadResult, VoiceActivityDetector};
