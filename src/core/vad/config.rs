//! VAD configuration types

use serde::{Deserialize, Serialize};

use crate::config::TurnDetectionSettings;
use crate::core::audio::MULAW_SAMPLE_RATE;

/// Pipeline sessions end a turn after this much silence.
pub const PIPELINE_STOP_MS: u32 = 300;
/// Speech must persist this long before a turn starts.
pub const PIPELINE_START_MS: u32 = 200;

/// Configuration for Voice Activity Detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VadConfig {
    /// Speech probability threshold (0.0 - 1.0)
    /// Higher values = stricter detection, fewer false positives
    pub threshold: f32,

    /// Minimum speech duration before triggering speech_start (ms)
    /// Helps filter out brief noise spikes
    pub min_speech_duration_ms: u32,

    /// Minimum silence duration before triggering speech_end (ms)
    /// Prevents premature end detection during pauses
    pub min_silence_duration_ms: u32,

    /// Frame RMS that maps to probability 1.0
    pub reference_rms: f32,

    /// Weight of the previous probability in the moving average
    pub smoothing_factor: f32,

    /// Sample rate for audio processing (Hz)
    pub sample_rate: u32,

    /// Frame size in samples (20ms at 8kHz)
    pub frame_size: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            min_speech_duration_ms: PIPELINE_START_MS,
            min_silence_duration_ms: PIPELINE_STOP_MS,
            reference_rms: 0.05,
            smoothing_factor: 0.5,
            sample_rate: MULAW_SAMPLE_RATE,
            frame_size: 160,
        }
    }
}

impl VadConfig {
    /// Local VAD for pipeline sessions, using the agent's activation threshold.
    pub fn for_pipeline(turn: &TurnDetectionSettings) -> Self {
        Self {
            threshold: turn.threshold,
            ..Default::default()
        }
    }

    /// Frame duration in milliseconds
    pub fn frame_duration_ms(&self) -> f32 {
        (self.frame_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Frames of speech needed for speech_start
    pub fn min_speech_frames(&self) -> u32 {
        (self.min_speech_duration_ms as f32 / self.frame_duration_ms()).ceil() as u32
    }

    /// Frames of silence needed for speech_end
    pub fn min_silence_frames(&self) -> u32 {
        (self.min_silence_duration_ms as f32 / self.frame_duration_ms()).ceil() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_math() {
        let config = VadConfig::default();
        assert!((config.frame_duration_ms() - 20.0).abs() < 0.01);
        assert_eq!(config.min_speech_frames(), 10);
        assert_eq!(config.min_silence_frames(), 15);
    }

    #[test]
    fn test_for_pipeline_uses_threshold() {
        let turn = TurnDetectionSettings {
            threshold: 0.4,
            prefix_padding_ms: 200,
            silence_duration_ms: 600,
        };
        let config = VadConfig::for_pipeline(&turn);
        assert!((config.threshold - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.min_silence_duration_ms, PIPELINE_STOP_MS);
    }
}
