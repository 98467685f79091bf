//! Energy-based voice activity detector.

use tracing::{debug, trace};

use super::config::VadConfig;
use crate::core::audio::decode_mulaw;

/// Result of VAD processing for a single audio frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VadResult {
    /// Whether the detector is inside a speech segment
    pub is_speech: bool,
    /// Smoothed speech probability (0.0 - 1.0)
    pub probability: f32,
    /// Whether speech just started (transition from silence to speech)
    pub speech_start: bool,
    /// Whether speech just ended (transition from speech to silence)
    pub speech_end: bool,
}

/// Trait for Voice Activity Detection implementations
pub trait VoiceActivityDetector: Send + Sync {
    /// Process a single audio frame and return VAD result
    fn process_frame(&mut self, audio: &[f32]) -> VadResult;

    /// Reset internal state (call when starting a new audio stream)
    fn reset(&mut self);

    /// Check if currently in speech state
    fn is_speaking(&self) -> bool;

    /// Get the configuration
    fn config(&self) -> &VadConfig;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VadState {
    Silence,
    PotentialSpeech,
    Speech,
    PotentialSilence,
}

/// RMS-threshold detector with the same hysteresis as model-based VADs.
pub struct EnergyVad {
    config: VadConfig,
    state: VadState,
    smoothed_probability: f32,
    speech_frames: u32,
    silence_frames: u32,
    min_speech_frames: u32,
    min_silence_frames: u32,
    /// µ-law bytes not yet forming a full frame
    pending: Vec<u8>,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        let min_speech_frames = config.min_speech_frames().max(1);
        let min_silence_frames = config.min_silence_frames().max(1);
        Self {
            config,
            state: VadState::Silence,
            smoothed_probability: 0.0,
            speech_frames: 0,
            silence_frames: 0,
            min_speech_frames,
            min_silence_frames,
            pending: Vec::new(),
        }
    }

    /// Feed arbitrary-length µ-law audio; returns one result per complete frame.
    pub fn process_mulaw(&mut self, data: &[u8]) -> Vec<VadResult> {
        self.pending.extend_from_slice(data);
        let frame_size = self.config.frame_size;
        let complete = self.pending.len() / frame_size * frame_size;
        let frames: Vec<u8> = self.pending.drain(..complete).collect();
        frames
            .chunks(frame_size)
            .map(|chunk| {
                let samples = decode_mulaw(chunk);
                self.process_frame(&samples)
            })
            .collect()
    }

    fn frame_probability(&self, audio: &[f32]) -> f32 {
        if audio.is_empty() {
            return 0.0;
        }
        let energy: f32 = audio.iter().map(|s| s * s).sum::<f32>() / audio.len() as f32;
        (energy.sqrt() / self.config.reference_rms).clamp(0.0, 1.0)
    }

    fn transition_state(&self, is_speech_frame: bool) -> (VadState, bool, bool) {
        let mut speech_start = false;
        let mut speech_end = false;

        let new_state = match (self.state, is_speech_frame) {
            (VadState::Silence | VadState::PotentialSpeech, true) => {
                if self.speech_frames >= self.min_speech_frames {
                    speech_start = true;
                    debug!(frames = self.speech_frames, "Speech started");
                    VadState::Speech
                } else {
                    VadState::PotentialSpeech
                }
            }
            (VadState::Silence | VadState::PotentialSpeech, false) => VadState::Silence,
            (VadState::Speech | VadState::PotentialSilence, false) => {
                if self.silence_frames >= self.min_silence_frames {
                    speech_end = true;
                    debug!(frames = self.silence_frames, "Speech ended");
                    VadState::Silence
                } else {
                    VadState::PotentialSilence
                }
            }
            (VadState::Speech | VadState::PotentialSilence, true) => VadState::Speech,
        };

        (new_state, speech_start, speech_end)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn process_frame(&mut self, audio: &[f32]) -> VadResult {
        let raw_probability = self.frame_probability(audio);
        self.smoothed_probability = self.config.smoothing_factor * self.smoothed_probability
            + (1.0 - self.config.smoothing_factor) * raw_probability;

        let is_speech_frame = self.smoothed_probability >= self.config.threshold;
        if is_speech_frame {
            self.speech_frames += 1;
            self.silence_frames = 0;
        } else {
            self.silence_frames += 1;
            self.speech_frames = 0;
        }

        let (new_state, speech_start, speech_end) = self.transition_state(is_speech_frame);
        trace!(
            probability = self.smoothed_probability,
            from = ?self.state,
            to = ?new_state,
            "VAD frame"
        );
        self.state = new_state;

        VadResult {
            is_speech: matches!(self.state, VadState::Speech | VadState::PotentialSilence),
            probability: self.smoothed_probability,
            speech_start,
            speech_end,
        }
    }

    fn reset(&mut self) {
        self.state = VadState::Silence;
        self.smoothed_probability = 0.0;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.pending.clear();
    }

    fn is_speaking(&self) -> bool {
        matches!(self.state, VadState::Speech | VadState::PotentialSilence)
    }

    fn config(&self) -> &VadConfig {
        &self.config
    }
}
