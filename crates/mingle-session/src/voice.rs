//! Voice turn-taking controller.
//!
//! Segments a continuous microphone sample stream into utterances using
//! energy-based silence detection: once the per-chunk RMS rises above
//! the speech threshold the controller buffers audio, and after the
//! level stays below threshold for the full silence window it packages
//! the buffered span (speech onset through the silence tail) as one
//! base64 WAV payload.
//!
//! A single state enum holds at most one buffer, so overlapping
//! recordings are impossible by construction.

use base64::Engine;
use std::io::Cursor;
use std::time::{Duration, Instant};

/// RMS level above which a chunk counts as speech. Empirical tunable
/// for a kiosk microphone at arm's length.
pub const DEFAULT_SPEECH_THRESHOLD: f32 = 0.015;

/// How long the level must stay below threshold to close an utterance.
pub const DEFAULT_SILENCE_WINDOW: Duration = Duration::from_millis(800);

/// Encoded payloads smaller than this are silence-only clips and are
/// dropped without calling the voice gateway.
pub const DEFAULT_MIN_PAYLOAD_BYTES: usize = 1000;

/// Smoothing factor for the UI level meter (weight of the newest chunk).
const LEVEL_SMOOTHING: f32 = 0.2;

#[derive(Debug, Clone)]
pub struct VoiceTurnConfig {
    pub speech_threshold: f32,
    pub silence_window: Duration,
    pub min_payload_bytes: usize,
    pub sample_rate: u32,
}

impl Default for VoiceTurnConfig {
    fn default() -> Self {
        Self {
            speech_threshold: DEFAULT_SPEECH_THRESHOLD,
            silence_window: DEFAULT_SILENCE_WINDOW,
            min_payload_bytes: DEFAULT_MIN_PAYLOAD_BYTES,
            sample_rate: 16_000,
        }
    }
}

/// One completed utterance, transport-ready.
#[derive(Debug, Clone)]
pub struct UtterancePayload {
    /// Base64 of a 16-bit PCM WAV container.
    pub base64_wav: String,
    pub sample_count: usize,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Disabled,
    /// Microphone open, watching the level for speech onset.
    Listening,
    /// Speech detected; buffering until the silence window closes.
    Segmenting,
    /// An utterance was handed off; waiting for the caller to confirm
    /// before the next segment may begin.
    Transcribing,
}

enum Mode {
    Disabled,
    Listening,
    Segmenting {
        buffer: Vec<f32>,
        silence_deadline: Option<Instant>,
    },
    Transcribing,
}

pub struct VoiceTurnController {
    cfg: VoiceTurnConfig,
    mode: Mode,
    /// Smoothed amplitude for the UI meter; not used for segmentation.
    level: f32,
}

impl VoiceTurnController {
    pub fn new(cfg: VoiceTurnConfig) -> Self {
        Self {
            cfg,
            mode: Mode::Disabled,
            level: 0.0,
        }
    }

    pub fn state(&self) -> VoiceState {
        match self.mode {
            Mode::Disabled => VoiceState::Disabled,
            Mode::Listening => VoiceState::Listening,
            Mode::Segmenting { .. } => VoiceState::Segmenting,
            Mode::Transcribing => VoiceState::Transcribing,
        }
    }

    /// Smoothed amplitude reading for the level meter.
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Disabled → Listening. No-op in any other state.
    pub fn enable(&mut self) {
        if matches!(self.mode, Mode::Disabled) {
            self.mode = Mode::Listening;
        }
    }

    /// Tear down from any state: pending deadline and in-flight buffer
    /// are discarded. Idempotent.
    pub fn disable(&mut self) {
        self.mode = Mode::Disabled;
        self.level = 0.0;
    }

    /// Transcribing → Listening; the previous utterance's stop is fully
    /// processed and a fresh recording may begin.
    pub fn utterance_handled(&mut self) {
        if matches!(self.mode, Mode::Transcribing) {
            self.mode = Mode::Listening;
        }
    }

    /// Feed one chunk of mono samples captured at `cfg.sample_rate`.
    /// Returns a payload when this chunk completes an utterance.
    pub fn push_samples(&mut self, samples: &[f32], now: Instant) -> Option<UtterancePayload> {
        if samples.is_empty() {
            return None;
        }
        let rms = chunk_rms(samples);
        self.level = self.level * (1.0 - LEVEL_SMOOTHING) + rms * LEVEL_SMOOTHING;

        match &mut self.mode {
            Mode::Disabled | Mode::Transcribing => None,
            Mode::Listening => {
                if rms > self.cfg.speech_threshold {
                    tracing::debug!(rms, "speech onset");
                    self.mode = Mode::Segmenting {
                        buffer: samples.to_vec(),
                        silence_deadline: None,
                    };
                }
                None
            }
            Mode::Segmenting {
                buffer,
                silence_deadline,
            } => {
                buffer.extend_from_slice(samples);

                if rms > self.cfg.speech_threshold {
                    // Still talking; cancel the pending silence timer.
                    *silence_deadline = None;
                    return None;
                }

                let deadline = *silence_deadline.get_or_insert(now + self.cfg.silence_window);
                if now < deadline {
                    return None;
                }

                // Silence held for the full window: close the turn.
                let Mode::Segmenting { buffer, .. } =
                    std::mem::replace(&mut self.mode, Mode::Transcribing)
                else {
                    unreachable!("mode was just matched as Segmenting");
                };
                match self.package(buffer) {
                    Some(payload) => {
                        tracing::info!(
                            samples = payload.sample_count,
                            bytes = payload.base64_wav.len(),
                            "utterance complete"
                        );
                        Some(payload)
                    }
                    None => {
                        // Degenerate clip: skip the gateway entirely.
                        tracing::debug!("utterance below minimum size; discarded");
                        self.mode = Mode::Listening;
                        None
                    }
                }
            }
        }
    }

    /// Encode the buffered span as base64 WAV, or `None` when the clip
    /// is below the minimum payload size.
    fn package(&self, buffer: Vec<f32>) -> Option<UtterancePayload> {
        let sample_count = buffer.len();
        let wav = encode_wav_pcm16(&buffer, self.cfg.sample_rate);
        if wav.len() < self.cfg.min_payload_bytes {
            return None;
        }
        Some(UtterancePayload {
            base64_wav: base64::engine::general_purpose::STANDARD.encode(&wav),
            sample_count,
            sample_rate: self.cfg.sample_rate,
        })
    }
}

fn chunk_rms(samples: &[f32]) -> f32 {
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Pack f32 samples into a 16-bit PCM mono WAV container.
fn encode_wav_pcm16(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut out = Cursor::new(Vec::new());
    {
        // Writing into an in-memory cursor cannot fail.
        let mut writer = hound::WavWriter::new(&mut out, spec).unwrap();
        for &s in samples {
            let clamped = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(clamped).unwrap();
        }
        writer.finalize().unwrap();
    }
    out.into_inner()
}
