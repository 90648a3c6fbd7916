//! Microphone capture and speech playback via cpal.
//!
//! The cpal stream objects are not `Send`, so each device is owned by a
//! dedicated thread; the rest of the kiosk talks to it through channels
//! and atomic stop flags. Stopping a handle deterministically releases
//! the device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capture rate for voice turns. Hosted transcription models expect
/// 16 kHz mono.
pub const MIC_SAMPLE_RATE: u32 = 16_000;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no input device available")]
    NoInputDevice,
    #[error("no output device available")]
    NoOutputDevice,
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("malformed wav payload: {0}")]
    BadWav(String),
    #[error("audio thread failed: {0}")]
    Thread(String),
}

/// Handle to a running microphone capture thread.
///
/// Chunks of mono f32 samples arrive on `rx` as the driver delivers
/// them. Calling [`MicHandle::stop`] (or dropping the handle) tears the
/// stream down and releases the device.
pub struct MicHandle {
    stop: Arc<AtomicBool>,
    rx: mpsc::UnboundedReceiver<Vec<f32>>,
}

impl MicHandle {
    /// Receive the next chunk of captured samples. Returns `None` once
    /// the stream has stopped and the channel drained.
    pub async fn next_chunk(&mut self) -> Option<Vec<f32>> {
        self.rx.recv().await
    }

    /// Signal the capture thread to tear down the stream.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for MicHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Microphone device entry point.
pub struct Microphone;

impl Microphone {
    /// Open the default input device at 16 kHz mono and start streaming
    /// sample chunks. Fails if no device is present or the stream
    /// cannot be built; callers surface the error and retry later.
    pub fn start() -> Result<MicHandle, AudioError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), AudioError>>();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        std::thread::Builder::new()
            .name("mingle-mic".into())
            .spawn(move || {
                let opened = open_input_stream(tx);
                match opened {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        while !thread_stop.load(Ordering::Relaxed) {
                            std::thread::sleep(Duration::from_millis(50));
                        }
                        drop(stream);
                        tracing::debug!("microphone released");
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| AudioError::Thread("mic thread exited before ready".into()))??;

        tracing::info!(sample_rate = MIC_SAMPLE_RATE, "microphone capturing");
        Ok(MicHandle { stop, rx })
    }
}

fn open_input_stream(
    tx: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(AudioError::NoInputDevice)?;
    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(MIC_SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    };

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Receiver gone means the controller shut down first;
                // the thread will notice the stop flag shortly.
                let _ = tx.send(data.to_vec());
            },
            |err| tracing::warn!(error = %err, "microphone stream error"),
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))?;

    stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;
    Ok(stream)
}

/// Speech playback sink with stop-all cancellation.
#[derive(Clone)]
pub struct AudioSink {
    stop: Arc<AtomicBool>,
}

impl Default for AudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel any in-progress playback immediately.
    pub fn stop_all(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Play a WAV payload to the default output device, blocking until
    /// playback completes or [`AudioSink::stop_all`] is called. Run on a
    /// blocking task from async contexts.
    pub fn play_wav_blocking(&self, wav: &[u8]) -> Result<(), AudioError> {
        self.stop.store(false, Ordering::Relaxed);

        let (samples, channels, sample_rate) = decode_wav(wav)?;
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        let shared = Arc::new(samples);
        let pos = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));

        let cb_samples = shared.clone();
        let cb_pos = pos.clone();
        let cb_done = done.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let start = cb_pos.fetch_add(out.len(), Ordering::Relaxed);
                    for (i, slot) in out.iter_mut().enumerate() {
                        *slot = cb_samples.get(start + i).copied().unwrap_or(0.0);
                    }
                    if start + out.len() >= cb_samples.len() {
                        cb_done.store(true, Ordering::Relaxed);
                    }
                },
                |err| tracing::warn!(error = %err, "playback stream error"),
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;

        while !done.load(Ordering::Relaxed) && !self.stop.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(20));
        }
        drop(stream);
        Ok(())
    }
}

/// Decode a WAV payload into f32 samples plus its layout.
fn decode_wav(wav: &[u8]) -> Result<(Vec<f32>, u16, u32), AudioError> {
    let reader =
        hound::WavReader::new(Cursor::new(wav)).map_err(|e| AudioError::BadWav(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(Result::ok)
            .collect(),
        hound::SampleFormat::Int => reader
            .into_samples::<i16>()
            .filter_map(Result::ok)
            .map(|s| s as f32 / i16::MAX as f32)
            .collect(),
    };

    Ok((samples, spec.channels, spec.sample_rate))
}
