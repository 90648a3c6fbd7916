//! Bridges between the hardware/gateway crates and the session traits.
//!
//! The state machines only know capability traits; these adapters bind
//! them to the real V4L2 camera and the hosted TTS path.

use mingle_gateway::McClient;
use mingle_hw::{AudioSink, Camera};
use mingle_session::{ActiveCamera, FrameSource, Speaker};

const JPEG_QUALITY: u8 = 80;
const GRAB_ATTEMPTS: usize = 5;

/// Opens the configured V4L2 device on demand.
pub struct V4lSource {
    device: String,
}

impl V4lSource {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl FrameSource for V4lSource {
    type Camera = KioskCamera;

    fn open(&mut self) -> Result<KioskCamera, String> {
        Camera::open(&self.device)
            .map(KioskCamera)
            .map_err(|err| format!("camera unavailable: {err}"))
    }
}

/// An open camera; dropping it releases the device.
pub struct KioskCamera(Camera);

impl ActiveCamera for KioskCamera {
    fn grab_jpeg(&mut self) -> Result<Vec<u8>, String> {
        let frame = self
            .0
            .capture_usable_frame(GRAB_ATTEMPTS)
            .map_err(|err| format!("frame capture failed: {err}"))?;
        frame
            .to_jpeg(JPEG_QUALITY)
            .map_err(|err| format!("jpeg encode failed: {err}"))
    }
}

/// Speaks MC replies through hosted TTS and the default audio output.
pub struct McSpeaker {
    mc: McClient,
    sink: AudioSink,
}

impl McSpeaker {
    pub fn new(mc: McClient, sink: AudioSink) -> Self {
        Self { mc, sink }
    }
}

impl Speaker for McSpeaker {
    /// Synthesis or playback failure is logged and swallowed; a mute
    /// kiosk still chats.
    async fn speak(&self, text: &str) {
        let wav = match self.mc.synthesize(text).await {
            Ok(wav) => wav,
            Err(err) => {
                tracing::warn!(error = %err, "speech synthesis failed");
                return;
            }
        };
        let sink = self.sink.clone();
        let played = tokio::task::spawn_blocking(move || sink.play_wav_blocking(&wav)).await;
        match played {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "speech playback failed"),
            Err(err) => tracing::warn!(error = %err, "playback task failed"),
        }
    }

    fn stop(&self) {
        self.sink.stop_all();
    }
}
