//! mingle-hw — Hardware abstraction for the kiosk devices.
//!
//! Provides V4L2-based camera capture (frames JPEG-encoded for the
//! hosted face service), cpal-based microphone input, and cancellable
//! audio playback for synthesized speech.

pub mod audio;
pub mod camera;
pub mod frame;

pub use audio::{AudioError, AudioSink, MicHandle, Microphone, MIC_SAMPLE_RATE};
pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::Frame;
