//! mingle-session — The kiosk's state machines.
//!
//! [`capture::FaceCaptureSession`] drives the face-login flow,
//! [`voice::VoiceTurnController`] segments microphone input into
//! utterances, and [`convo::ConversationSession`] orchestrates both
//! against the hosted MC collaborators. Devices and remote services are
//! injected capabilities so every machine is testable with fakes.

pub mod capture;
pub mod convo;
pub mod voice;

pub use capture::{
    ActiveCamera, CaptureError, CaptureEvent, CaptureState, FaceAnalyzer, FaceCaptureSession,
    FrameSource,
};
pub use convo::{ConversationSession, Persona, ReplyGenerator, SessionError, Speaker, VoiceGateway, VoiceTurn};
pub use voice::{UtterancePayload, VoiceTurnConfig, VoiceTurnController, VoiceState};
