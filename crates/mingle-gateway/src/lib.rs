//! mingle-gateway — HTTP collaborators for the kiosk.
//!
//! Everything the kiosk can't do locally lives behind a hosted API:
//! face-descriptor extraction ([`face::FaceService`]), the generative
//! MC ([`mc::McClient`]), and the spreadsheet-backed event feeds
//! ([`feeds::FeedsClient`]). All of them degrade gracefully; a kiosk
//! with no network still boots and runs.

pub mod error;
pub mod face;
pub mod feeds;
pub mod mc;

pub use error::{GatewayError, Result};
pub use face::FaceService;
pub use feeds::{Attendee, FeedsClient, WorldChatPoller, ATTENDEE_DISPLAY_CAP, WORLD_CHAT_POLL_INTERVAL};
pub use mc::{McClient, APOLOGY_REPLY};
