//! mingle-core — Biometric profiles, descriptor matching, and the
//! floating attendee field simulation.
//!
//! Pure domain logic: no device access and no network. The only I/O in
//! this crate is the JSON persistence of the biometric store.

pub mod field;
pub mod store;
pub mod types;

pub use store::{BiometricStore, StoreError};
pub use types::{
    ChatMessage, Descriptor, DescriptorError, EuclideanMatcher, MatchOutcome, Matcher,
    UserProfile, DEFAULT_MATCH_THRESHOLD, DESCRIPTOR_DIM,
};
