use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimensionality of the hosted recognition model's face descriptors.
pub const DESCRIPTOR_DIM: usize = 128;

/// Euclidean distance below which a probe counts as the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor has {0} dimensions, expected {DESCRIPTOR_DIM}")]
    WrongDimension(usize),
}

/// Fixed-length face descriptor vector.
///
/// Serialized as a plain numeric array for portability. Construction via
/// [`Descriptor::new`] validates dimensionality; deserialized values are
/// re-checked by the store at load time so a corrupt file never reaches
/// the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    /// Build a descriptor, rejecting wrong-dimension vectors.
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.len() != DESCRIPTOR_DIM {
            return Err(DescriptorError::WrongDimension(values.len()));
        }
        Ok(Self { values })
    }

    /// Wrap a raw vector without validation. Used by tests and by the
    /// store's load path, which validates separately.
    pub fn from_raw(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Whether this descriptor has the model's expected dimensionality.
    pub fn is_standard(&self) -> bool {
        self.values.len() == DESCRIPTOR_DIM
    }

    /// Euclidean distance to another descriptor. Lower = more similar.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One chat transcript entry. Immutable once created; ordering is
/// insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_avatar: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        user_avatar: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            user_avatar: user_avatar.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// An enrolled kiosk user.
///
/// The descriptor is immutable after enrollment; the history is
/// append-only and replaced wholesale on each update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub descriptor: Descriptor,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub avatar_url: String,
}

/// Result of matching a probe descriptor against the enrolled set.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub matched: bool,
    /// Euclidean distance of the nearest enrolled descriptor.
    pub distance: f32,
    /// ID of the matched profile (if any).
    pub profile_id: Option<String>,
    /// Name of the matched profile (if any).
    pub profile_name: Option<String>,
}

impl MatchOutcome {
    pub fn no_match(distance: f32) -> Self {
        Self {
            matched: false,
            distance,
            profile_id: None,
            profile_name: None,
        }
    }
}

/// Strategy for comparing a probe descriptor against enrolled profiles.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Descriptor,
        gallery: &[UserProfile],
        threshold: f32,
    ) -> MatchOutcome;
}

/// Euclidean nearest-neighbor matcher.
///
/// Pure function of (probe, gallery, threshold): returns the profile
/// with minimal distance iff that minimum is strictly below the
/// threshold. Ties keep the first minimal entry, so results are stable
/// for identical inputs. Wrong-dimension gallery entries are skipped,
/// never an error; an empty gallery is always a no-match.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        probe: &Descriptor,
        gallery: &[UserProfile],
        threshold: f32,
    ) -> MatchOutcome {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, profile) in gallery.iter().enumerate() {
            if profile.descriptor.len() != probe.len() {
                tracing::debug!(
                    profile = %profile.id,
                    dims = profile.descriptor.len(),
                    "skipping profile with mismatched descriptor dimensions"
                );
                continue;
            }
            let dist = probe.distance(&profile.descriptor);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < threshold => MatchOutcome {
                matched: true,
                distance: best_dist,
                profile_id: Some(gallery[idx].id.clone()),
                profile_name: Some(gallery[idx].name.clone()),
            },
            _ => MatchOutcome::no_match(if best_dist.is_finite() { best_dist } else { 0.0 }),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_profile(id: &str, name: &str, descriptor: Vec<f32>) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        name: name.to_string(),
        descriptor: Descriptor::from_raw(descriptor),
        history: Vec::new(),
        avatar_url: String::new(),
    }
}
