//! Persisted collection of enrolled user profiles.
//!
//! One JSON document holding every [`UserProfile`]; the kiosk is the
//! single writer, so every mutation rewrites the whole file
//! (last-writer-wins, no partial merge).

use crate::types::{
    ChatMessage, Descriptor, DescriptorError, EuclideanMatcher, MatchOutcome, Matcher,
    UserProfile,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("profile not found: {0}")]
    NotFound(String),
}

/// In-memory view of the enrolled user set, backed by a JSON file.
pub struct BiometricStore {
    path: Option<PathBuf>,
    profiles: Vec<UserProfile>,
}

impl BiometricStore {
    /// Load the store from `path`.
    ///
    /// A missing file yields an empty store. An unreadable file also
    /// yields an empty store (with a warning) so a corrupt write can
    /// never brick login for everyone. Entries whose descriptor does not
    /// have the model's dimensionality are skipped with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no store file; starting empty");
            return Ok(Self {
                path: Some(path.to_path_buf()),
                profiles: Vec::new(),
            });
        }

        let raw = std::fs::read_to_string(path)?;
        let parsed: Vec<UserProfile> = match serde_json::from_str(&raw) {
            Ok(profiles) => profiles,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "store file unreadable; starting empty"
                );
                Vec::new()
            }
        };

        let mut profiles = Vec::with_capacity(parsed.len());
        for profile in parsed {
            if !profile.descriptor.is_standard() {
                tracing::warn!(
                    profile = %profile.id,
                    name = %profile.name,
                    dims = profile.descriptor.len(),
                    "skipping profile with malformed descriptor"
                );
                continue;
            }
            if profiles.iter().any(|p: &UserProfile| p.id == profile.id) {
                tracing::warn!(profile = %profile.id, "skipping duplicate profile id");
                continue;
            }
            profiles.push(profile);
        }

        tracing::info!(path = %path.display(), count = profiles.len(), "store loaded");
        Ok(Self {
            path: Some(path.to_path_buf()),
            profiles,
        })
    }

    /// An unbacked store for tests and dry runs; `save` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            profiles: Vec::new(),
        }
    }

    /// Rewrite the persisted copy in full.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&self.profiles)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), count = self.profiles.len(), "store saved");
        Ok(())
    }

    /// Enroll a new user from a probe descriptor. Validates the
    /// descriptor dimensionality before anything is persisted.
    pub fn enroll(
        &mut self,
        name: impl Into<String>,
        descriptor: Vec<f32>,
        avatar_url: impl Into<String>,
    ) -> Result<UserProfile, StoreError> {
        let descriptor = Descriptor::new(descriptor)?;
        let profile = UserProfile {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            descriptor,
            history: Vec::new(),
            avatar_url: avatar_url.into(),
        };
        self.profiles.push(profile.clone());
        self.save()?;
        tracing::info!(profile = %profile.id, name = %profile.name, "enrolled new user");
        Ok(profile)
    }

    /// Replace a profile's chat history wholesale and persist.
    pub fn update_history(
        &mut self,
        profile_id: &str,
        history: Vec<ChatMessage>,
    ) -> Result<(), StoreError> {
        let profile = self
            .profiles
            .iter_mut()
            .find(|p| p.id == profile_id)
            .ok_or_else(|| StoreError::NotFound(profile_id.to_string()))?;
        profile.history = history;
        self.save()
    }

    /// Remove one profile. Returns false if the id is unknown.
    pub fn remove(&mut self, profile_id: &str) -> Result<bool, StoreError> {
        let before = self.profiles.len();
        self.profiles.retain(|p| p.id != profile_id);
        if self.profiles.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Erase every enrolled profile and persist the empty set.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.profiles.clear();
        self.save()?;
        tracing::info!("store cleared");
        Ok(())
    }

    pub fn find(&self, profile_id: &str) -> Option<&UserProfile> {
        self.profiles.iter().find(|p| p.id == profile_id)
    }

    pub fn profiles(&self) -> &[UserProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Nearest-neighbor match of a probe against the enrolled set.
    pub fn match_probe(&self, probe: &Descriptor, threshold: f32) -> MatchOutcome {
        EuclideanMatcher.best_match(probe, &self.profiles, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DESCRIPTOR_DIM;

    fn temp_store_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "mingle-store-test-{tag}-{}.json",
            uuid::Uuid::new_v4()
        ))
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let path = temp_store_path("missing");
        let store = BiometricStore::load(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_enroll_persist_reload_roundtrip() {
        let path = temp_store_path("roundtrip");
        let descriptor = vec![0.125f32; DESCRIPTOR_DIM];

        let mut store = BiometricStore::load(&path).unwrap();
        let profile = store
            .enroll("Nok", descriptor.clone(), "https://example.test/nok.png")
            .unwrap();

        let reloaded = BiometricStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        let restored = reloaded.find(&profile.id).unwrap();
        assert_eq!(restored.name, "Nok");
        for (a, b) in restored
            .descriptor
            .as_slice()
            .iter()
            .zip(descriptor.iter())
        {
            assert!((a - b).abs() < 1e-6);
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_enroll_rejects_wrong_dimension() {
        let mut store = BiometricStore::in_memory();
        let err = store.enroll("Bad", vec![0.0; 12], "").unwrap_err();
        assert!(matches!(err, StoreError::Descriptor(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_skips_malformed_entries() {
        let path = temp_store_path("malformed");
        let json = serde_json::json!([
            {
                "id": "bad",
                "name": "Broken",
                "descriptor": [0.1, 0.2],
                "history": [],
                "avatar_url": ""
            },
            {
                "id": "good",
                "name": "Nok",
                "descriptor": vec![0.5f32; DESCRIPTOR_DIM],
                "history": [],
                "avatar_url": ""
            }
        ]);
        std::fs::write(&path, json.to_string()).unwrap();

        let store = BiometricStore::load(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.find("good").is_some());
        assert!(store.find("bad").is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_tolerates_garbage_file() {
        let path = temp_store_path("garbage");
        std::fs::write(&path, "not json at all").unwrap();
        let store = BiometricStore::load(&path).unwrap();
        assert!(store.is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_no_duplicate_ids_after_load() {
        let path = temp_store_path("dupes");
        let entry = serde_json::json!({
            "id": "same",
            "name": "Nok",
            "descriptor": vec![0.5f32; DESCRIPTOR_DIM],
            "history": [],
            "avatar_url": ""
        });
        std::fs::write(&path, serde_json::json!([entry, entry]).to_string()).unwrap();
        let store = BiometricStore::load(&path).unwrap();
        assert_eq!(store.len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_update_history_and_clear() {
        let mut store = BiometricStore::in_memory();
        let profile = store
            .enroll("Nok", vec![0.5; DESCRIPTOR_DIM], "")
            .unwrap();

        let history = vec![ChatMessage::new("bot", "MC", "", "hello")];
        store.update_history(&profile.id, history).unwrap();
        assert_eq!(store.find(&profile.id).unwrap().history.len(), 1);

        assert!(matches!(
            store.update_history("nope", Vec::new()),
            Err(StoreError::NotFound(_))
        ));

        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_match_probe_uses_threshold() {
        let mut store = BiometricStore::in_memory();
        store.enroll("Nok", vec![0.5; DESCRIPTOR_DIM], "").unwrap();

        let close = Descriptor::from_raw(vec![0.51; DESCRIPTOR_DIM]);
        assert!(store.match_probe(&close, 0.6).matched);

        let far = Descriptor::from_raw(vec![0.9; DESCRIPTOR_DIM]);
        assert!(!store.match_probe(&far, 0.6).matched);
    }
}
