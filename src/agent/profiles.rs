//! Model profiles and the registry that resolves and caches them.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::llm::{BackendFactory, ModelBackend};
use crate::error::Error;
use crate::Result;

/// Id of the profile built from the legacy `OPENAI_*` settings.
pub const LEGACY_PROFILE_ID: &str = "default";

/// A named model backend configuration. Immutable once loaded.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub id: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub api_key: String,

    /// Base URL of an OpenAI-compatible API; empty means the vendor default.
    #[serde(default, alias = "base_url")]
    pub endpoint: String,

    #[serde(default, alias = "model")]
    pub model_name: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs", alias = "timeout")]
    pub timeout_secs: u64,
}

pub(crate) fn default_temperature() -> f32 {
    0.2
}

pub(crate) fn default_timeout_secs() -> u64 {
    60
}

impl ModelProfile {
    pub fn new(
        id: impl Into<String>,
        api_key: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            api_key: api_key.into(),
            endpoint: String::new(),
            model_name: model_name.into(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Both credentials and a model name are set.
    pub fn is_usable(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.model_name.trim().is_empty()
    }

    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

impl fmt::Debug for ModelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelProfile")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("endpoint", &self.endpoint)
            .field("model_name", &self.model_name)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// One row of the model picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleProfile {
    pub id: String,
    pub label: String,
    pub model_name: String,
    pub is_default: bool,
}

/// A profile together with its ready-to-use backend.
pub struct BackendBundle {
    pub profile: ModelProfile,
    pub backend: Box<dyn ModelBackend>,
}

/// Registry of model profiles.
///
/// Resolution never fails per request: an unknown or incomplete profile
/// falls back to the default, then to the first usable profile. Backends
/// are built lazily, once per profile id.
pub struct ProfileRegistry {
    profiles: Vec<ModelProfile>,
    default_id: String,
    factory: Arc<dyn BackendFactory>,
    bundles: DashMap<String, Arc<BackendBundle>>,
}

impl ProfileRegistry {
    /// Fails with [`Error::Configuration`] when no profile is usable.
    pub fn new(
        profiles: Vec<ModelProfile>,
        default_id: impl Into<String>,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self> {
        if !profiles.iter().any(ModelProfile::is_usable) {
            return Err(Error::Configuration(
                "no model profile has both an API key and a model name".to_string(),
            ));
        }

        let default_id = default_id.into();
        info!(
            "Loaded {} model profiles (default: {})",
            profiles.len(),
            default_id
        );
        Ok(Self {
            profiles,
            default_id,
            factory,
            bundles: DashMap::new(),
        })
    }

    pub fn get(&self, id: &str) -> Option<&ModelProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Resolve the profile to use for a request.
    pub fn resolve(&self, requested: Option<&str>) -> &ModelProfile {
        if let Some(id) = requested {
            match self.get(id) {
                Some(profile) if profile.is_usable() => return profile,
                Some(_) => warn!("Model profile '{}' is incomplete, using default", id),
                None => warn!("Unknown model profile '{}', using default", id),
            }
        }

        if let Some(profile) = self.get(&self.default_id).filter(|p| p.is_usable()) {
            return profile;
        }

        // `new` guarantees at least one usable profile.
        let fallback = self
            .profiles
            .iter()
            .find(|p| p.is_usable())
            .unwrap_or(&self.profiles[0]);
        debug!(
            "Default profile '{}' unusable, falling back to '{}'",
            self.default_id, fallback.id
        );
        fallback
    }

    /// Profiles for display.
    ///
    /// The legacy profile is hidden whenever another profile exists, and
    /// entries sharing `(endpoint, model_name)` collapse to the first seen.
    pub fn list_visible(&self) -> Vec<VisibleProfile> {
        let has_named = self.profiles.iter().any(|p| p.id != LEGACY_PROFILE_ID);
        let candidates: Vec<&ModelProfile> = self
            .profiles
            .iter()
            .filter(|p| !(has_named && p.id == LEGACY_PROFILE_ID))
            .collect();

        let effective_default = if self.default_id != LEGACY_PROFILE_ID
            && candidates.iter().any(|p| p.id == self.default_id)
        {
            Some(self.default_id.as_str())
        } else {
            candidates.first().map(|p| p.id.as_str())
        };

        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|p| seen.insert((p.endpoint.trim(), p.model_name.trim())))
            .map(|p| VisibleProfile {
                id: p.id.clone(),
                label: p.display_label().to_string(),
                model_name: p.model_name.clone(),
                is_default: Some(p.id.as_str()) == effective_default,
            })
            .collect()
    }

    /// The cached backend bundle for a request, building it on first use.
    pub fn bundle(&self, requested: Option<&str>) -> Result<Arc<BackendBundle>> {
        let profile = self.resolve(requested);

        match self.bundles.entry(profile.id.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                info!(
                    "Building backend for profile '{}' ({})",
                    profile.id, profile.model_name
                );
                let bundle = Arc::new(BackendBundle {
                    profile: profile.clone(),
                    backend: self.factory.build(profile)?,
                });
                entry.insert(Arc::clone(&bundle));
                Ok(bundle)
            }
        }
    }
}
