//! Concrete providers and the profile-driven factory
//!
//! The factory is the only place that knows every backend. It always hands
//! out resilient-wrapped providers, so retry/backoff applies to every
//! primitive call no matter which backend is active.

pub mod local;
pub mod memory;
pub mod resilient;
#[cfg(feature = "sftp")]
pub mod sftp;

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;

pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use resilient::ResilientProvider;
#[cfg(feature = "sftp")]
pub use sftp::SftpProvider;

use crate::config::{Profile, StorageConfig};
use crate::path_utils::expand_tilde;
use crate::provider::{Capability, CapabilitySet, OperationResult, ProviderError, ProviderType, StorageProvider};

/// Optional collaborators injected into the factory
#[derive(Clone, Default)]
pub struct ProviderDeps {
    /// Pre-built backend used instead of constructing one from the profile
    pub backend: Option<Arc<dyn StorageProvider>>,
}

impl ProviderDeps {
    pub fn with_backend(backend: Arc<dyn StorageProvider>) -> Self {
        Self {
            backend: Some(backend),
        }
    }
}

impl fmt::Debug for ProviderDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDeps")
            .field(
                "backend",
                &self.backend.as_ref().map(|b| b.display_name()),
            )
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct LocalSettings {
    root: String,
}

#[derive(Debug, Default, Deserialize)]
struct MockSettings {
    #[serde(default)]
    capabilities: Option<Vec<Capability>>,
}

fn parse_settings<T: DeserializeOwned>(profile: &Profile) -> OperationResult<T> {
    serde_json::from_value(profile.settings.clone()).map_err(|e| {
        ProviderError::generic(
            "InvalidProfile",
            format!("profile '{}' has invalid settings: {}", profile.name, e),
        )
        .with_cause(e)
    })
}

fn build_backend(profile: &Profile) -> OperationResult<Arc<dyn StorageProvider>> {
    match profile.provider_type {
        ProviderType::Local => {
            let settings: LocalSettings = parse_settings(profile)?;
            Ok(Arc::new(LocalProvider::new(expand_tilde(&settings.root))))
        }
        #[cfg(feature = "sftp")]
        ProviderType::Sftp => {
            let settings: sftp::SftpSettings = parse_settings(profile)?;
            Ok(Arc::new(SftpProvider::new(settings)))
        }
        ProviderType::Mock => {
            let settings: MockSettings = if profile.settings.is_null() {
                MockSettings::default()
            } else {
                parse_settings(profile)?
            };
            let provider = match settings.capabilities {
                Some(caps) => MemoryProvider::with_capabilities(caps.into_iter().collect::<CapabilitySet>()),
                None => MemoryProvider::new(),
            };
            Ok(Arc::new(provider))
        }
        other => Err(ProviderError::unimplemented(&format!("{} provider", other))),
    }
}

/// Build the provider described by `profile`, wrapped for retry/backoff
pub fn create_provider(
    profile: &Profile,
    config: &StorageConfig,
    deps: ProviderDeps,
) -> OperationResult<Arc<dyn StorageProvider>> {
    let backend = match deps.backend {
        Some(backend) => {
            if backend.provider_type() != profile.provider_type {
                return Err(ProviderError::generic(
                    "ProviderTypeMismatch",
                    format!(
                        "profile '{}' is {} but the injected backend is {}",
                        profile.name,
                        profile.provider_type,
                        backend.provider_type()
                    ),
                ));
            }
            backend
        }
        None => build_backend(profile)?,
    };

    info!(
        "Created {} provider '{}' ({})",
        profile.provider_type,
        profile.name,
        backend.display_name()
    );
    Ok(Arc::new(ResilientProvider::new(backend, config.retry.clone())))
}
