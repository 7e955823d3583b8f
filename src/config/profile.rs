//! Connection profiles
//!
//! A profile is a validated, provider-typed configuration object. Only the
//! factory interprets `settings`, and only for the backend named by
//! `provider_type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::ProviderType;

/// Provider-typed connection profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub provider_type: ProviderType,
    /// Backend-specific settings object
    #[serde(default)]
    pub settings: Value,
}

impl Profile {
    pub fn new(name: impl Into<String>, provider_type: ProviderType, settings: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            provider_type,
            settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_profile() {
        let profile: Profile = serde_json::from_str(
            r#"{"id":"p1","name":"prod","provider_type":"gdrive","settings":{"folder":"x"}}"#,
        )
        .unwrap();
        assert_eq!(profile.provider_type, ProviderType::GoogleDrive);
        assert_eq!(profile.settings["folder"], "x");

        let bare: Profile =
            serde_json::from_str(r#"{"id":"p2","name":"mock","provider_type":"mock"}"#).unwrap();
        assert!(bare.settings.is_null());
    }
}
