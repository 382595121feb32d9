//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tally_core::util::{is_http_url, normalize_text_option};
use tally_core::SyncSettings;

const CONFIG_FILE_NAME: &str = "cli-config.json";
const FALLBACK_DEVICE_ID: &str = "tally-cli";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Unix seconds
    #[serde(default)]
    pub token_expires_at: Option<i64>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSettings>,
}

/// Profile values after environment overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub name: String,
    pub api_base_url: Option<String>,
    pub access_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub user_id: Option<String>,
    pub device_id: String,
    pub settings: SyncSettings,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join("tally").join(CONFIG_FILE_NAME))
        .ok_or_else(|| "Failed to resolve CLI config directory".to_string())
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn env_value(name: &str) -> Option<String> {
    normalize_text_option(std::env::var(name).ok())
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        normalize_profile_name(explicit)
            .or_else(|| normalize_profile_name(env_value("TALLY_PROFILE").as_deref()))
            .or_else(|| normalize_profile_name(self.active_profile.as_deref()))
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    /// Resolve a profile, letting `TALLY_*` environment variables win
    pub fn resolve(&self, explicit: Option<&str>) -> ResolvedProfile {
        let name = self.resolve_profile_name(explicit);
        let profile = self.profile(&name).cloned().unwrap_or_default();
        profile.resolve_with(name, env_value)
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    /// Apply overrides from `lookup` (the process environment outside tests)
    pub fn resolve_with(
        &self,
        name: String,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ResolvedProfile {
        let lookup_token = lookup("TALLY_ACCESS_TOKEN");
        let token_expires_at = if lookup_token.is_some() {
            None
        } else {
            self.token_expires_at
        };

        ResolvedProfile {
            name,
            api_base_url: lookup("TALLY_API_BASE_URL").or_else(|| self.api_base_url.clone()),
            access_token: lookup_token.or_else(|| self.access_token.clone()),
            token_expires_at,
            user_id: lookup("TALLY_USER_ID").or_else(|| self.user_id.clone()),
            device_id: lookup("TALLY_DEVICE_ID")
                .or_else(|| self.device_id.clone())
                .unwrap_or_else(|| FALLBACK_DEVICE_ID.to_string()),
            settings: self.sync.clone().unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url) {
                return Err("api_base_url must include http:// or https://".to_string());
            }
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.access_token = normalize_text_option(self.access_token.take());
        self.user_id = normalize_text_option(self.user_id.take());
        self.device_id = normalize_text_option(self.device_id.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn normalize_profile_name_rejects_empty() {
        assert_eq!(normalize_profile_name(None), None);
        assert_eq!(normalize_profile_name(Some(" ")), None);
        assert_eq!(normalize_profile_name(Some(" work ")), Some("work".to_string()));
    }

    #[test]
    fn config_roundtrip_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = CliProfilesConfig {
            version: 1,
            active_profile: Some("default".to_string()),
            profiles: BTreeMap::new(),
        };
        config.profiles.insert(
            "default".to_string(),
            CliProfile {
                api_base_url: Some(" https://api.tally.app/ ".to_string()),
                access_token: Some(" token ".to_string()),
                token_expires_at: Some(1_900_000_000),
                user_id: Some("user-1".to_string()),
                device_id: Some("   ".to_string()),
                sync: None,
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();
        let profile = loaded.profiles.get("default").unwrap();
        assert_eq!(profile.api_base_url.as_deref(), Some("https://api.tally.app"));
        assert_eq!(profile.access_token.as_deref(), Some("token"));
        assert_eq!(profile.device_id, None);
        assert_eq!(profile.token_expires_at, Some(1_900_000_000));
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CliProfilesConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, CliProfilesConfig::default());
    }

    #[test]
    fn sync_overrides_are_read_in_milliseconds() {
        let raw = r#"{
            "active_profile": "work",
            "profiles": {
                "work": { "user_id": "u1", "sync": { "debounce_ms": 500 } }
            }
        }"#;
        let config: CliProfilesConfig = serde_json::from_str(raw).unwrap();
        let resolved = config.profile("work").unwrap().resolve_with("work".into(), no_env);

        assert_eq!(resolved.settings.debounce, Duration::from_millis(500));
        assert_eq!(resolved.settings.max_attempts, SyncSettings::default().max_attempts);
    }

    #[test]
    fn resolve_profile_name_prefers_explicit_then_active() {
        let config = CliProfilesConfig {
            version: 1,
            active_profile: Some("work".to_string()),
            profiles: BTreeMap::new(),
        };
        assert_eq!(config.resolve_profile_name(Some("mobile")), "mobile");
    }

    #[test]
    fn environment_overrides_profile_values() {
        let profile = CliProfile {
            api_base_url: Some("https://api.tally.app".to_string()),
            access_token: Some("stored".to_string()),
            token_expires_at: Some(1),
            user_id: Some("stored-user".to_string()),
            device_id: None,
            sync: None,
        };
        let resolved = profile.resolve_with("default".into(), |name| match name {
            "TALLY_ACCESS_TOKEN" => Some("from-env".to_string()),
            "TALLY_USER_ID" => Some("env-user".to_string()),
            _ => None,
        });

        assert_eq!(resolved.api_base_url.as_deref(), Some("https://api.tally.app"));
        assert_eq!(resolved.access_token.as_deref(), Some("from-env"));
        assert_eq!(resolved.token_expires_at, None);
        assert_eq!(resolved.user_id.as_deref(), Some("env-user"));
        assert_eq!(resolved.device_id, FALLBACK_DEVICE_ID);
    }

    #[test]
    fn validate_rejects_bare_hosts() {
        let profile = CliProfile {
            api_base_url: Some("api.tally.app".to_string()),
            ..CliProfile::default()
        };
        assert!(profile.validate().is_err());
    }
}
