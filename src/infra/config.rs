//! Signing profile support.
//!
//! A profile is a small TOML file carrying the signature metadata and TSA
//! settings that otherwise have to be repeated on every CLI invocation.

use crate::infra::error::{SignError, SignResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Persisted signing preferences loaded with `--profile`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningProfile {
    /// Signer name placed in the signature dictionary
    pub name: Option<String>,
    pub location: Option<String>,
    pub reason: Option<String>,
    pub contact_info: Option<String>,

    /// Digest algorithm name (sha256, sha384, sha512)
    pub digest_algorithm: Option<String>,

    /// Timestamp authority settings
    pub tsa_url: Option<String>,
    pub tsa_username: Option<String>,
    pub tsa_password: Option<String>,

    /// Form-fill settings
    pub signer_uid: Option<String>,
    pub date_format: Option<String>,
    pub locale: Option<String>,
}

impl SigningProfile {
    /// Load a profile from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> SignResult<Self> {
        let path = path.as_ref();
        log::info!("Loading signing profile from {}", path.display());

        let content = fs::read_to_string(path).map_err(|e| {
            SignError::ConfigError(format!("failed to read profile {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| SignError::ConfigError(format!("failed to parse profile: {e}")))
    }

    /// Save the profile, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SignResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SignError::ConfigError(format!(
                    "failed to create profile directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SignError::ConfigError(format!("failed to serialize profile: {e}")))?;
        fs::write(path, content).map_err(|e| {
            SignError::ConfigError(format!("failed to write profile {}: {e}", path.display()))
        })?;

        log::info!("Profile saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn profile_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.toml");

        let profile = SigningProfile {
            name: Some("Jane Signer".to_string()),
            reason: Some("Approval".to_string()),
            tsa_url: Some("http://tsa.example/tsr".to_string()),
            ..Default::default()
        };
        profile.save(&path).unwrap();

        let loaded = SigningProfile::load(&path).unwrap();
        assert_eq!(loaded.name.as_deref(), Some("Jane Signer"));
        assert_eq!(loaded.reason.as_deref(), Some("Approval"));
        assert_eq!(loaded.tsa_url.as_deref(), Some("http://tsa.example/tsr"));
        assert!(loaded.locale.is_none());
    }

    #[test]
    fn missing_profile_is_a_config_error() {
        let err = SigningProfile::load("/nonexistent/profile.toml").unwrap_err();
        assert!(matches!(err, SignError::ConfigError(_)));
    }
}
