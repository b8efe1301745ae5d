//! `profiles.json` persistence.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::state::VpnProfile;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfilesDocument {
    #[serde(default)]
    profiles: Vec<VpnProfile>,
}

/// Reads and atomically rewrites the persisted profile list.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads all profiles whose config file still exists.
    ///
    /// A missing document yields an empty list. Profiles whose backing file
    /// vanished are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Vec<VpnProfile>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let document: ProfilesDocument = serde_json::from_str(&content)?;

        Ok(document
            .profiles
            .into_iter()
            .filter(|profile| {
                let present = profile.config_path.exists();
                if !present {
                    log::warn!(
                        "Profile config not found: {}, skipping '{}'",
                        profile.config_path.display(),
                        profile.name
                    );
                }
                present
            })
            .collect())
    }

    /// Replaces the document with `profiles`.
    ///
    /// Writes a sibling temp file and renames it over the document so a
    /// crash never leaves a truncated file behind.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn save<'a>(&self, profiles: impl IntoIterator<Item = &'a VpnProfile>) -> Result<()> {
        let document = ProfilesDocument {
            profiles: profiles.into_iter().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&document)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
