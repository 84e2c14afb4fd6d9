//! I2P identity and its on-disk store
//!
//! The identity file is a pretty-printed JSON object
//! `{"pubDest": "...", "privKey": "..."}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, SamError};

/// Default identity file location, relative to the working directory
pub const DEFAULT_IDENTITY_PATH: &str = "storage/users/identity.json";

/// A destination keypair as handed out by DEST GENERATE.
///
/// Both halves are base64 blobs using the I2P alphabet. The private key
/// is opaque here; it is only ever fed back to SESSION CREATE.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "pubDest")]
    public_destination: String,

    #[serde(rename = "privKey")]
    private_key: String,
}

impl Identity {
    /// Build an identity; both halves must be non-empty.
    pub fn new(public_destination: impl Into<String>, private_key: impl Into<String>) -> Result<Self> {
        let identity = Identity {
            public_destination: public_destination.into(),
            private_key: private_key.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    pub fn public_destination(&self) -> &str {
        &self.public_destination
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Public destination cut down for display
    pub fn short_destination(&self) -> String {
        const SHOWN: usize = 50;
        match self.public_destination.char_indices().nth(SHOWN) {
            Some((idx, _)) => format!("{}...", &self.public_destination[..idx]),
            None => self.public_destination.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.public_destination.is_empty() {
            return Err(SamError::InvalidIdentity(
                "public destination is empty".to_string(),
            ));
        }
        if self.private_key.is_empty() {
            return Err(SamError::InvalidIdentity("private key is empty".to_string()));
        }
        Ok(())
    }
}

// Keep the private key out of logs and panics.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_destination", &self.short_destination())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// File-backed identity persistence
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_PATH)
    }
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        IdentityStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an identity has been saved
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<Identity> {
        let data = fs::read(&self.path).map_err(|e| self.io_error(e))?;
        let identity: Identity =
            serde_json::from_slice(&data).map_err(|e| self.io_error(e.into()))?;
        identity.validate()?;

        debug!("Loaded identity from {}", self.path.display());
        Ok(identity)
    }

    /// Persist `identity`, creating parent directories as needed.
    ///
    /// The JSON is written to a sibling temp file and renamed into place,
    /// so the target is either the old file or the complete new one.
    pub fn save(&self, identity: &Identity) -> Result<()> {
        identity.validate()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let data = serde_json::to_vec_pretty(identity).map_err(|e| self.io_error(e.into()))?;

        let tmp_path = self.tmp_path();
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };
        if let Err(e) = write() {
            fs::remove_file(&tmp_path).ok();
            return Err(self.io_error(e));
        }

        info!("Saved identity to {}", self.path.display());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "identity.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> SamError {
        SamError::StoreIo {
            path: self.path.clone(),
            source,
        }
    }
}
