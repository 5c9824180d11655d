//! Credential bundle persistence.
//!
//! The remote service hands back rotated credential material during a live
//! session; losing the latest bundle forces a full re-pairing, so saves are
//! atomic (write-then-rename) and fsynced before they count as complete.
//!
//! The supervisor treats the bundle as opaque JSON: it loads it at startup,
//! forwards updates verbatim, and wipes it only on an explicit logout.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BUNDLE_FILE: &str = "creds.json";
const BUNDLE_TMP: &str = "creds.json.tmp";

/// Opaque durable secret state allowing reconnection without re-pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle(serde_json::Value);

impl CredentialBundle {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable storage for the credential bundle.
pub trait CredentialStore: Send + Sync {
    /// Load the persisted bundle, or `None` if the account has never paired.
    fn load(&self) -> Result<Option<CredentialBundle>, CredentialError>;

    /// Persist a bundle. Must be durable on return.
    fn save(&self, bundle: &CredentialBundle) -> Result<(), CredentialError>;

    /// Destroy the persisted bundle. Missing bundle is not an error.
    fn wipe(&self) -> Result<(), CredentialError>;
}

/// File-backed store keeping `creds.json` under a directory.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn bundle_path(&self) -> PathBuf {
        self.dir.join(BUNDLE_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<CredentialBundle>, CredentialError> {
        let path = self.bundle_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, bundle: &CredentialBundle) -> Result<(), CredentialError> {
        fs::create_dir_all(&self.dir)?;

        let temp_path = self.dir.join(BUNDLE_TMP);
        let json = serde_json::to_string_pretty(bundle)?;

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, self.bundle_path())?;

        Ok(())
    }

    fn wipe(&self) -> Result<(), CredentialError> {
        match fs::remove_file(self.bundle_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
