//! Local key-share persistence.
//!
//! Successful keygen, refresh, reshare and migrate runs persist the
//! engine's key share through this sink; signing and resharing read it
//! back. The file contract is `{pubkey-hex}-{local-party}.json` holding
//! the base64-encoded share bytes with no outer JSON.

use std::path::{Path, PathBuf};

use log::info;

use crate::error::Error;

pub trait LocalStateStore: Send + Sync {
    /// Base64-encoded share bytes for a public key.
    fn get(&self, public_key: &str) -> Result<String, Error>;

    /// Persist the base64-encoded share bytes under a public key.
    fn save(&self, public_key: &str, share: &str) -> Result<(), Error>;
}

pub struct FileStateStore {
    directory: PathBuf,
    local_party_id: String,
}

impl FileStateStore {
    pub fn new(directory: &Path, local_party_id: &str) -> Self {
        Self {
            directory: directory.to_path_buf(),
            local_party_id: local_party_id.to_string(),
        }
    }

    fn share_path(&self, public_key: &str) -> PathBuf {
        self.directory
            .join(format!("{}-{}.json", public_key, self.local_party_id))
    }
}

impl LocalStateStore for FileStateStore {
    fn get(&self, public_key: &str) -> Result<String, Error> {
        let path = self.share_path(public_key);
        if !path.exists() {
            return Err(Error::Persistence(format!(
                "no local share for public key {}",
                public_key
            )));
        }
        std::fs::read_to_string(&path).map_err(|e| {
            Error::Persistence(format!("failed to read share {}: {}", path.display(), e))
        })
    }

    fn save(&self, public_key: &str, share: &str) -> Result<(), Error> {
        let path = self.share_path(public_key);
        std::fs::write(&path, share).map_err(|e| {
            Error::Persistence(format!("failed to write share {}: {}", path.display(), e))
        })?;
        info!("saved key share to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_share_under_the_expected_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path(), "party-1");

        store.save("02abcd", "c2hhcmU=").unwrap();
        assert!(dir.path().join("02abcd-party-1.json").exists());
        assert_eq!(store.get("02abcd").unwrap(), "c2hhcmU=");
        assert!(store.get("02ffff").is_err());
    }
}
