use crate::common::{FaceAuthError, Result};
use crate::core::signature::Signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const STORAGE_VERSION: u32 = 1;
const FILE_EXTENSION: &str = "sig";
/// File names are capped at 255 bytes on Linux filesystems; leave room for ".sig".
const MAX_USERNAME_BYTES: usize = 255 - FILE_EXTENSION.len() - 1;

#[derive(Debug, Serialize, Deserialize)]
struct SignatureRecord {
    version: u32,
    username: String,
    dimension: u32,
    created_at: String,
    values: Vec<f32>,
    digest: [u8; 32],
}

fn values_digest(values: &[f32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for v in values {
        hasher.update(v.to_le_bytes());
    }
    hasher.finalize().into()
}

/// Rejects names that could escape the storage directory.
pub fn validate_username(username: &str) -> Result<()> {
    let reason = if username.is_empty() {
        Some("empty")
    } else if username.contains('/') || username.contains('\\') {
        Some("contains a path separator")
    } else if username.contains('\0') {
        Some("contains NUL")
    } else if username.starts_with('.') {
        Some("starts with '.'")
    } else if username.len() > MAX_USERNAME_BYTES {
        Some("too long")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(FaceAuthError::InvalidUsername {
            username: username.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// One signature file per user under `data_dir`.
#[derive(Debug, Clone)]
pub struct SignatureStore {
    data_dir: PathBuf,
    dimension: usize,
}

impl SignatureStore {
    pub fn new(data_dir: impl Into<PathBuf>, dimension: usize) -> Self {
        Self { data_dir: data_dir.into(), dimension }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn path_for(&self, username: &str) -> Result<PathBuf> {
        validate_username(username)?;
        Ok(self.data_dir.join(format!("{}.{}", username, FILE_EXTENSION)))
    }

    pub fn save(&self, username: &str, signature: &Signature) -> Result<PathBuf> {
        let path = self.path_for(username)?;

        if signature.dimension() != self.dimension {
            return Err(FaceAuthError::InvalidSignature(format!(
                "dimension {} does not match expected {}",
                signature.dimension(),
                self.dimension
            )));
        }

        fs::create_dir_all(&self.data_dir).map_err(|source| FaceAuthError::StorageUnavailable {
            path: self.data_dir.clone(),
            source,
        })?;

        let values = signature.as_slice().to_vec();
        let record = SignatureRecord {
            version: STORAGE_VERSION,
            username: username.to_string(),
            dimension: values.len() as u32,
            created_at: Utc::now().to_rfc3339(),
            digest: values_digest(&values),
            values,
        };
        let encoded = bincode::serialize(&record)
            .map_err(|e| FaceAuthError::InvalidSignature(format!("Failed to serialize: {}", e)))?;

        let write_failed = |source| FaceAuthError::WriteFailed { path: path.clone(), source };

        // The temp file is unlinked on drop unless it is persisted.
        let mut tmp = NamedTempFile::new_in(&self.data_dir).map_err(write_failed)?;
        {
            let file = tmp.as_file_mut();
            let mut writer = BufWriter::new(&mut *file);
            writer.write_all(&encoded).map_err(write_failed)?;
            writer.flush().map_err(write_failed)?;
        }
        tmp.as_file().sync_all().map_err(write_failed)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(write_failed)?;
        }

        tmp.persist(&path).map_err(|err| write_failed(err.error))?;

        tracing::info!("Stored signature for {} at {}", username, path.display());
        Ok(path)
    }

    pub fn load(&self, username: &str) -> Result<Signature> {
        let path = self.path_for(username)?;

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FaceAuthError::NotEnrolled(username.to_string()));
            }
            Err(source) => return Err(FaceAuthError::StorageUnavailable { path, source }),
        };

        let corrupt = |message: String| FaceAuthError::CorruptData { path: path.clone(), message };

        let record: SignatureRecord = bincode::deserialize(&data)
            .map_err(|e| corrupt(format!("Failed to deserialize: {}", e)))?;

        if record.version != STORAGE_VERSION {
            return Err(corrupt(format!("unsupported version {}", record.version)));
        }
        if record.username != username {
            return Err(corrupt(format!("file belongs to '{}'", record.username)));
        }
        if record.dimension as usize != record.values.len() || record.values.len() != self.dimension {
            return Err(corrupt(format!(
                "dimension {} does not match expected {}",
                record.values.len(),
                self.dimension
            )));
        }
        if values_digest(&record.values) != record.digest {
            return Err(corrupt("digest mismatch".into()));
        }
        if DateTime::parse_from_rfc3339(&record.created_at).is_err() {
            return Err(corrupt(format!("bad timestamp '{}'", record.created_at)));
        }

        Signature::from_normalized(record.values).map_err(|e| corrupt(e.to_string()))
    }

    /// Deletes the user's signature. Returns whether one existed.
    pub fn remove(&self, username: &str) -> Result<bool> {
        let path = self.path_for(username)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("Removed signature for {}", username);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(FaceAuthError::WriteFailed { path, source }),
        }
    }

    pub fn is_enrolled(&self, username: &str) -> Result<bool> {
        Ok(self.path_for(username)?.is_file())
    }
}
