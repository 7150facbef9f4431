//! Animation storage for the reference server.
//!
//! Each armature is a pair of files in the data directory:
//! ```text
//! <DATA_DIR>/
//!   <armature>.anim.json   animation payload, served as-is
//!   <armature>.rest.json   bone rest poses (optional)
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use rigsync_core::BoneRest;

const ANIM_SUFFIX: &str = ".anim.json";
const REST_SUFFIX: &str = ".rest.json";

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error reading or writing a file.
    IoError(PathBuf, io::Error),
    /// A rest pose file that is not a JSON object.
    InvalidRestFile(PathBuf, String),
    /// Invalid armature name (e.g., contains path separators).
    InvalidArmature(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            StorageError::InvalidRestFile(path, e) => {
                write!(f, "Invalid rest pose file {}: {}", path.display(), e)
            }
            StorageError::InvalidArmature(name) => {
                write!(f, "Invalid armature name: {}", name)
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(_, e) => Some(e),
            _ => None,
        }
    }
}

/// File-backed store of armature animations.
#[derive(Debug, Clone)]
pub struct AnimationStore {
    data_dir: PathBuf,
}

impl AnimationStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Validates an armature name to prevent path traversal attacks.
    pub fn validate_armature(name: &str) -> Result<(), StorageError> {
        if name.trim().is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.starts_with('.')
        {
            return Err(StorageError::InvalidArmature(name.to_string()));
        }
        Ok(())
    }

    fn anim_path(&self, armature: &str) -> PathBuf {
        self.data_dir.join(format!("{}{}", armature, ANIM_SUFFIX))
    }

    fn rest_path(&self, armature: &str) -> PathBuf {
        self.data_dir.join(format!("{}{}", armature, REST_SUFFIX))
    }

    /// Lists every armature with an animation or rest pose file, sorted.
    ///
    /// A missing data directory is an empty list.
    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::IoError(self.data_dir.clone(), e)),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::IoError(self.data_dir.clone(), e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let name = file_name
                .strip_suffix(ANIM_SUFFIX)
                .or_else(|| file_name.strip_suffix(REST_SUFFIX));
            if let Some(name) = name {
                if Self::validate_armature(name).is_ok() {
                    names.insert(name.to_string());
                }
            }
        }

        Ok(names.into_iter().collect())
    }

    /// Returns the stored animation bytes.
    ///
    /// Returns `Ok(None)` if the armature has no animation yet.
    pub fn load(&self, armature: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Self::validate_armature(armature)?;

        let path = self.anim_path(armature);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::IoError(path, e)),
        }
    }

    /// Stores animation bytes for an armature.
    ///
    /// Creates the data directory if it doesn't exist.
    pub fn save(&self, armature: &str, bytes: &[u8]) -> Result<(), StorageError> {
        Self::validate_armature(armature)?;

        fs::create_dir_all(&self.data_dir)
            .map_err(|e| StorageError::IoError(self.data_dir.clone(), e))?;

        let path = self.anim_path(armature);

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("json.tmp");

        fs::write(&temp_path, bytes).map_err(|e| StorageError::IoError(temp_path.clone(), e))?;

        fs::rename(&temp_path, &path).map_err(|e| StorageError::IoError(path, e))?;

        Ok(())
    }

    /// Returns the bone rest poses of an armature, empty when none are stored.
    pub fn rest_pose(&self, armature: &str) -> Result<BoneRest, StorageError> {
        Self::validate_armature(armature)?;

        let path = self.rest_path(armature);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::InvalidRestFile(path, e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BoneRest::new()),
            Err(e) => Err(StorageError::IoError(path, e)),
        }
    }

    /// Stores bone rest poses for an armature.
    pub fn save_rest_pose(&self, armature: &str, bones: &BoneRest) -> Result<(), StorageError> {
        Self::validate_armature(armature)?;

        fs::create_dir_all(&self.data_dir)
            .map_err(|e| StorageError::IoError(self.data_dir.clone(), e))?;

        let path = self.rest_path(armature);
        let bytes = serde_json::to_vec_pretty(bones)
            .map_err(|e| StorageError::InvalidRestFile(path.clone(), e.to_string()))?;
        fs::write(&path, bytes).map_err(|e| StorageError::IoError(path, e))
    }
}
