//! File persistence for image references used by the CLI.
//!
//! Each image spec lives in `<root>/<name>.json` so that `image create`,
//! `image ready` and `image destroy` can run as separate invocations.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::reference::ImageSpec;

/// Default directory for stored references, relative to the working
/// directory.
pub const DEFAULT_STORE_DIR: &str = ".ruslan";

const SPEC_EXTENSION: &str = "json";

/// Errors raised while reading or writing stored references.
#[derive(Debug, Error)]
pub enum ReferenceStoreError {
    /// The spec name cannot be used as a file name.
    #[error("invalid spec name '{name}': {message}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Why the name was rejected.
        message: String,
    },
    /// File system access failed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// A stored document could not be parsed or rendered.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path of the document.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Abstraction over image spec persistence for dependency injection.
pub trait ImageSpecStore {
    /// Loads the spec named `name`, or a fresh spec with an empty reference
    /// when none has been stored.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceStoreError`] when the name is invalid or the stored
    /// document cannot be read.
    fn load_image(&self, name: &str) -> Result<ImageSpec, ReferenceStoreError>;

    /// Persists `spec`, replacing any previous document.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceStoreError`] when the document cannot be written.
    fn save_image(&self, spec: &ImageSpec) -> Result<Utf8PathBuf, ReferenceStoreError>;

    /// Forgets the spec named `name`. Missing documents are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceStoreError`] when the document cannot be removed.
    fn remove_image(&self, name: &str) -> Result<(), ReferenceStoreError>;
}

/// Stores one JSON document per image spec under a root directory.
#[derive(Clone, Debug)]
pub struct ReferenceStore {
    root: Utf8PathBuf,
}

impl ReferenceStore {
    /// Creates a store rooted at `root`. The directory is created on first
    /// write.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the stored documents.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn file_name(name: &str) -> Result<String, ReferenceStoreError> {
        let trimmed = name.trim();
        let reason = if trimmed.is_empty() {
            Some("name is empty")
        } else if trimmed.starts_with('.') {
            Some("name must not start with '.'")
        } else if trimmed.contains(['/', '\\']) {
            Some("name must not contain path separators")
        } else {
            None
        };
        match reason {
            Some(message) => Err(ReferenceStoreError::InvalidName {
                name: name.to_owned(),
                message: message.to_owned(),
            }),
            None => Ok(format!("{trimmed}.{SPEC_EXTENSION}")),
        }
    }

    fn io_error(path: &Utf8Path, err: &io::Error) -> ReferenceStoreError {
        ReferenceStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Opens the root directory, or `None` when it does not exist yet.
    fn open_root(&self) -> Result<Option<Dir>, ReferenceStoreError> {
        match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => Ok(Some(dir)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_error(&self.root, &err)),
        }
    }
}

impl Default for ReferenceStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_DIR)
    }
}

impl ImageSpecStore for ReferenceStore {
    fn load_image(&self, name: &str) -> Result<ImageSpec, ReferenceStoreError> {
        let file_name = Self::file_name(name)?;
        let path = self.root.join(&file_name);
        let Some(dir) = self.open_root()? else {
            return Ok(ImageSpec::new(name.trim()));
        };
        let contents = match dir.read_to_string(&file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(ImageSpec::new(name.trim()));
            }
            Err(err) => return Err(Self::io_error(&path, &err)),
        };
        if contents.trim().is_empty() {
            return Ok(ImageSpec::new(name.trim()));
        }

        let mut spec: ImageSpec =
            serde_json::from_str(&contents).map_err(|err| ReferenceStoreError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })?;
        if spec.name.trim().is_empty() {
            name.trim().clone_into(&mut spec.name);
        }
        Ok(spec)
    }

    fn save_image(&self, spec: &ImageSpec) -> Result<Utf8PathBuf, ReferenceStoreError> {
        let file_name = Self::file_name(&spec.name)?;
        let path = self.root.join(&file_name);
        Dir::create_ambient_dir_all(&self.root, ambient_authority())
            .map_err(|err| Self::io_error(&self.root, &err))?;
        let dir = Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| Self::io_error(&self.root, &err))?;

        let rendered =
            serde_json::to_string_pretty(spec).map_err(|err| ReferenceStoreError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })?;
        dir.write(&file_name, rendered)
            .map_err(|err| Self::io_error(&path, &err))?;
        tracing::debug!(%path, "stored image reference");
        Ok(path)
    }

    fn remove_image(&self, name: &str) -> Result<(), ReferenceStoreError> {
        let file_name = Self::file_name(name)?;
        let Some(dir) = self.open_root()? else {
            return Ok(());
        };
        match dir.remove_file(&file_name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_error(&self.root.join(&file_name), &err)),
        }
    }
}
