//! On-disk layout of user files.
//!
//! Completed files live at `{workspace}/{username}/{category folder}/{filename}`;
//! uploads in progress are written next to them with [`STAGING_SUFFIX`].

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::validation::validate_path_segment;
use crate::{STAGING_SUFFIX, TransferError};

/// File classification deciding the per-user subfolder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    File,
    Image,
    Music,
}

impl Category {
    /// Every category, in folder-creation order.
    pub const ALL: [Category; 3] = [Category::File, Category::Image, Category::Music];

    /// Name of the per-user folder holding this category.
    pub fn folder(self) -> &'static str {
        match self {
            Category::File => "files",
            Category::Image => "images",
            Category::Music => "music",
        }
    }

    /// Wire name of the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::File => "file",
            Category::Image => "image",
            Category::Music => "music",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Category::File),
            "image" => Ok(Category::Image),
            "music" => Ok(Category::Music),
            other => Err(TransferError::UnknownCategory(other.to_string())),
        }
    }
}

/// Root directory holding every user's files.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves the final path of a user's file.
    ///
    /// `username` and `filename` must not escape their folders.
    pub fn file_path(
        &self,
        username: &str,
        category: Category,
        filename: &str,
    ) -> Result<PathBuf, TransferError> {
        if filename.is_empty() {
            return Err(TransferError::EmptyFilename);
        }
        validate_path_segment(username)?;
        validate_path_segment(filename)?;

        Ok(self
            .root
            .join(username)
            .join(category.folder())
            .join(filename))
    }

    /// Creates the category folders for `username`. Safe to call repeatedly.
    pub fn provision_user(&self, username: &str) -> Result<(), TransferError> {
        validate_path_segment(username)?;
        let user_dir = self.root.join(username);
        for category in Category::ALL {
            let dir = user_dir.join(category.folder());
            std::fs::create_dir_all(&dir)
                .map_err(|e| TransferError::internal("provision_user", e))?;
        }
        tracing::info!(user = username, "user workspace provisioned");
        Ok(())
    }
}

/// Returns the staging path for an in-progress upload of `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}
