//! Drive paths of the form `name:/relative/path`, mapped onto host directories.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriveError {
    #[error("malformed drive path `{0}` (expected `drive:/path`)")]
    Malformed(String),
    #[error("unknown drive `{0}`")]
    UnknownDrive(String),
    #[error("drive path `{0}` leaves its drive")]
    Escapes(String),
}

#[derive(Debug, Clone, Default)]
pub struct DriveTable {
    drives: IndexMap<String, PathBuf>,
}

impl DriveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `name` to `root`, replacing any previous mapping.
    pub fn insert(&mut self, name: impl Into<String>, root: impl Into<PathBuf>) {
        self.drives.insert(name.into(), root.into());
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.drives.get(name).map(PathBuf::as_path)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drives.keys().map(String::as_str)
    }

    pub fn resolve(&self, drive_path: &str) -> Result<PathBuf, DriveError> {
        let result = self.resolve_inner(drive_path);
        if let Err(err) = &result {
            tracing::warn!(drive_path, %err, "drive path rejected");
        }
        result
    }

    fn resolve_inner(&self, drive_path: &str) -> Result<PathBuf, DriveError> {
        let (name, relative) = drive_path
            .split_once(":/")
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| DriveError::Malformed(drive_path.to_string()))?;
        let root = self
            .drives
            .get(name)
            .ok_or_else(|| DriveError::UnknownDrive(name.to_string()))?;

        let relative = Path::new(relative);
        let mut resolved = root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(DriveError::Escapes(drive_path.to_string()));
                }
            }
        }
        Ok(resolved)
    }
}

/// Reads a whole file as raw bytes.
pub fn read_file(path: &Path) -> io::Result<Vec<u8>> {
    std::fs::read(path)
}
