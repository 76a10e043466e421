// src/exec/sync.rs

use std::fmt::Debug;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::errors::{EngineError, Result};

/// Moves named data items between central storage and the cache local to
/// an execution resource.
pub trait DataSync: Send + Sync + Debug {
    /// Make `item` available in the resource cache.
    fn sync_in(&self, item: &str) -> Result<()>;

    /// Push `item` from the resource cache back to central storage.
    fn sync_out(&self, item: &str) -> Result<()>;
}

/// Implementation that copies between two local directories.
///
/// Items are relative paths; files and whole directory trees are copied.
#[derive(Debug, Clone)]
pub struct LocalSync {
    data_root: PathBuf,
    cache_root: PathBuf,
}

impl LocalSync {
    pub fn new(data_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_path(&self, item: &str) -> Result<PathBuf> {
        Ok(self.cache_root.join(relative_item(item)?))
    }

    pub fn data_path(&self, item: &str) -> Result<PathBuf> {
        Ok(self.data_root.join(relative_item(item)?))
    }
}

impl DataSync for LocalSync {
    fn sync_in(&self, item: &str) -> Result<()> {
        let from = self.data_path(item)?;
        let to = self.cache_path(item)?;
        copy_item(item, &from, &to)?;
        debug!(item = %item, to = ?to, "synchronized into cache");
        Ok(())
    }

    fn sync_out(&self, item: &str) -> Result<()> {
        let from = self.cache_path(item)?;
        let to = self.data_path(item)?;
        copy_item(item, &from, &to)?;
        debug!(item = %item, to = ?to, "synchronized to data store");
        Ok(())
    }
}

/// Reject items that would escape the roots.
fn relative_item(item: &str) -> Result<&Path> {
    let path = Path::new(item);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if item.trim().is_empty() || escapes {
        return Err(EngineError::Sync(format!(
            "data item {item:?} must be a relative path inside the data store"
        )));
    }
    Ok(path)
}

fn copy_item(item: &str, from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        return Err(EngineError::Sync(format!(
            "data item {item:?} not found at {from:?}"
        )));
    }
    copy_tree(from, to)?;
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> anyhow::Result<()> {
    if from.is_dir() {
        fs::create_dir_all(to).with_context(|| format!("creating dir {:?}", to))?;
        for entry in fs::read_dir(from).with_context(|| format!("reading dir {:?}", from))? {
            let entry = entry?;
            copy_tree(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        fs::copy(from, to).with_context(|| format!("copying {:?} to {:?}", from, to))?;
    }
    Ok(())
}
