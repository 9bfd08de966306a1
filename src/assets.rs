//! Asset stores
//!
//! "Give me the bytes and modification time for a logical path", backed
//! either by the build-time bundle of `public/` or by a live directory tree.
//!
//! The bundle is loaded once into an immutable map and needs no locking.
//! The live tree is read fresh on every request and confines every lookup
//! to its root: a path that lexically climbs above the root is a miss
//! before the filesystem is touched, and a path whose canonical form
//! (after symlinks) leaves the root is a miss as well.

use async_trait::async_trait;
use axum::body::Bytes;
use rust_embed::RustEmbed;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Embedded frontend build
#[derive(RustEmbed)]
#[folder = "public/"]
pub struct PublicBundle;

/// One servable file
#[derive(Debug, Clone)]
pub struct AssetEntry {
    pub logical_path: String,
    pub content: Bytes,
    pub mod_time: Option<SystemTime>,
}

/// Lookup by exact, case-sensitive logical path
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn load(&self, logical_path: &str) -> Option<AssetEntry>;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// In-memory snapshot
pub struct BundledAssets {
    entries: HashMap<String, AssetEntry>,
}

impl BundledAssets {
    /// Snapshot every file of an embedded folder
    pub fn from_embedded<E: RustEmbed>() -> Self {
        let entries = E::iter().filter_map(|path| {
            let file = E::get(&path)?;
            let mod_time = file
                .metadata
                .last_modified()
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));
            Some(AssetEntry {
                logical_path: path.to_string(),
                content: Bytes::from(file.data.into_owned()),
                mod_time,
            })
        });
        let bundle = Self::from_entries(entries);
        info!("Loaded {} bundled assets", bundle.len());
        bundle
    }

    pub fn from_entries(entries: impl IntoIterator<Item = AssetEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.logical_path.clone(), entry))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl AssetStore for BundledAssets {
    async fn load(&self, logical_path: &str) -> Option<AssetEntry> {
        let key = logical_path.strip_prefix('/').unwrap_or(logical_path);
        self.entries.get(key).cloned()
    }

    fn describe(&self) -> String {
        format!("bundle ({} files)", self.entries.len())
    }
}

/// Files under a directory on disk
pub struct LiveAssets {
    root: PathBuf,
}

impl LiveAssets {
    /// `root` must exist; it is canonicalized once here
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `logical_path` onto the root without touching the filesystem.
    /// `None` when the path climbs above the root.
    pub fn confine(&self, logical_path: &str) -> Option<PathBuf> {
        let mut joined = self.root.clone();
        let mut depth = 0usize;

        for component in Path::new(logical_path).components() {
            match component {
                Component::Normal(part) => {
                    joined.push(part);
                    depth += 1;
                }
                Component::ParentDir => {
                    if depth == 0 {
                        return None;
                    }
                    joined.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::CurDir => {}
                Component::Prefix(_) => return None,
            }
        }

        joined.starts_with(&self.root).then_some(joined)
    }
}

#[async_trait]
impl AssetStore for LiveAssets {
    async fn load(&self, logical_path: &str) -> Option<AssetEntry> {
        let Some(candidate) = self.confine(logical_path) else {
            warn!("Rejected path outside asset root: {}", logical_path);
            return None;
        };

        let real = tokio::fs::canonicalize(&candidate).await.ok()?;
        if !real.starts_with(&self.root) {
            warn!("Rejected path resolving outside asset root: {}", logical_path);
            return None;
        }

        let metadata = tokio::fs::metadata(&real).await.ok()?;
        if !metadata.is_file() {
            return None;
        }

        let content = match tokio::fs::read(&real).await {
            Ok(content) => content,
            Err(e) => {
                debug!("Unable to read {}: {}", real.display(), e);
                return None;
            }
        };

        Some(AssetEntry {
            logical_path: logical_path.to_string(),
            content: Bytes::from(content),
            mod_time: metadata.modified().ok(),
        })
    }

    fn describe(&self) -> String {
        format!("filesystem {}", self.root.display())
    }
}
