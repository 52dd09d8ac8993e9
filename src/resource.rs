//! Mapping request targets onto the document root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::date::whole_seconds;
use crate::request::Request;
use crate::url::target_path;

pub const DEFAULT_INDEX_NAME: &str = "index.html";
pub const DEFAULT_ACCESS_FILE_NAME: &str = ".htaccess";

/// What is at a resource's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    File,
    Directory,
    /// Could not stat the path.
    Unavailable(ErrorKind),
}

/// Snapshot of the file or directory a request refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    url: String,
    path: PathBuf,
    target: Target,
    access_file: Option<PathBuf>,
    last_modified: DateTime<Utc>,
}

impl Resource {
    /// A resource that was looked up elsewhere.
    pub fn new(
        url: impl Into<String>,
        path: impl Into<PathBuf>,
        target: Target,
        access_file: Option<PathBuf>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            target,
            access_file,
            last_modified: whole_seconds(last_modified),
        }
    }

    /// Decoded, normalized URL path, always starting with a slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn is_protected(&self) -> bool {
        self.access_file.is_some()
    }

    /// The `.htaccess` guarding this resource, if it is protected.
    pub fn access_file(&self) -> Option<&Path> {
        self.access_file.as_deref()
    }

    /// Modification time, truncated to whole seconds. The epoch if unknown.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

/// Finds the resource a request refers to.
pub trait ResolveResource: Send + Sync {
    fn resolve(&self, request: &Request) -> Result<Resource>;
}

/// Serves resources from a directory tree.
#[derive(Debug, Clone)]
pub struct DocumentRoot {
    root: PathBuf,
    index_name: String,
    access_file_name: String,
}

impl DocumentRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_name: DEFAULT_INDEX_NAME.to_string(),
            access_file_name: DEFAULT_ACCESS_FILE_NAME.to_string(),
        }
    }

    pub fn index_name(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = index_name.into();
        self
    }

    pub fn access_file_name(mut self, access_file_name: impl Into<String>) -> Self {
        self.access_file_name = access_file_name.into();
        self
    }

    /// Nearest access file in `dir` or its ancestors, not looking above the root.
    fn find_access_file(&self, dir: &Path) -> Option<PathBuf> {
        for dir in dir.ancestors() {
            let candidate = dir.join(&self.access_file_name);
            if candidate.is_file() {
                return Some(candidate);
            }
            if dir == self.root.as_path() {
                break;
            }
        }
        None
    }

    /// Resolve a safe URL path (as produced by `target_path`).
    pub fn resolve_url(&self, url: &str) -> Resource {
        let mut url = url.to_string();
        let mut path = self.root.join(url.trim_start_matches('/'));

        // does it end in a slash? serve up url/index_name if there is one
        if url.ends_with('/') {
            let index = path.join(&self.index_name);
            if index.exists() {
                url.push_str(&self.index_name);
                path = index;
            }
        }

        let (target, modified) = match std::fs::metadata(&path) {
            Ok(metadata) => {
                let target = if metadata.is_dir() {
                    Target::Directory
                } else {
                    Target::File
                };
                (target, metadata.modified().ok().map(DateTime::<Utc>::from))
            }
            Err(e) => (Target::Unavailable(e.kind()), None),
        };

        let dir = match target {
            Target::Directory => path.as_path(),
            _ => path.parent().unwrap_or_else(|| self.root.as_path()),
        };
        let access_file = self.find_access_file(dir);
        let last_modified = modified.unwrap_or_else(|| DateTime::<Utc>::from(UNIX_EPOCH));

        Resource::new(url, path, target, access_file, last_modified)
    }
}

impl ResolveResource for DocumentRoot {
    fn resolve(&self, request: &Request) -> Result<Resource> {
        let url = target_path(request.identifier())
            .with_context(|| format!("unsafe request target {}", request.identifier()))?;
        Ok(self.resolve_url(&url))
    }
}
