//! Content types by file extension.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

/// Content type for files whose extension is unknown.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const BUILTIN_TYPES: &[(&str, &[&str])] = &[
    ("application/javascript", &["js", "mjs"]),
    ("application/json", &["json"]),
    ("application/pdf", &["pdf"]),
    ("application/xml", &["xml", "xsl"]),
    ("application/zip", &["zip"]),
    ("audio/mpeg", &["mp3"]),
    ("image/gif", &["gif"]),
    ("image/jpeg", &["jpeg", "jpg"]),
    ("image/png", &["png"]),
    ("image/svg+xml", &["svg"]),
    ("image/x-icon", &["ico"]),
    ("text/css", &["css"]),
    ("text/html", &["html", "htm"]),
    ("text/plain", &["txt", "text", "log"]),
    ("video/mp4", &["mp4"]),
];

/// Content types by extension. Starts from a built-in table that `mime.types` files can extend.
#[derive(Debug, Clone)]
pub struct MimeMap {
    by_extension: HashMap<String, String>,
}

impl MimeMap {
    /// Add the entries of a `mime.types` file: a type followed by its extensions, one type per
    /// line. An extension listed again takes the later type.
    pub fn parse_extension_map_file(&mut self, path: &Path) -> Result<()> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("failed to read {}", path.display()))?;
            let mut words = line.split_ascii_whitespace();
            match words.next() {
                Some(content_type) if !content_type.starts_with('#') => {
                    self.insert(content_type, words)
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn insert<'a>(&mut self, content_type: &str, extensions: impl IntoIterator<Item = &'a str>) {
        for extension in extensions {
            self.by_extension
                .insert(extension.to_string(), content_type.to_string());
        }
    }

    /// Content type for the last segment of `url`.
    pub fn url_content_type(&self, url: &str) -> &str {
        let name = url.rsplit('/').next().unwrap_or(url);
        match name.rsplit_once('.') {
            Some((_, extension)) => self
                .by_extension
                .get(extension)
                .map_or(DEFAULT_MIME_TYPE, String::as_str),
            None => DEFAULT_MIME_TYPE,
        }
    }
}

impl Default for MimeMap {
    fn default() -> Self {
        let mut mime_map = Self {
            by_extension: HashMap::new(),
        };
        for (content_type, extensions) in BUILTIN_TYPES {
            mime_map.insert(content_type, extensions.iter().copied());
        }
        mime_map
    }
}
