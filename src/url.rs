//! Request targets and the text encodings used in generated pages.

use std::fmt;

use thiserror::Error;

/// Why a request target can't be mapped under the document root.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    #[error("target does not start with /")]
    NotAbsolute,
    #[error("target climbs above the root")]
    EscapesRoot,
    #[error("target decodes to invalid UTF-8")]
    InvalidUtf8,
    #[error("target contains a NUL byte")]
    Nul,
}

/// Map a request target to a path under the root: the query is dropped, `%XX` escapes are
/// decoded and the segments are normalized. Empty and `.` segments vanish and `..` removes the
/// segment before it.
///
/// A path that named a directory (trailing `/`, `.` or `..`) keeps a trailing slash.
pub fn target_path(target: &str) -> Result<String, TargetError> {
    let path = match target.split_once('?') {
        Some((path, _query)) => path,
        None => target,
    };
    let path = path.strip_prefix('/').ok_or(TargetError::NotAbsolute)?;
    let decoded = String::from_utf8(percent_decode(path)).map_err(|_| TargetError::InvalidUtf8)?;
    if decoded.contains('\0') {
        return Err(TargetError::Nul);
    }

    let mut segments: Vec<&str> = Vec::new();
    let mut directory = true;
    for segment in decoded.split('/') {
        directory = matches!(segment, "" | "." | "..");
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop().ok_or(TargetError::EscapesRoot)?;
            }
            name => segments.push(name),
        }
    }

    let mut normalized = String::with_capacity(decoded.len() + 1);
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if directory || segments.is_empty() {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Decode `%XX` escapes. A `%` not followed by two hex digits is kept as is.
fn percent_decode(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = match bytes.get(i + 1..i + 3) {
            Some(hex) if bytes[i] == b'%' && hex.iter().all(u8::is_ascii_hexdigit) => {
                std::str::from_utf8(hex)
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            }
            _ => None,
        };
        match escaped {
            Some(byte) => {
                decoded.push(byte);
                i += 3;
            }
            None => {
                decoded.push(bytes[i]);
                i += 1;
            }
        }
    }
    decoded
}

/// Percent-encodes everything but RFC 3986 unreserved characters, for use in a link.
pub struct UrlEncoded<'a>(pub &'a str);

impl fmt::Display for UrlEncoded<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in self.0.as_bytes() {
            if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "%{:02X}", byte)?;
            }
        }
        Ok(())
    }
}

/// Escapes text for an HTML element or a quoted attribute.
pub struct HtmlEscaped<'a>(pub &'a str);

impl fmt::Display for HtmlEscaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.0;
        while let Some(at) = rest.find(|c: char| matches!(c, '<' | '>' | '&' | '\'' | '"')) {
            f.write_str(&rest[..at])?;
            f.write_str(match rest.as_bytes()[at] {
                b'<' => "&lt;",
                b'>' => "&gt;",
                b'&' => "&amp;",
                b'\'' => "&#39;",
                _ => "&quot;",
            })?;
            rest = &rest[at + 1..];
        }
        f.write_str(rest)
    }
}
