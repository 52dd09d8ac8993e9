//! Access control for protected resources: `.htaccess` descriptors naming a password file, and
//! HTTP Basic credentials checked against it.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// Username logged when credentials could not be decoded.
pub const UNKNOWN_USER: &str = "unknown";

/// Realm used when a descriptor has no `AuthName`.
pub const DEFAULT_REALM: &str = "Restricted";

/// Outcome of checking one `Authorization` header against one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCheckResult {
    pub username: String,
    pub authorized: bool,
}

/// Checks credentials for protected resources.
pub trait CheckAccess: Send + Sync {
    /// Check `credentials` (the raw `Authorization` header) against the descriptor at
    /// `descriptor`. Errors are failures to read the descriptor, not bad credentials.
    fn check(&self, descriptor: &Path, credentials: &str) -> Result<AccessCheckResult>;

    /// Realm to name in the challenge for resources guarded by `descriptor`.
    fn realm(&self, _descriptor: &Path) -> Result<String> {
        Ok(DEFAULT_REALM.to_string())
    }
}

/// Checks credentials against `.htaccess` files, reloading them on every check.
#[derive(Debug, Default, Clone, Copy)]
pub struct Htaccess;

impl CheckAccess for Htaccess {
    fn check(&self, descriptor: &Path, credentials: &str) -> Result<AccessCheckResult> {
        let descriptor = Descriptor::load(descriptor)?;
        let decoded = decode_basic(credentials);
        let username = match &decoded {
            Some((user, _)) => user.clone(),
            None => UNKNOWN_USER.to_string(),
        };
        let authorized = match decoded {
            Some((user, password)) => {
                descriptor.allows(&user) && descriptor.password_matches(&user, &password)?
            }
            None => false,
        };
        Ok(AccessCheckResult {
            username,
            authorized,
        })
    }

    fn realm(&self, descriptor: &Path) -> Result<String> {
        Ok(Descriptor::load(descriptor)?
            .realm
            .unwrap_or_else(|| DEFAULT_REALM.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Require {
    ValidUser,
    Users(Vec<String>),
}

/// A parsed `.htaccess` file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Descriptor {
    user_file: PathBuf,
    realm: Option<String>,
    require: Require,
}

impl Descriptor {
    fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open access file {}", path.display()))?;
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            lines.push(
                line.with_context(|| format!("failed to read access file {}", path.display()))?,
            );
        }
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(lines.iter().map(String::as_str), base)
            .with_context(|| format!("invalid access file {}", path.display()))
    }

    /// Parse descriptor lines. A relative `AuthUserFile` is taken relative to `base`.
    fn parse<'a>(lines: impl Iterator<Item = &'a str>, base: &Path) -> Result<Self> {
        let mut user_file = None;
        let mut realm = None;
        let mut require = Require::ValidUser;
        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => (line, ""),
            };
            match key {
                "AuthUserFile" => user_file = Some(base.join(unquote(value))),
                "AuthName" => realm = Some(unquote(value).to_string()),
                "AuthType" => {
                    if !value.eq_ignore_ascii_case("Basic") {
                        return Err(anyhow!("unsupported AuthType {}", value));
                    }
                }
                "Require" => {
                    let mut words = value.split_whitespace();
                    require = match words.next() {
                        Some("valid-user") => Require::ValidUser,
                        Some("user") => Require::Users(words.map(str::to_string).collect()),
                        _ => return Err(anyhow!("unsupported Require {}", value)),
                    };
                }
                _ => tracing::debug!(directive = key, "ignoring access file directive"),
            }
        }
        Ok(Self {
            user_file: user_file.context("missing AuthUserFile")?,
            realm,
            require,
        })
    }

    fn allows(&self, user: &str) -> bool {
        match &self.require {
            Require::ValidUser => true,
            Require::Users(users) => users.iter().any(|allowed| allowed == user),
        }
    }

    fn password_matches(&self, user: &str, password: &str) -> Result<bool> {
        let file = File::open(&self.user_file).with_context(|| {
            format!("failed to open password file {}", self.user_file.display())
        })?;
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| {
                format!("failed to read password file {}", self.user_file.display())
            })?;
            if let Some((name, stored)) = line.trim_end().split_once(':') {
                if name == user {
                    return Ok(password_hash_matches(stored, password));
                }
            }
        }
        Ok(false)
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .unwrap_or(value)
}

/// Compare a password file entry (`{SHA}` followed by base64 SHA-1, or plain text) with a
/// password.
fn password_hash_matches(stored: &str, password: &str) -> bool {
    match stored.strip_prefix("{SHA}") {
        Some(digest) => {
            let actual = sha1_smol::Sha1::from(password.as_bytes()).digest().bytes();
            Base64Decoded::new(digest).map_or(false, |expected| expected.0 == actual)
        }
        None => stored == password,
    }
}

/// Decode `Basic <base64 user:password>` credentials.
pub fn decode_basic(credentials: &str) -> Option<(String, String)> {
    let mut parts = credentials.trim().splitn(2, ' ');
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("Basic") {
        return None;
    }
    let decoded = Base64Decoded::new(parts.next()?.trim())?;
    let decoded = String::from_utf8(decoded.0).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

const BASE64_TABLE: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Data decoded from padded base64.
struct Base64Decoded(Vec<u8>);

impl Base64Decoded {
    fn new(encoded: &str) -> Option<Self> {
        let encoded = encoded.as_bytes();
        if encoded.len() % 4 != 0 {
            return None;
        }
        let mut decoded = Vec::with_capacity(encoded.len() / 4 * 3);
        for (index, chunk) in encoded.chunks(4).enumerate() {
            let last = index == encoded.len() / 4 - 1;
            let padding = chunk.iter().rev().take_while(|&&b| b == b'=').count();
            if padding > 2 || (padding > 0 && !last) {
                return None;
            }
            let mut triple: u32 = 0;
            for &b in &chunk[..4 - padding] {
                let value = BASE64_TABLE.iter().position(|&c| c == b)? as u32;
                triple = (triple << 6) | value;
            }
            triple <<= 6 * padding as u32;
            decoded.extend(triple.to_be_bytes()[1..4 - padding].iter());
        }
        Some(Self(decoded))
    }
}
