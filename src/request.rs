//! Reading the single request of a connection.

use std::collections::HashMap;
use std::io::{BufRead, Read};
use std::net::IpAddr;

use crate::url::target_path;

// To prevent a malformed request from eating up too much memory, reject it once the head exceeds
// this many bytes:
pub const MAX_REQUEST_LENGTH: usize = 4000;

/// Methods this server answers.
const METHODS: &[&str] = &["GET", "HEAD"];

/// How far the request got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Peer went away before the blank line ending the head.
    Incomplete,
    /// Complete but unusable.
    Bad,
    Complete,
}

/// One parsed HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    client: IpAddr,
    method: String,
    identifier: String,
    version: String,
    headers: HashMap<String, String>,
    state: State,
}

impl Request {
    /// Read a request head from `reader`. Only I/O failures are errors; a malformed or truncated
    /// request is reported through `is_bad_request` and `is_populated`.
    pub fn read_from<R: BufRead>(reader: &mut R, client: IpAddr) -> std::io::Result<Self> {
        let mut request = Self {
            client,
            method: String::new(),
            identifier: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            state: State::Incomplete,
        };

        let mut total = 0;
        let mut request_line = true;
        let mut bad = false;
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = reader
                .by_ref()
                .take((MAX_REQUEST_LENGTH + 1 - total) as u64)
                .read_until(b'\n', &mut line)?;
            total += read;
            if total > MAX_REQUEST_LENGTH {
                request.state = State::Bad;
                return Ok(request);
            }
            if !line.ends_with(b"\n") {
                // EOF before the head was finished.
                return Ok(request);
            }
            let text = match std::str::from_utf8(&line) {
                Ok(text) => text.trim_end_matches(|c| c == '\r' || c == '\n'),
                Err(_) => {
                    bad = true;
                    request_line = false;
                    continue;
                }
            };
            if request_line {
                request_line = false;
                bad |= !request.parse_request_line(text);
            } else if text.is_empty() {
                break;
            } else {
                bad |= !request.parse_header(text);
            }
        }

        request.state = if bad { State::Bad } else { State::Complete };
        Ok(request)
    }

    /// Parse a request line like "GET / HTTP/1.1".
    fn parse_request_line(&mut self, line: &str) -> bool {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if let Some(method) = parts.first() {
            self.method = method.to_string();
        }
        if let Some(identifier) = parts.get(1) {
            self.identifier = identifier.to_string();
        }
        if let Some(version) = parts.get(2) {
            self.version = version.to_string();
        }
        if parts.len() != 3 || !self.version.starts_with("HTTP/") || !METHODS.contains(&parts[0])
        {
            return false;
        }
        match target_path(&self.identifier) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(identifier = %self.identifier, "rejecting request target: {}", e);
                false
            }
        }
    }

    fn parse_header(&mut self, line: &str) -> bool {
        match line.split_once(':') {
            Some((name, value)) if !name.is_empty() && !name.contains(char::is_whitespace) => {
                self.headers
                    .insert(name.to_string(), value.trim().to_string());
                true
            }
            _ => false,
        }
    }

    /// Look up a header by its exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|value| value.as_str())
    }

    pub fn client(&self) -> IpAddr {
        self.client
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }

    pub fn is_bad_request(&self) -> bool {
        self.state == State::Bad
    }

    /// Whether the whole head was received.
    pub fn is_populated(&self) -> bool {
        self.state != State::Incomplete
    }
}
