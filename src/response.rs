//! The responses a connection can end with, and how they go on the wire.

use std::fs::File;
use std::io::{Read, Write};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::date::HttpDate;
use crate::request::Request;
use crate::resource::Resource;
use crate::url::{HtmlEscaped, UrlEncoded};

/// What the server calls itself in headers and generated pages. Empty if hidden.
#[derive(Debug, Clone, Default)]
pub struct ServerId(Option<String>);

impl ServerId {
    pub fn new() -> Self {
        Self(Some(format!(
            "{}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )))
    }

    pub fn hidden() -> Self {
        Self(None)
    }
}

/// "Generated by" string.
struct GeneratedOn<'a>(&'a ServerId, SystemTime);

impl<'a> std::fmt::Display for GeneratedOn<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = &(self.0).0 {
            writeln!(f, "Generated by {} on {}", name, HttpDate(self.1))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum Body {
    Empty,
    Generated(String),
    FromFile(File),
}

/// Status line, headers and body of one HTTP response.
#[derive(Debug)]
pub struct Reply {
    status: u16,
    reason: &'static str,
    date: SystemTime,
    headers: Vec<(&'static str, String)>,
    body: Body,
    body_len: u64,
}

impl Reply {
    pub fn new(server_id: &ServerId, status: u16, reason: &'static str) -> Self {
        let mut headers = Vec::new();
        if let Some(name) = &server_id.0 {
            headers.push(("Server", name.clone()));
        }
        Self {
            status,
            reason,
            date: SystemTime::now(),
            headers,
            body: Body::Empty,
            body_len: 0,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Set a generated body and its Content-Length.
    pub fn html(self, body: String) -> Self {
        let len = body.len() as u64;
        self.header("Content-Type", "text/html; charset=UTF-8")
            .header("Content-Length", len.to_string())
            .with_body(Body::Generated(body), len)
    }

    /// Set a file body of `len` bytes and its Content-Length.
    pub fn file(self, file: File, len: u64) -> Self {
        self.header("Content-Length", len.to_string())
            .with_body(Body::FromFile(file), len)
    }

    fn with_body(mut self, body: Body, len: u64) -> Self {
        self.body = body;
        self.body_len = len;
        self
    }

    /// Drop the body but keep its headers, as for HEAD.
    pub fn without_body(self) -> Self {
        self.with_body(Body::Empty, 0)
    }

    /// A default reply for any (erroneous) occasion.
    pub fn error_page(server_id: &ServerId, status: u16, reason: &'static str, text: &str) -> Self {
        let reply = Self::new(server_id, status, reason);
        let body = format!(
            "<html><head><title>{} {}</title></head><body>\n\
            <h1>{}</h1>\n\
            {}\n\
            <hr>\n\
            {}\
            </body></html>\n",
            status,
            reason,
            reason,
            text,
            GeneratedOn(server_id, reply.date),
        );
        reply.html(body)
    }

    /// A redirect reply.
    pub fn redirect(server_id: &ServerId, location: &str) -> Self {
        let reply = Self::new(server_id, 301, "Moved Permanently");
        let body = format!(
            "<html><head><title>301 Moved Permanently</title></head><body>\n\
            <h1>Moved Permanently</h1>\n\
            Moved to: <a href=\"{}\">{}</a>\n\
            <hr>\n\
            {}\
            </body></html>\n",
            HtmlEscaped(location),
            HtmlEscaped(location),
            GeneratedOn(server_id, reply.date),
        );
        reply.header("Location", location).html(body)
    }

    /// A directory listing reply.
    pub fn listing(server_id: &ServerId, url: &str, entries: Vec<std::fs::DirEntry>) -> Self {
        let reply = Self::new(server_id, 200, "OK");
        let body = format!(
            "<html>\n<head>\n<title>{}</title>\n\
            <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
            </head>\n<body>\n<h1>{}</h1>\n<tt><pre>\n\
            {}\
            </pre></tt>\n\
            <hr>\n\
            {}\
            </body>\n</html>\n",
            HtmlEscaped(url),
            HtmlEscaped(url),
            Listing(entries),
            GeneratedOn(server_id, reply.date),
        );
        reply.html(body)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Number of body bytes `send` writes.
    pub fn body_len(&self) -> u64 {
        self.body_len
    }

    fn send<W: Write>(self, out: &mut W) -> std::io::Result<()> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nDate: {}\r\n",
            self.status,
            self.reason,
            HttpDate(self.date)
        );
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("Connection: close\r\n\r\n");
        out.write_all(head.as_bytes())?;

        match self.body {
            Body::Empty => {}
            Body::Generated(body) => out.write_all(body.as_bytes())?,
            Body::FromFile(file) => {
                let copied = std::io::copy(&mut file.take(self.body_len), out)?;
                if copied != self.body_len {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "file shrank while sending",
                    ));
                }
            }
        }
        out.flush()
    }
}

/// The one response a connection ends with.
#[derive(Debug)]
pub enum Response {
    BadRequest(Reply),
    Unauthorized(Reply),
    Forbidden(Reply),
    NotModified(Reply),
    Normal(Reply),
}

impl Response {
    pub fn bad_request(server_id: &ServerId) -> Self {
        let reason = "You sent a request that the server couldn't understand.";
        Self::BadRequest(Reply::error_page(server_id, 400, "Bad Request", reason))
    }

    pub fn unauthorized(server_id: &ServerId, realm: &str) -> Self {
        let reason = "This resource requires authorization.";
        let challenge = format!("Basic realm=\"{}\"", realm.replace('"', "'"));
        Self::Unauthorized(
            Reply::error_page(server_id, 401, "Unauthorized", reason)
                .header("WWW-Authenticate", challenge),
        )
    }

    pub fn forbidden(server_id: &ServerId) -> Self {
        let reason = "Access denied due to invalid credentials.";
        Self::Forbidden(Reply::error_page(server_id, 403, "Forbidden", reason))
    }

    /// A not modified reply.
    pub fn not_modified(server_id: &ServerId, last_modified: DateTime<Utc>) -> Self {
        Self::NotModified(
            Reply::new(server_id, 304, "Not Modified")
                .header("Last-Modified", HttpDate(last_modified.into()).to_string()),
        )
    }

    fn reply(&self) -> &Reply {
        match self {
            Self::BadRequest(reply)
            | Self::Unauthorized(reply)
            | Self::Forbidden(reply)
            | Self::NotModified(reply)
            | Self::Normal(reply) => reply,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.reply().status()
    }

    pub fn byte_length(&self) -> u64 {
        self.reply().body_len()
    }

    /// Write the response. Consumes it, so a response is sent at most once.
    pub fn send<W: Write>(self, out: &mut W) -> std::io::Result<()> {
        match self {
            Self::BadRequest(reply)
            | Self::Unauthorized(reply)
            | Self::Forbidden(reply)
            | Self::NotModified(reply)
            | Self::Normal(reply) => reply.send(out),
        }
    }
}

/// Builds the Normal response for a resource once the request has passed every check.
pub trait RespondWith: Send + Sync {
    fn respond(&self, request: &Request, resource: &Resource) -> anyhow::Result<Response>;
}

/// Directory listing.
struct Listing(Vec<std::fs::DirEntry>);

impl std::fmt::Display for Listing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let max_len = self
            .0
            .iter()
            .map(|dir_entry| dir_entry.file_name().len())
            .max()
            .unwrap_or(2);

        writeln!(f, "<a href=\"..\">..</a>/")?;

        for dir_entry in &self.0 {
            let metadata = match dir_entry.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            write!(
                f,
                "<a href=\"{}\">{}</a>",
                UrlEncoded(&name),
                HtmlEscaped(&name)
            )?;
            if metadata.is_dir() {
                writeln!(f, "/")?;
            } else {
                for _ in name.len()..max_len {
                    write!(f, " ")?;
                }
                writeln!(f, "{:10}", metadata.len())?;
            }
        }
        Ok(())
    }
}
