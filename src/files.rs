//! Serving files and directory listings.

use std::fs::File;
use std::io::ErrorKind;

use anyhow::Result;

use crate::date::HttpDate;
use crate::mime::MimeMap;
use crate::request::Request;
use crate::resource::{Resource, Target, DEFAULT_ACCESS_FILE_NAME};
use crate::response::{Reply, RespondWith, Response, ServerId};

/// Prefix of the files Apache keeps its access control in (`.htaccess`, `.htpasswd`).
const HIDDEN_PREFIX: &str = ".ht";

/// Builds replies from what is on disk.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    server_id: ServerId,
    mime_map: MimeMap,
    no_listing: bool,
    access_file_name: String,
}

impl StaticFiles {
    pub fn new(server_id: ServerId, mime_map: MimeMap) -> Self {
        Self {
            server_id,
            mime_map,
            no_listing: false,
            access_file_name: DEFAULT_ACCESS_FILE_NAME.to_string(),
        }
    }

    /// Answer 404 for directories without an index instead of listing them.
    pub fn no_listing(mut self, no_listing: bool) -> Self {
        self.no_listing = no_listing;
        self
    }

    /// Name of the access descriptors, which are never served or listed.
    pub fn access_file_name(mut self, access_file_name: impl Into<String>) -> Self {
        self.access_file_name = access_file_name.into();
        self
    }

    /// Whether `name` is an access descriptor or password file.
    fn is_hidden(&self, name: &str) -> bool {
        name == self.access_file_name || name.starts_with(HIDDEN_PREFIX)
    }

    fn forbidden(&self) -> Reply {
        Reply::error_page(
            &self.server_id,
            403,
            "Forbidden",
            "You don't have permission to access this URL.",
        )
    }

    fn not_found(&self) -> Reply {
        let reason = "The URL you requested was not found.";
        Reply::error_page(&self.server_id, 404, "Not Found", reason)
    }

    fn open_failed(&self, kind: ErrorKind, error: &dyn std::fmt::Display) -> Reply {
        match kind {
            ErrorKind::PermissionDenied => self.forbidden(),
            ErrorKind::NotFound => self.not_found(),
            _ => Reply::error_page(
                &self.server_id,
                500,
                "Internal Server Error",
                &format!("The URL you requested cannot be returned: {}.", error),
            ),
        }
    }

    fn directory(&self, request: &Request, resource: &Resource) -> Reply {
        if !resource.url().ends_with('/') {
            let stripped = request.identifier().split('?').next().unwrap_or("");
            return Reply::redirect(&self.server_id, &format!("{}/", stripped));
        }
        if self.no_listing {
            // Same as a missing directory, so listing being off doesn't leak what exists.
            return self.not_found();
        }
        let mut entries: Vec<_> = match std::fs::read_dir(resource.path()) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    !entry
                        .file_name()
                        .to_str()
                        .map_or(false, |name| self.is_hidden(name))
                })
                .collect(),
            Err(e) => {
                let reason = format!("Couldn't list directory: {}", e);
                return Reply::error_page(&self.server_id, 500, "Internal Server Error", &reason);
            }
        };
        entries.sort_by_key(|dir_entry| dir_entry.file_name());
        Reply::listing(&self.server_id, resource.url(), entries)
    }

    fn file(&self, resource: &Resource) -> Reply {
        let file = match File::open(resource.path()) {
            Ok(file) => file,
            Err(e) => return self.open_failed(e.kind(), &e),
        };
        let metadata = match file.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                let reason = format!("fstat() failed: {}.", e);
                return Reply::error_page(&self.server_id, 500, "Internal Server Error", &reason);
            }
        };
        if !metadata.is_file() {
            let reason = "Not a regular file.";
            return Reply::error_page(&self.server_id, 403, "Forbidden", reason);
        }

        Reply::new(&self.server_id, 200, "OK")
            .header("Content-Type", self.mime_map.url_content_type(resource.url()))
            .header(
                "Last-Modified",
                HttpDate(resource.last_modified().into()).to_string(),
            )
            .file(file, metadata.len())
    }
}

impl Default for StaticFiles {
    fn default() -> Self {
        Self::new(ServerId::default(), MimeMap::default())
    }
}

impl RespondWith for StaticFiles {
    fn respond(&self, request: &Request, resource: &Resource) -> Result<Response> {
        let reply = if resource.url().split('/').any(|segment| self.is_hidden(segment)) {
            tracing::debug!(url = resource.url(), "refusing access control file");
            self.forbidden()
        } else {
            match resource.target() {
                Target::File => self.file(resource),
                Target::Directory => self.directory(request, resource),
                Target::Unavailable(kind) => self.open_failed(kind, &"cannot stat file"),
            }
        };
        let reply = if request.is_head() {
            reply.without_body()
        } else {
            reply
        };
        Ok(Response::Normal(reply))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::fs::{create_dir, write};
    use std::io::Cursor;
    use std::net::{IpAddr, Ipv4Addr};

    use test_case::test_case;

    use crate::resource::DocumentRoot;

    fn request(method: &str, target: &str) -> Request {
        let raw = format!("{} {} HTTP/1.1\r\n\r\n", method, target);
        Request::read_from(&mut Cursor::new(raw), IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap()
    }

    fn respond(files: &StaticFiles, root: &DocumentRoot, method: &str, target: &str) -> String {
        let request = request(method, target);
        let resource = root.resolve_url(target.split('?').next().unwrap());
        let response = files.respond(&request, &resource).unwrap();
        let mut out = Vec::new();
        response.send(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn site() -> (tempfile::TempDir, DocumentRoot) {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("hello.txt"), "hello world").unwrap();
        create_dir(dir.path().join("docs")).unwrap();
        write(dir.path().join("docs/b.css"), "b {}").unwrap();
        write(dir.path().join("docs/a <&>.html"), "<p>").unwrap();
        write(dir.path().join("docs/.htaccess"), "AuthUserFile .htpasswd\n").unwrap();
        write(dir.path().join("docs/.htpasswd"), "alice:secret\n").unwrap();
        write(dir.path().join("docs/.guard"), "AuthUserFile .htpasswd\n").unwrap();
        let root = DocumentRoot::new(dir.path());
        (dir, root)
    }

    #[test]
    fn serves_file() {
        let (_dir, root) = site();
        let text = respond(&StaticFiles::default(), &root, "GET", "/hello.txt");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.contains("Last-Modified: "));
        assert!(text.ends_with("\r\n\r\nhello world"));
    }

    #[test]
    fn head_omits_body() {
        let (_dir, root) = site();
        let text = respond(&StaticFiles::default(), &root, "HEAD", "/hello.txt");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_dir, root) = site();
        let text = respond(&StaticFiles::default(), &root, "GET", "/nope.txt");
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn directory_without_slash_redirects() {
        let (_dir, root) = site();
        let text = respond(&StaticFiles::default(), &root, "GET", "/docs?x=1");
        assert!(text.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        assert!(text.contains("Location: /docs/\r\n"));
    }

    #[test]
    fn directory_is_listed() {
        let (_dir, root) = site();
        let text = respond(&StaticFiles::default(), &root, "GET", "/docs/");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("<a href=\"a%20%3C%26%3E.html\">a &lt;&amp;&gt;.html</a>"));
        let a = text.find("a%20").unwrap();
        let b = text.find("b.css").unwrap();
        assert!(a < b);
    }

    #[test]
    fn listing_can_be_disabled() {
        let (_dir, root) = site();
        let files = StaticFiles::default().no_listing(true);
        let text = respond(&files, &root, "GET", "/docs/");
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn listing_omits_access_control_files() {
        let (_dir, root) = site();
        let files = StaticFiles::default().access_file_name(".guard");
        let text = respond(&files, &root, "GET", "/docs/");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("b.css"));
        assert!(!text.contains(".htaccess"));
        assert!(!text.contains(".htpasswd"));
        assert!(!text.contains(".guard"));
    }

    #[test]
    fn listing_keeps_other_dot_files() {
        let (dir, root) = site();
        write(dir.path().join("docs/.well-known"), "").unwrap();
        let text = respond(&StaticFiles::default(), &root, "GET", "/docs/");
        assert!(text.contains(".well-known"));
        assert!(text.contains(".guard"));
    }

    #[test_case(".guard", "/docs/.guard" ; "configured access file")]
    #[test_case(".guard", "/docs/.htaccess" ; "default access file")]
    #[test_case(".htaccess", "/docs/.htpasswd" ; "password file")]
    #[test_case(".htaccess", "/docs/.htmissing" ; "missing ht file")]
    #[test_case(".htaccess", "/.htconfig/x.txt" ; "inside ht directory")]
    fn access_control_files_are_forbidden(access_file_name: &str, target: &str) {
        let (_dir, root) = site();
        let files = StaticFiles::default().access_file_name(access_file_name);
        let text = respond(&files, &root, "GET", target);
        assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{}", text);
        assert!(!text.contains("AuthUserFile"));
        assert!(!text.contains("alice"));
    }
}
