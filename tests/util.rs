#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::Duration;

use tempfile::{tempdir, TempDir};

fn get_unused_port() -> Option<u16> {
    TcpListener::bind(("127.0.0.1", 0))
        .ok()
        .map(|listener| listener.local_addr().unwrap().port())
}

fn wait_for_port(port: u16) -> bool {
    for _ in 0..1000 {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        sleep(Duration::from_millis(5));
    }
    false
}

struct ScopedChild(Child);

impl Drop for ScopedChild {
    fn drop(&mut self) {
        self.0.kill().ok();
        self.0.wait().ok();
    }
}

impl From<Child> for ScopedChild {
    fn from(child: Child) -> Self {
        ScopedChild(child)
    }
}

/// A running server over a fresh document root, logging to a file outside of it.
pub struct Server {
    _child: ScopedChild,
    port: u16,
    root: TempDir,
    logs: TempDir,
}

impl Server {
    pub fn new() -> Self {
        Self::with_args(&[])
    }

    pub fn with_args(args: &[&str]) -> Self {
        Self::with_root_and_args(tempdir().expect("failed to create tempdir"), args)
    }

    /// Start a server over `root`, which may already be populated.
    pub fn with_root_and_args(root: TempDir, args: &[&str]) -> Self {
        let logs = tempdir().expect("failed to create tempdir");

        // Get an unused port. Assumes the port won't be reused before we start the server.
        let port = get_unused_port().expect("failed to get unused port");

        let child = Command::new(env!("CARGO_BIN_EXE_onehttpd"))
            .arg(root.path())
            .args(&["--port", &port.to_string(), "--addr", "127.0.0.1", "--log"])
            .arg(logs.path().join("access.log"))
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn onehttpd")
            .into();

        // Wait until the socket is open. The connections made while waiting send nothing, so
        // they are neither answered nor logged.
        assert!(wait_for_port(port), "failed to connect to onehttpd");

        Self {
            _child: child,
            port,
            root,
            logs,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn create_dir(&self, name: &str) {
        create_dir_all(self.root().join(name)).expect("failed to create directory");
    }

    pub fn create_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root().join(name);
        let mut file = File::create(&path).expect("failed to create file");
        file.write_all(contents.as_bytes())
            .expect("failed to write file");
        path
    }

    pub fn stream(&self) -> TcpStream {
        let stream =
            TcpStream::connect(("127.0.0.1", self.port)).expect("failed to connect to onehttpd");
        // Set timeouts to prevent tests from hanging
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
            .set_write_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    /// Send `raw` as is and read until the server closes the connection.
    pub fn send(&self, raw: &str) -> Response {
        let mut stream = self.stream();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .expect("failed to read response");
        Response::parse(&buf)
    }

    pub fn request(&self, method: &str, path: &str, headers: &[(&str, &str)]) -> Response {
        let mut raw = format!("{} {} HTTP/1.1\r\n", method, path);
        for (header_name, header_value) in headers {
            raw.push_str(&format!("{}: {}\r\n", header_name, header_value));
        }
        raw.push_str("\r\n");
        self.send(&raw)
    }

    pub fn get(&self, path: &str, headers: &[(&str, &str)]) -> Response {
        self.request("GET", path, headers)
    }

    /// Wait for the access log to hold `count` lines and return them.
    pub fn log_lines(&self, count: usize) -> Vec<String> {
        let path = self.logs.path().join("access.log");
        let mut lines = Vec::new();
        for _ in 0..500 {
            let log = std::fs::read_to_string(&path).unwrap_or_default();
            lines = log.lines().map(str::to_string).collect();
            if lines.len() >= count && log.ends_with('\n') {
                break;
            }
            sleep(Duration::from_millis(10));
        }
        lines
    }
}

/// HTTP response from onehttpd.
pub struct Response {
    response_line: String,
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    fn parse(raw: &[u8]) -> Self {
        let split = raw
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .expect("response has no end of headers");
        let head = std::str::from_utf8(&raw[..split]).expect("response header is not valid UTF-8");
        let mut lines = head.split("\r\n");
        let response_line = lines.next().expect("empty response").to_string();
        let mut headers = HashMap::new();
        for header_line in lines {
            let (key, value) = header_line.split_once(": ").expect("invalid header");
            headers.insert(key.to_string(), value.to_string());
        }
        Self {
            response_line,
            headers,
            body: raw[split + 4..].to_vec(),
        }
    }

    /// Status code and reason, e.g. "200 OK".
    pub fn status(&self) -> &str {
        self.response_line
            .splitn(2, ' ')
            .nth(1)
            .expect("invalid response line")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|value| value.as_str())
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).expect("body is not valid UTF-8")
    }
}

/// Split an access log line into (client, user, method, identifier, version, status, bytes),
/// skipping the timestamp.
pub fn log_fields(line: &str) -> (&str, &str, &str, &str, &str, &str, &str) {
    let (prefix, rest) = line.split_once(" [").expect("no timestamp");
    let (_timestamp, rest) = rest.split_once("] ").expect("no timestamp end");
    let prefix: Vec<&str> = prefix.split(' ').collect();
    let rest: Vec<&str> = rest.split(' ').collect();
    assert_eq!(prefix.len(), 3, "bad log line {:?}", line);
    assert_eq!(rest.len(), 5, "bad log line {:?}", line);
    (prefix[0], prefix[2], rest[0], rest[1], rest[2], rest[3], rest[4])
}
