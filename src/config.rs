//! Process-wide settings, read once at startup from the command line and an optional
//! `httpd.conf`.

use std::collections::HashMap;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use nix::unistd::getuid;

use crate::mime::{MimeMap, DEFAULT_MIME_TYPE};
use crate::resource::{DEFAULT_ACCESS_FILE_NAME, DEFAULT_INDEX_NAME};

/// `Key value` settings from an Apache-style configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpdConf {
    entries: HashMap<String, String>,
}

impl HttpdConf {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse `Key value` lines. Blank lines and `#` comments are skipped; a repeated key keeps
    /// its last value.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = HashMap::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("line {}: missing value for {}", number + 1, line))?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|value| value.strip_suffix('"'))
                .unwrap_or(value);
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub wwwroot: PathBuf,
    pub bindaddr: Option<String>,
    pub bindport: u16,
    /// `--log` value, if given.
    log_flag: Option<PathBuf>,
    pub index_name: String,
    pub access_file_name: String,
    pub no_listing: bool,
    pub no_server_id: bool,
    pub mime_map: MimeMap,
    httpd_conf: HttpdConf,
}

/// Command-line values, before the config file fills the gaps.
#[derive(Debug, Default)]
struct Flags {
    wwwroot: Option<String>,
    bindaddr: Option<String>,
    bindport: Option<u16>,
    log_file: Option<String>,
    index_name: Option<String>,
    access_file_name: Option<String>,
    mimetypes: Option<String>,
    no_listing: bool,
    no_server_id: bool,
    conf: Option<String>,
}

impl Config {
    /// Read settings from the process arguments. Prints usage and exits if asked for help.
    pub fn from_command_line() -> Result<Self> {
        let mut args = std::env::args();
        let name = args
            .next()
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        match Self::from_args(args)? {
            Some(config) => Ok(config),
            None => {
                usage(&name);
                std::process::exit(0);
            }
        }
    }

    /// Read settings from `args`, not including the program name. `None` if usage should be
    /// printed instead.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Result<Option<Self>> {
        let mut flags = Flags::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" => return Ok(None),
                "--port" => {
                    let number = args.next().context("missing number after --port")?;
                    flags.bindport = Some(parse_port(&number)?);
                }
                "--addr" => {
                    flags.bindaddr = Some(args.next().context("missing ip after --addr")?);
                }
                "--log" => {
                    flags.log_file = Some(args.next().context("missing filename after --log")?);
                }
                "--index" => {
                    flags.index_name =
                        Some(args.next().context("missing filename after --index")?);
                }
                "--access-file" => {
                    flags.access_file_name =
                        Some(args.next().context("missing filename after --access-file")?);
                }
                "--mimetypes" => {
                    flags.mimetypes =
                        Some(args.next().context("missing filename after --mimetypes")?);
                }
                "--conf" => {
                    flags.conf = Some(args.next().context("missing filename after --conf")?);
                }
                "--no-listing" => flags.no_listing = true,
                "--no-server-id" => flags.no_server_id = true,
                _ if !arg.starts_with("--") && flags.wwwroot.is_none() => {
                    flags.wwwroot = Some(arg);
                }
                _ => return Err(anyhow!("unknown argument `{}'", arg)),
            }
        }

        let httpd_conf = match &flags.conf {
            Some(path) => HttpdConf::load(Path::new(path))?,
            None => HttpdConf::default(),
        };
        Self::layer(flags, httpd_conf)
    }

    /// Command-line flags win over the config file, which wins over the defaults.
    fn layer(flags: Flags, httpd_conf: HttpdConf) -> Result<Option<Self>> {
        let from_conf = |key: &str| httpd_conf.lookup(key).map(str::to_string);

        let mut wwwroot = match flags.wwwroot.or_else(|| from_conf("DocumentRoot")) {
            Some(wwwroot) => wwwroot,
            None => return Ok(None), // no wwwroot given
        };
        // Strip ending slash.
        if wwwroot.len() > 1 && wwwroot.ends_with('/') {
            wwwroot.pop();
        }

        let (conf_addr, conf_port) = match httpd_conf.lookup("Listen") {
            Some(listen) => parse_listen(listen)?,
            None => (None, None),
        };

        let mut mime_map = MimeMap::default();
        if let Some(path) = flags.mimetypes.or_else(|| from_conf("TypesConfig")) {
            mime_map.parse_extension_map_file(Path::new(&path))?;
        }

        Ok(Some(Self {
            wwwroot: PathBuf::from(wwwroot),
            bindaddr: flags.bindaddr.or(conf_addr),
            bindport: flags
                .bindport
                .or(conf_port)
                .unwrap_or_else(default_port),
            log_flag: flags.log_file.map(PathBuf::from),
            index_name: flags
                .index_name
                .or_else(|| from_conf("DirectoryIndex"))
                .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            access_file_name: flags
                .access_file_name
                .or_else(|| from_conf("AccessFileName"))
                .unwrap_or_else(|| DEFAULT_ACCESS_FILE_NAME.to_string()),
            no_listing: flags.no_listing,
            no_server_id: flags.no_server_id,
            mime_map,
            httpd_conf,
        }))
    }

    /// Raw value of a config file setting.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.httpd_conf.lookup(key)
    }

    /// Access log file: `--log`, else the config file's `LogFile`. Standard output if neither.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_flag
            .clone()
            .or_else(|| self.lookup("LogFile").map(PathBuf::from))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let addr = match &self.bindaddr {
            Some(addr) => addr.parse()?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        Ok(SocketAddr::new(addr, self.bindport))
    }
}

fn default_port() -> u16 {
    if getuid().is_root() {
        80
    } else {
        8080
    }
}

fn parse_port(number: &str) -> Result<u16> {
    number
        .parse()
        .with_context(|| format!("port number {} is invalid", number))
}

/// `Listen 8080` or `Listen 127.0.0.1:8080`.
fn parse_listen(listen: &str) -> Result<(Option<String>, Option<u16>)> {
    match listen.rsplit_once(':') {
        Some((addr, port)) => Ok((
            Some(addr.trim_start_matches('[').trim_end_matches(']').to_string()),
            Some(parse_port(port)?),
        )),
        None => Ok((None, Some(parse_port(listen)?))),
    }
}

fn usage(argv0: &str) {
    print!(
        "usage:\t{} /path/to/wwwroot [flags]\n\n\
        flags:\t--port number (default: 8080, or 80 if running as root)\n\
        \t\tSpecifies which port to listen on for connections.\n\
        \t\tPass 0 to let the system choose any free port for you.\n\n\
        \t--addr ip (default: all)\n\
        \t\tIf multiple interfaces are present, specifies\n\
        \t\twhich one to bind the listening port to.\n\n\
        \t--log filename (default: stdout)\n\
        \t\tSpecifies which file to append the request log to.\n\n\
        \t--index filename (default: {})\n\
        \t\tDefault file to serve when a directory is requested.\n\n\
        \t--access-file filename (default: {})\n\
        \t\tName of the files that protect a directory and everything below it.\n\n\
        \t--no-listing\n\
        \t\tDo not serve listing if directory is requested.\n\n\
        \t--mimetypes filename (optional)\n\
        \t\tParses specified file for extension-MIME associations.\n\
        \t\tUnknown extensions are served as {}.\n\n\
        \t--no-server-id\n\
        \t\tDon't identify the server type in headers\n\
        \t\tor directory listings.\n\n\
        \t--conf filename (optional)\n\
        \t\tReads DocumentRoot, Listen, LogFile, DirectoryIndex,\n\
        \t\tAccessFileName and TypesConfig from an httpd.conf style file.\n\
        \t\tFlags given on the command line take precedence.\n\n",
        argv0, DEFAULT_INDEX_NAME, DEFAULT_ACCESS_FILE_NAME, DEFAULT_MIME_TYPE,
    );
}
