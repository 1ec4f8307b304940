use crate::error::{ApiError, ErrorCode, PtyResult};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "termpoll.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub files: FilesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Upper bound on one readiness wait before idle bookkeeping runs.
    pub poll_timeout_ms: u64,
    /// Largest `POST /u` body accepted.
    pub max_request_bytes: usize,
    /// A connection that has not been answered by then is dropped.
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8022".to_string(),
            poll_timeout_ms: 5_000,
            max_request_bytes: 4096,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub command: String,
    pub term: String,
    pub max_sessions: usize,
    pub keyboard_capacity: usize,
    pub output_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: "/bin/sh".to_string(),
            term: "vt100".to_string(),
            max_sessions: 64,
            keyboard_capacity: 256,
            output_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub root: PathBuf,
    pub index: String,
    /// Serve `//absolute/paths`; off unless `--unsafe` is given.
    pub allow_absolute: bool,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("web"),
            index: "index.html".to_string(),
            allow_absolute: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Parser, Clone, Default)]
#[command(author, version = crate::version::VERSION, about)]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Host name or address to listen on.
    #[arg(long)]
    pub addr: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// Command run inside every new session.
    #[arg(long)]
    pub cmd: Option<String>,
    /// Directory static files are served from.
    #[arg(long)]
    pub root: Option<PathBuf>,
    #[arg(long)]
    pub index: Option<String>,
    /// Allow absolute static file paths.
    #[arg(long = "unsafe")]
    pub allow_absolute: bool,
    #[arg(long)]
    pub verbose: bool,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub log_format: Option<String>,
}

impl Config {
    pub fn load(args: &Cli) -> PtyResult<Self> {
        let mut config = if let Some(path) = &args.config {
            Self::from_file(path)?
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        } else {
            Self::default()
        };

        config.apply_env();
        config.apply_cli(args);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> PtyResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            ApiError::new(ErrorCode::IoError, "Failed to read config file")
                .with_details(err.to_string())
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> PtyResult<Self> {
        let parsed: Self = toml::from_str(content).map_err(|err| {
            ApiError::new(ErrorCode::InvalidArgument, "Failed to parse config file")
                .with_details(err.to_string())
        })?;
        Ok(parsed)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("TERMPOLL_LISTEN") {
            self.server.listen = value;
        }
        if let Ok(value) = env::var("TERMPOLL_CMD") {
            self.session.command = value;
        }
        if let Ok(value) = env::var("TERMPOLL_ROOT") {
            self.files.root = PathBuf::from(value);
        }
        if let Ok(value) = env::var("TERMPOLL_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Ok(value) = env::var("TERMPOLL_UNSAFE")
            && let Some(flag) = parse_bool(&value)
        {
            self.files.allow_absolute = flag;
        }
    }

    pub fn apply_cli(&mut self, args: &Cli) {
        if args.addr.is_some() || args.port.is_some() {
            let (host, port) = split_listen(&self.server.listen);
            let host = args.addr.clone().unwrap_or(host);
            let port = args.port.unwrap_or(port);
            self.server.listen = format_listen(&host, port);
        }
        if let Some(command) = &args.cmd {
            self.session.command = command.clone();
        }
        if let Some(root) = &args.root {
            self.files.root = root.clone();
        }
        if let Some(index) = &args.index {
            self.files.index = index.clone();
        }
        if args.allow_absolute {
            self.files.allow_absolute = true;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        } else if args.verbose {
            self.logging.level = "debug".to_string();
        }
        if let Some(format) = &args.log_format {
            self.logging.format = format.clone();
        }
    }
}

const DEFAULT_PORT: u16 = 8022;

/// Splits `host:port`, tolerating bracketed IPv6 hosts and a missing port.
fn split_listen(listen: &str) -> (String, u16) {
    if let Some((host, port)) = listen.rsplit_once(':')
        && !host.is_empty()
        && (!host.contains(':') || host.starts_with('['))
        && let Ok(port) = port.parse::<u16>()
    {
        return (host.trim_matches(['[', ']']).to_string(), port);
    }
    (listen.trim_matches(['[', ']']).to_string(), DEFAULT_PORT)
}

fn format_listen(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
