//! What the poller understands of a request once hyper has framed it:
//! poll forms, static file targets and the replies the loop hands back.

use crate::config::FilesConfig;
use crate::error::{ApiError, ErrorCode, PtyError, PtyResult};
use axum::http::StatusCode;
use percent_encoding::percent_decode;
use std::path::{Path, PathBuf};

pub const POLL_PATH: &str = "/u";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Poll(PollRequest),
    /// A static resource, by request path.
    File(String),
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollRequest {
    pub session: String,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub client: Option<String>,
    pub keys: Vec<u8>,
}

/// Builds a poll from an `s`/`w`/`h`/`c`/`k` form, as found in the query of
/// `GET /u?...` or the body of `POST /u`.
pub fn poll_request(form: &[u8]) -> Request {
    let mut session = None;
    let mut poll = PollRequest::default();
    for field in form.split(|&byte| byte == b'&') {
        if field.is_empty() {
            continue;
        }
        let (name, value) = match field.iter().position(|&byte| byte == b'=') {
            Some(idx) => (&field[..idx], &field[idx + 1..]),
            None => (field, &field[field.len()..]),
        };
        let value = form_decode(value);
        match name {
            b"s" => session = Some(String::from_utf8_lossy(&value).into_owned()),
            b"w" => poll.cols = parse_number(&value),
            b"h" => poll.rows = parse_number(&value),
            b"c" => poll.client = Some(String::from_utf8_lossy(&value).into_owned()),
            b"k" => poll.keys = value,
            _ => {}
        }
    }

    match session.filter(|name| !name.is_empty()) {
        Some(name) => {
            poll.session = name;
            Request::Poll(poll)
        }
        None => Request::Invalid("missing session id".to_string()),
    }
}

fn parse_number(value: &[u8]) -> Option<u16> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

/// `application/x-www-form-urlencoded` value decoding to raw bytes, so
/// keystrokes that are not UTF-8 survive. A `%` not followed by two hex
/// digits is kept literally.
pub fn form_decode(input: &[u8]) -> Vec<u8> {
    let spaced: Vec<u8> = input
        .iter()
        .map(|&byte| if byte == b'+' { b' ' } else { byte })
        .collect();
    percent_decode(&spaced).collect()
}

/// Maps a request path onto the file system. `/` is the index file and
/// `..` is never accepted. A path starting with `//` names an absolute
/// path and is refused unless `allow_absolute` is set.
pub fn resolve_static(path: &str, files: &FilesConfig) -> PtyResult<PathBuf> {
    let Some(relative) = path.strip_prefix('/') else {
        return Err(invalid_pathname(path));
    };
    if path.contains("..") {
        return Err(invalid_pathname(path));
    }
    if relative.starts_with('/') {
        if !files.allow_absolute {
            return Err(invalid_pathname(path));
        }
        return Ok(PathBuf::from(relative));
    }
    if relative.is_empty() {
        return Ok(files.root.join(&files.index));
    }
    Ok(files.root.join(relative))
}

fn invalid_pathname(path: &str) -> PtyError {
    ApiError::new(ErrorCode::InvalidArgument, "invalid pathname")
        .with_details(path.to_string())
        .into()
}

/// Content type by suffix. Clients only ever fetch the page, its script
/// and its stylesheet; everything else goes out as plain text.
pub fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("html" | "htm") => "text/html",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        _ => "text/plain",
    }
}

pub fn resource_message(resource: &str, reason: &str) -> String {
    format!("Resource {resource} : {reason}\n")
}

/// The loop's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A rendered frame, sent as `text/xml`.
    Frame(Vec<u8>),
    Text { status: StatusCode, body: String },
    /// Served from disk by the connection; `resource` is the path as
    /// requested, for error messages.
    File { path: PathBuf, resource: String },
}

impl Reply {
    pub fn text(status: StatusCode, message: &str) -> Self {
        Self::Text {
            status,
            body: format!("{message}\n"),
        }
    }

    pub fn resource_error(status: StatusCode, resource: &str, reason: &str) -> Self {
        Self::Text {
            status,
            body: resource_message(resource, reason),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Reply::Frame(_) | Reply::File { .. } => StatusCode::OK,
            Reply::Text { status, .. } => *status,
        }
    }
}
