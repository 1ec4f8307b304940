//! Polling wire format for a session's screen.

use crate::screen::Screen;
use crate::session::Session;
use std::fmt::Write;

pub const CONTENT_TYPE: &str = "text/xml";
pub const UNCHANGED_BODY: &str = r#"<?xml version="1.0" ?><idem></idem>"#;

const SCREEN_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8" ?><pre class="term kindle">"#;
const SCREEN_CLOSE: &str = "</pre>";
const CURSOR_OPEN: &str = r#"<span class="b1">"#;
const CURSOR_CLOSE: &str = "</span>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Nothing changed since the last frame sent for this session.
    Unchanged,
    Screen(String),
}

impl Frame {
    pub fn into_body(self) -> Vec<u8> {
        match self {
            Frame::Unchanged => UNCHANGED_BODY.as_bytes().to_vec(),
            Frame::Screen(body) => body.into_bytes(),
        }
    }
}

/// Renders the session's screen if it differs from the last rendered one.
pub fn render(session: &mut Session) -> Frame {
    match session.take_changed_screen() {
        Some(screen) => Frame::Screen(encode_screen(screen)),
        None => Frame::Unchanged,
    }
}

pub fn encode_screen(screen: &Screen) -> String {
    let cols = screen.cols();
    let cursor = screen.cursor();
    let mut out = String::with_capacity(
        SCREEN_OPEN.len() + screen.cells().len() * 3 + screen.rows() + 64,
    );
    out.push_str(SCREEN_OPEN);
    for (idx, &byte) in screen.cells().iter().enumerate() {
        if idx == cursor {
            out.push_str(CURSOR_OPEN);
            push_cell(&mut out, byte);
            out.push_str(CURSOR_CLOSE);
        } else {
            push_cell(&mut out, byte);
        }
        if (idx + 1) % cols == 0 {
            out.push('\n');
        }
    }
    out.push_str(SCREEN_CLOSE);
    out
}

fn push_cell(out: &mut String, byte: u8) {
    if byte.is_ascii_alphanumeric() || byte == b' ' {
        out.push(char::from(byte));
    } else {
        let _ = write!(out, "%{byte:02x}");
    }
}
