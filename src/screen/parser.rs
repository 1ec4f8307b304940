//! Streaming interpreter for the subset of ANSI/VT output the screen models.
//!
//! Input is consumed one control or printable byte at a time. A sequence cut
//! off by the end of the input is left unconsumed so that the caller can
//! retry once more bytes arrive; interpretation is therefore independent of
//! how the stream is chunked.

use super::Screen;

const ESC: u8 = 0x1b;
const BS: u8 = 0x08;
const DEL: u8 = 0x7f;
const MAX_PARAMS: usize = 3;

enum Step {
    Consumed(usize),
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CsiParams {
    values: [u16; MAX_PARAMS],
    present: bool,
}

impl CsiParams {
    fn parse(raw: &[u8]) -> Self {
        let mut values = [1; MAX_PARAMS];
        for (slot, field) in values.iter_mut().zip(raw.split(|&byte| byte == b';')) {
            if let Some(value) = std::str::from_utf8(field)
                .ok()
                .and_then(|text| text.parse::<u16>().ok())
            {
                *slot = value;
            }
        }
        Self {
            values,
            present: !raw.is_empty(),
        }
    }

    fn first(&self) -> u16 {
        self.values[0]
    }

    fn second(&self) -> u16 {
        self.values[1]
    }

    /// Selector for the erase commands, where an absent parameter means 0.
    fn mode(&self) -> u16 {
        if self.present { self.values[0] } else { 0 }
    }
}

impl Screen {
    /// Interprets as much of `input` as possible and returns the unconsumed
    /// suffix, which is non-empty only when the input ends inside an escape
    /// sequence.
    pub fn apply<'a>(&mut self, input: &'a [u8]) -> &'a [u8] {
        let mut pos = 0;
        while pos < input.len() {
            match self.step(&input[pos..]) {
                Step::Consumed(len) => pos += len,
                Step::Incomplete => break,
            }
            self.ensure_cursor_in_bounds();
        }
        &input[pos..]
    }

    fn step(&mut self, input: &[u8]) -> Step {
        match input[0] {
            b'\r' => self.carriage_return(),
            b'\n' => self.line_feed(),
            b'\t' => self.tab(),
            BS => self.backspace(),
            ESC => return self.escape(input),
            byte if byte < 0x20 || byte == DEL => {
                tracing::trace!(byte, "Ignoring control byte");
            }
            byte => self.put(byte),
        }
        Step::Consumed(1)
    }

    fn escape(&mut self, input: &[u8]) -> Step {
        match input.get(1) {
            None => Step::Incomplete,
            Some(b'[') => self.control_sequence(input),
            Some(&next) => {
                tracing::debug!(next, "Dropping unsupported escape");
                Step::Consumed(1)
            }
        }
    }

    fn control_sequence(&mut self, input: &[u8]) -> Step {
        let mut idx = 2;
        let private = input.get(idx) == Some(&b'?');
        if private {
            idx += 1;
        }
        let params_start = idx;
        while input
            .get(idx)
            .is_some_and(|byte| byte.is_ascii_digit() || *byte == b';')
        {
            idx += 1;
        }
        let Some(&command) = input.get(idx) else {
            return Step::Incomplete;
        };
        let raw = &input[params_start..idx];
        self.dispatch(private, command, CsiParams::parse(raw), raw);
        Step::Consumed(idx + 1)
    }

    /// The `?` marker only distinguishes mode switches; cursor and erase
    /// commands behave the same with or without it.
    fn dispatch(&mut self, private: bool, command: u8, params: CsiParams, raw: &[u8]) {
        match command {
            b'A' => self.move_up(params.first()),
            b'B' => self.move_down(params.first()),
            b'C' => self.move_right(params.first()),
            b'D' => self.move_left(params.first()),
            b'H' | b'f' => self.set_position(params.first(), params.second()),
            b'J' => match params.mode() {
                0 => self.erase_below(),
                1 => self.erase_above(),
                2 => self.erase_all(),
                _ => unsupported(private, command, raw),
            },
            b'K' => match params.mode() {
                0 => self.erase_line_right(),
                _ => unsupported(private, command, raw),
            },
            b'm' => ignored(private, command, raw),
            b'h' | b'l' if private => ignored(private, command, raw),
            _ => unsupported(private, command, raw),
        }
    }
}

fn ignored(private: bool, command: u8, raw: &[u8]) {
    tracing::debug!(
        sequence = %describe(private, command, raw),
        "Ignoring display attribute or mode sequence"
    );
}

fn unsupported(private: bool, command: u8, raw: &[u8]) {
    tracing::warn!(
        sequence = %describe(private, command, raw),
        "Unsupported ANSI sequence"
    );
}

fn describe(private: bool, command: u8, raw: &[u8]) -> String {
    format!(
        "ESC[{}{}{}",
        if private { "?" } else { "" },
        String::from_utf8_lossy(raw),
        char::from(command).escape_default()
    )
}
