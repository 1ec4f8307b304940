//! Property-based tests for the screen interpreter.

use proptest::prelude::*;
use termpoll::screen::{BLANK, Geometry, MAX_COLS, MAX_ROWS, MIN_COLS, MIN_ROWS, Screen};

fn geometry() -> impl Strategy<Value = Geometry> {
    (MIN_ROWS..=MAX_ROWS, MIN_COLS..=MAX_COLS).prop_map(|(rows, cols)| Geometry { rows, cols })
}

/// Terminal-ish output: text, control bytes and escape sequences, with
/// enough structure that sequences are often cut by chunk boundaries.
fn terminal_output() -> impl Strategy<Value = Vec<u8>> {
    let piece = prop_oneof![
        "[a-z0-9 ]{1,12}".prop_map(String::into_bytes),
        Just(b"\r\n".to_vec()),
        Just(b"\t".to_vec()),
        Just(b"\x08".to_vec()),
        (1u16..120, 1u16..200).prop_map(|(row, col)| format!("\x1b[{row};{col}H").into_bytes()),
        (0u16..4, prop::sample::select(vec!['A', 'B', 'C', 'D', 'J', 'K']))
            .prop_map(|(n, cmd)| format!("\x1b[{n}{cmd}").into_bytes()),
        Just(b"\x1b[?25l".to_vec()),
        Just(b"\x1b[1;32m".to_vec()),
        Just(b"\x1bM".to_vec()),
        any::<u8>().prop_map(|byte| vec![byte]),
    ];
    prop::collection::vec(piece, 0..60).prop_map(|pieces| pieces.concat())
}

/// Feeds `input` in the given chunk sizes, carrying unconsumed suffixes
/// over the way a session does.
fn feed_chunked(screen: &mut Screen, input: &[u8], sizes: &[usize]) -> Vec<u8> {
    let mut pending = Vec::new();
    let mut rest = input;
    let mut sizes = sizes.iter().cycle();
    while !rest.is_empty() {
        let size = (*sizes.next().unwrap_or(&1)).clamp(1, rest.len());
        pending.extend_from_slice(&rest[..size]);
        rest = &rest[size..];
        pending = screen.apply(&pending).to_vec();
    }
    pending
}

proptest! {
    #[test]
    fn chunking_does_not_change_the_result(
        geometry in geometry(),
        input in terminal_output(),
        sizes in prop::collection::vec(1usize..16, 1..8),
    ) {
        let mut whole = Screen::new(geometry);
        let whole_rest = whole.apply(&input).to_vec();

        let mut chunked = Screen::new(geometry);
        let chunked_rest = feed_chunked(&mut chunked, &input, &sizes);

        prop_assert_eq!(whole.cells(), chunked.cells());
        prop_assert_eq!(whole.cursor(), chunked.cursor());
        prop_assert_eq!(whole_rest, chunked_rest);
    }

    #[test]
    fn cursor_stays_on_screen(geometry in geometry(), input in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut screen = Screen::new(geometry);
        let mut pending = Vec::new();
        for byte in input {
            pending.push(byte);
            pending = screen.apply(&pending).to_vec();
            prop_assert!(screen.cursor() < geometry.cells());
        }
    }

    #[test]
    fn structured_output_keeps_cursor_on_screen(geometry in geometry(), input in terminal_output()) {
        let mut screen = Screen::new(geometry);
        screen.apply(&input);
        prop_assert!(screen.cursor() < geometry.cells());
        prop_assert_eq!(screen.cells().len(), geometry.cells());
    }

    #[test]
    fn short_text_is_recovered_from_its_row(text in "[A-Za-z0-9]{1,9}", row in 0u16..4) {
        let mut screen = Screen::new(Geometry { rows: 4, cols: 10 });
        screen.apply(format!("\x1b[{};1H{text}", row + 1).as_bytes());
        prop_assert_eq!(screen.row_text(row as usize), text);
    }

    #[test]
    fn scrolling_keeps_the_newest_lines_in_order(extra in 1usize..20) {
        let rows = 5usize;
        let mut screen = Screen::new(Geometry { rows: rows as u16, cols: 10 });
        let total = rows + extra;
        for line in 0..total {
            screen.apply(format!("line{line}\r\n").as_bytes());
        }
        // The trailing newline leaves the last row blank.
        for row in 0..rows - 1 {
            let expected = format!("line{}", total - (rows - 1) + row);
            prop_assert_eq!(screen.row_text(row), expected);
        }
        prop_assert!(screen.row(rows - 1).iter().all(|&byte| byte == BLANK));
        prop_assert_eq!(screen.cursor_row(), rows - 1);
    }
}
