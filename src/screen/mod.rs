//! Virtual screen: a flat grid of byte cells addressed by a single cursor
//! offset. Row and column are always derived from the offset.

mod parser;

pub const BLANK: u8 = b' ';

pub const MIN_COLS: u16 = 10;
pub const MAX_COLS: u16 = 150;
pub const DEFAULT_COLS: u16 = 80;
pub const MIN_ROWS: u16 = 4;
pub const MAX_ROWS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub rows: u16,
    pub cols: u16,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
        }
    }
}

impl Geometry {
    /// Builds a geometry from client-requested values. A value that is
    /// missing or outside the supported range falls back to the default.
    pub fn requested(rows: Option<u16>, cols: Option<u16>) -> Self {
        let rows = rows
            .filter(|rows| (MIN_ROWS..=MAX_ROWS).contains(rows))
            .unwrap_or(DEFAULT_ROWS);
        let cols = cols
            .filter(|cols| (MIN_COLS..=MAX_COLS).contains(cols))
            .unwrap_or(DEFAULT_COLS);
        Self { rows, cols }
    }

    pub fn cells(&self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

#[derive(Debug, Clone)]
pub struct Screen {
    geometry: Geometry,
    cells: Vec<u8>,
    cursor: usize,
}

impl Screen {
    pub fn new(geometry: Geometry) -> Self {
        let geometry = Geometry {
            rows: geometry.rows.max(1),
            cols: geometry.cols.max(1),
        };
        Self {
            geometry,
            cells: vec![BLANK; geometry.cells()],
            cursor: 0,
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn rows(&self) -> usize {
        self.geometry.rows as usize
    }

    pub fn cols(&self) -> usize {
        self.geometry.cols as usize
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn cursor_row(&self) -> usize {
        self.cursor / self.cols()
    }

    pub fn cursor_col(&self) -> usize {
        self.cursor % self.cols()
    }

    pub fn row(&self, row: usize) -> &[u8] {
        let cols = self.cols();
        let start = row.min(self.rows() - 1) * cols;
        &self.cells[start..start + cols]
    }

    /// Row contents with trailing blanks removed.
    pub fn row_text(&self, row: usize) -> String {
        let bytes = self.row(row);
        let end = bytes
            .iter()
            .rposition(|&byte| byte != BLANK)
            .map_or(0, |idx| idx + 1);
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    fn last_row_start(&self) -> usize {
        self.cells.len() - self.cols()
    }

    fn row_start(&self) -> usize {
        self.cursor - self.cursor_col()
    }

    fn put(&mut self, byte: u8) {
        self.cells[self.cursor] = byte;
        if self.cursor_col() + 1 < self.cols() {
            self.cursor += 1;
        }
    }

    fn carriage_return(&mut self) {
        self.cursor = self.row_start();
    }

    fn line_feed(&mut self) {
        if self.cursor >= self.last_row_start() {
            let col = self.cursor_col();
            self.scroll_up();
            self.cursor = self.last_row_start() + col;
        } else {
            self.cursor += self.cols();
        }
    }

    fn tab(&mut self) {
        let col = self.cursor_col();
        let target = ((col / 8 + 1) * 8).min(self.cols() - 1);
        self.cursor = self.row_start() + target.max(col);
    }

    fn backspace(&mut self) {
        if self.cursor_col() > 0 {
            self.cursor -= 1;
        }
        self.cells[self.cursor] = BLANK;
    }

    /// Shifts every row up by one, discarding row 0 and blanking the last
    /// row. The cursor is left untouched.
    fn scroll_up(&mut self) {
        let cols = self.cols();
        self.cells.copy_within(cols.., 0);
        let last = self.last_row_start();
        self.cells[last..].fill(BLANK);
    }

    fn move_up(&mut self, count: u16) {
        let rows = (count as usize).min(self.cursor_row());
        self.cursor -= rows * self.cols();
    }

    fn move_down(&mut self, count: u16) {
        let rows = (count as usize).min(self.rows() - 1 - self.cursor_row());
        self.cursor += rows * self.cols();
    }

    fn move_right(&mut self, count: u16) {
        let cols = (count as usize).min(self.cols() - 1 - self.cursor_col());
        self.cursor += cols;
    }

    fn move_left(&mut self, count: u16) {
        let cols = (count as usize).min(self.cursor_col());
        self.cursor -= cols;
    }

    /// 1-based absolute positioning, each coordinate clamped to the screen.
    fn set_position(&mut self, row: u16, col: u16) {
        let row = (row.max(1) as usize).min(self.rows()) - 1;
        let col = (col.max(1) as usize).min(self.cols()) - 1;
        self.cursor = row * self.cols() + col;
    }

    fn erase_below(&mut self) {
        let cursor = self.cursor;
        self.cells[cursor..].fill(BLANK);
    }

    fn erase_above(&mut self) {
        let cursor = self.cursor;
        self.cells[..cursor].fill(BLANK);
    }

    fn erase_all(&mut self) {
        self.cells.fill(BLANK);
        self.cursor = 0;
    }

    fn erase_line_right(&mut self) {
        let end = self.row_start() + self.cols();
        let cursor = self.cursor;
        self.cells[cursor..end].fill(BLANK);
    }

    fn ensure_cursor_in_bounds(&mut self) {
        if self.cursor >= self.cells.len() {
            tracing::error!(
                cursor = self.cursor,
                cells = self.cells.len(),
                "Cursor escaped the screen; clamping"
            );
            self.cursor = self.cells.len() - 1;
        }
    }
}
