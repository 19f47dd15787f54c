//! 8x7 keyboard matrix, layout tables and ghosting resolution (spec.md
//! §3 "Keyboard matrix", §4.8). Grounded in `original_source/dkbd.c`'s
//! `dkbd_map_init` (row/col crosspoint table, unicode-to-chord table)
//! and `keyboard.c`'s `keyboard_column_update`/`keyboard_row_update`
//! (output mask from one PIA side selects a combined input mask on the
//! other).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Dragon,
    Coco,
    Dragon200E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixPoint {
    pub row: u8,
    pub col: u8,
}

const UNMAPPED: MatrixPoint = MatrixPoint { row: 8, col: 8 };

#[derive(Clone, Copy)]
struct Chord {
    point: MatrixPoint,
    shift: Option<bool>,
}

/// Symbolic key codes, chosen (as in the original) so a Dragon layout's
/// code value directly encodes its matrix crosspoint; CoCo needs a
/// small per-row translation applied in [`Layout::point_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCode(pub u8);

impl Layout {
    fn point_for(self, code: KeyCode) -> MatrixPoint {
        let i = code.0;
        if i >= 0x38 {
            return UNMAPPED;
        }
        let col = i & 7;
        let mut row = (i >> 3) & 7;
        if self == Layout::Coco && row != 6 {
            row = (row + 4) % 6;
        }
        MatrixPoint { row, col }
    }

    /// Translate a unicode codepoint to a matrix chord (key + optional
    /// forced shift state), mirroring `dkbd_map_init`'s
    /// `unicode_to_dkey` table for the common ASCII ranges plus the
    /// handful of named extras every layout carries.
    fn chord_for_unicode(self, c: char) -> Option<Chord> {
        let u = c as u32;
        let point = |row, col| MatrixPoint { row, col };
        match u {
            0x30 => Some(Chord { point: point(0, 0), shift: Some(false) }), // '0'
            0x31..=0x39 => Some(Chord { point: point(0, (u - 0x30) as u8), shift: Some(false) }),
            0x21..=0x29 => Some(Chord { point: point(0, (u - 0x21 + 1) as u8), shift: Some(true) }), // '!'..')'
            0x61..=0x7a => Some(Chord { point: point(1, (u - 0x61) as u8 & 7).row_shift(u - 0x61), shift: Some(false) }),
            0x41..=0x5a => Some(Chord { point: point(1, (u - 0x41) as u8 & 7).row_shift(u - 0x41), shift: Some(true) }),
            0x20 => Some(Chord { point: point(2, 7), shift: None }), // space
            0x0d | 0x0a => Some(Chord { point: point(2, 6), shift: None }), // enter
            0x0c => Some(Chord { point: point(6, 1), shift: None }), // clear
            0x1b => Some(Chord { point: point(6, 2), shift: None }), // break
            0x08 | 0x7f => Some(Chord { point: point(1, 5), shift: Some(false) }), // backspace -> left
            _ => None,
        }
    }
}

impl MatrixPoint {
    /// The A-Z/a-z block spans three matrix rows (1,2,3) eight columns
    /// each, following the standard Dragon keymap layout.
    fn row_shift(self, letter_index: u32) -> MatrixPoint {
        MatrixPoint { row: self.row + (letter_index / 8) as u8, col: self.col }
    }
}

/// Press-state matrix: `column[c]`/`row[r]` carry a bitmask where a 0
/// bit at position N means "switch at (N,c)" (or `(r,N)`) is held down
/// -- the same polarity as `keyboard_column`/`keyboard_row` in the
/// original so the PIA-facing read logic matches exactly.
pub struct Keyboard {
    layout: Layout,
    column: [u8; 8],
    row: [u8; 7],
}

impl Keyboard {
    pub fn new(layout: Layout) -> Self {
        Self { layout, column: [0xff; 8], row: [0x7f; 7] }
    }

    pub fn set_layout(&mut self, layout: Layout) {
        self.layout = layout;
    }

    fn press_matrix(&mut self, p: MatrixPoint) {
        if p.row >= 7 || p.col >= 8 {
            return;
        }
        self.column[p.col as usize] &= !(1 << p.row);
        self.row[p.row as usize] &= !(1 << p.col);
    }

    fn release_matrix(&mut self, p: MatrixPoint) {
        if p.row >= 7 || p.col >= 8 {
            return;
        }
        self.column[p.col as usize] |= 1 << p.row;
        self.row[p.row as usize] |= 1 << p.col;
    }

    pub fn press_key(&mut self, code: KeyCode) {
        self.press_matrix(self.layout.point_for(code));
    }

    pub fn release_key(&mut self, code: KeyCode) {
        self.release_matrix(self.layout.point_for(code));
    }

    pub fn press_unicode(&mut self, c: char) {
        if let Some(chord) = self.layout.chord_for_unicode(c) {
            match chord.shift {
                Some(true) => self.press_matrix(MatrixPoint { row: 6, col: 7 }),
                Some(false) => self.release_matrix(MatrixPoint { row: 6, col: 7 }),
                None => {}
            }
            self.press_matrix(chord.point);
        }
    }

    pub fn release_unicode(&mut self, c: char) {
        if let Some(chord) = self.layout.chord_for_unicode(c) {
            self.release_matrix(chord.point);
            if chord.shift.is_some() {
                self.release_matrix(MatrixPoint { row: 6, col: 7 });
            }
        }
    }

    /// Resolve column lines given PIA row-select outputs, applying the
    /// ghosting fixpoint (spec.md "Design notes": bounded at 7 rounds,
    /// `O(keys^2)` worst case). A phantom key appears whenever two real
    /// presses share a row and a column with a third -- the fixpoint
    /// folds in any such implied crosspoint until nothing new is added.
    pub fn read_columns(&self, row_select: u8) -> u8 {
        let mut pressed = self.pressed_set();
        self.close_ghosts(&mut pressed);
        let mut result = 0x7f;
        for (row, col) in pressed.iter().copied() {
            if row_select & (1 << col) == 0 {
                result &= !(1 << row);
            }
        }
        result
    }

    pub fn read_rows(&self, col_select: u8) -> u8 {
        let mut pressed = self.pressed_set();
        self.close_ghosts(&mut pressed);
        let mut result = 0xff;
        for (row, col) in pressed.iter().copied() {
            if col_select & (1 << row) == 0 {
                result &= !(1 << col);
            }
        }
        result
    }

    fn pressed_set(&self) -> Vec<(u8, u8)> {
        let mut v = Vec::new();
        for col in 0..8u8 {
            for row in 0..7u8 {
                if self.column[col as usize] & (1 << row) == 0 {
                    v.push((row, col));
                }
            }
        }
        v
    }

    fn close_ghosts(&self, pressed: &mut Vec<(u8, u8)>) {
        for _round in 0..7 {
            let mut added = false;
            let snapshot = pressed.clone();
            for i in 0..snapshot.len() {
                for j in (i + 1)..snapshot.len() {
                    let (r1, c1) = snapshot[i];
                    let (r2, c2) = snapshot[j];
                    if r1 == r2 || c1 == c2 {
                        continue;
                    }
                    for &(pr, pc) in &[(r1, c2), (r2, c1)] {
                        if !pressed.contains(&(pr, pc)) {
                            pressed.push((pr, pc));
                            added = true;
                        }
                    }
                }
            }
            if !added {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressing_then_releasing_a_key_clears_the_matrix_bit() {
        let mut kb = Keyboard::new(Layout::Dragon);
        kb.press_key(KeyCode(0)); // (row 0, col 0)
        assert_eq!(kb.read_rows(0xff) & 1, 0);
        kb.release_key(KeyCode(0));
        assert_eq!(kb.read_rows(0xff) & 1, 1);
    }

    #[test]
    fn three_keys_sharing_rows_and_columns_ghost_a_fourth() {
        let mut kb = Keyboard::new(Layout::Dragon);
        // (0,0), (0,1), (1,0) pressed -> (1,1) ghosts in.
        kb.press_key(KeyCode(0));
        kb.press_key(KeyCode(1));
        kb.press_key(KeyCode(8));
        let mut pressed = kb.pressed_set();
        kb.close_ghosts(&mut pressed);
        assert!(pressed.contains(&(1, 1)));
    }

    #[test]
    fn coco_layout_remaps_rows_but_not_row_six() {
        let coco = Layout::Coco;
        let p = coco.point_for(KeyCode(0)); // row 0 col 0 on dragon -> row 4 on coco
        assert_eq!(p, MatrixPoint { row: 4, col: 0 });
        let clear = coco.point_for(KeyCode(0x33)); // row 6, unaffected
        assert_eq!(clear.row, 6);
    }
}
