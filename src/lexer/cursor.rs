// Loosely modelled on the cursor in `rustc_lexer`.
// See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

/// Character scanner over source text.
///
/// The offset can be read and restored, which lets the lexer try one reading of the input and
/// back out of it.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    src: &'a str,
    /// Byte offset of the next character
    offs: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str) -> Cursor<'a> {
        Cursor { src, offs: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offs
    }

    /// Restore an offset previously returned by [`Cursor::offset`].
    pub fn set_offset(&mut self, offs: usize) {
        debug_assert!(self.src.is_char_boundary(offs));
        self.offs = offs;
    }

    pub fn is_eof(&self) -> bool {
        self.offs >= self.src.len()
    }

    /// Remaining input
    pub fn rest(&self) -> &'a str {
        &self.src[self.offs..]
    }

    /// Peek at the next character without consuming it.
    pub fn first(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Peek one character past [`Cursor::first`].
    pub fn second(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.first()?;
        self.offs += c.len_utf8();
        Some(c)
    }

    /// Consume characters while `predicate` holds, returning how many were eaten.
    pub fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) -> usize {
        let mut count = 0;
        while let Some(c) = self.first() {
            if !predicate(c) {
                break;
            }
            self.bump();
            count += 1;
        }
        count
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.src[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backtracks_to_saved_offset() {
        let mut cursor = Cursor::new("%102");
        cursor.bump();
        let saved = cursor.offset();
        assert_eq!(cursor.take_while(|c| c == '0' || c == '1'), 2);
        assert_eq!(cursor.first(), Some('2'));
        cursor.set_offset(saved);
        assert_eq!(cursor.rest(), "102");
        assert_eq!(cursor.second(), Some('0'));
    }
}
