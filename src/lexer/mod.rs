use std::fmt;

use crate::ast::Operator;
use crate::lexer::cursor::Cursor;
use crate::span::{Idx, Span};

pub mod cursor;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NumberBase {
    /// `0x1F`
    Hex,
    /// `31`
    Dec,
    /// `%11111`
    Bin,
}

impl NumberBase {
    pub fn radix(self) -> u32 {
        match self {
            NumberBase::Hex => 16,
            NumberBase::Dec => 10,
            NumberBase::Bin => 2,
        }
    }

    /// Length of the prefix in front of the digits.
    pub fn prefix_len(self) -> usize {
        match self {
            NumberBase::Hex => 2,
            NumberBase::Dec => 0,
            NumberBase::Bin => 1,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// `v0` to `vF`
    Register(u8),
    /// Digits may be invalid for the base, which the parser reports.
    Number(NumberBase),
    Ident,
    /// `.equ` and friends, including the dot
    Directive,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Op(Operator),
    Newline,
    /// `;`, the rest of the line is a comment body
    CommentStart,
    /// Only produced in whitespace-significant mode
    Whitespace,
    /// Only produced in whitespace-significant mode
    Text,
    Unknown,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Register(_) => write!(f, "register"),
            TokenKind::Number(_) => write!(f, "number"),
            TokenKind::Ident => write!(f, "identifier"),
            TokenKind::Directive => write!(f, "directive"),
            TokenKind::Comma => write!(f, "`,`"),
            TokenKind::Colon => write!(f, "`:`"),
            TokenKind::LParen => write!(f, "`(`"),
            TokenKind::RParen => write!(f, "`)`"),
            TokenKind::LBracket => write!(f, "`[`"),
            TokenKind::RBracket => write!(f, "`]`"),
            TokenKind::Op(op) => write!(f, "`{}`", op),
            TokenKind::Newline => write!(f, "end of line"),
            TokenKind::CommentStart => write!(f, "comment"),
            TokenKind::Whitespace => write!(f, "whitespace"),
            TokenKind::Text => write!(f, "text"),
            TokenKind::Unknown => write!(f, "unknown token"),
            TokenKind::Eof => write!(f, "end of file"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Whitespace that never separates lines.
pub(crate) fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

pub(crate) fn is_id_start(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '_')
}

pub(crate) fn is_id(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_')
}

/// Token stream with one token of push-back.
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
    pushed: Option<Token>,
    /// Report blanks and free text instead of skipping blanks
    whitespace_mode: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            cursor: Cursor::new(src),
            pushed: None,
            whitespace_mode: false,
        }
    }

    pub fn set_whitespace_mode(&mut self, enabled: bool) {
        self.whitespace_mode = enabled;
    }

    /// Source text covered by `span`.
    pub fn text(&self, span: Span) -> &'a str {
        self.cursor.slice(span.offs(), span.end())
    }

    /// Give back one token, returned again by the next call to [`Lexer::next_token`].
    pub fn unread(&mut self, token: Token) {
        debug_assert!(self.pushed.is_none(), "only one token of push-back");
        self.pushed = Some(token);
    }

    pub fn peek(&mut self) -> Token {
        let token = self.next_token();
        self.unread(token);
        token
    }

    pub fn next_token(&mut self) -> Token {
        if let Some(token) = self.pushed.take() {
            return token;
        }
        if !self.whitespace_mode {
            self.cursor.take_while(is_blank);
        }
        let start = self.cursor.offset();
        let kind = self.advance_token();
        let len = self.cursor.offset() - start;
        Token {
            kind,
            span: Span::new(Idx(start as u32), len as u32),
        }
    }

    fn advance_token(&mut self) -> TokenKind {
        let first_char = match self.cursor.bump() {
            Some(c) => c,
            None => return TokenKind::Eof,
        };
        if self.whitespace_mode {
            return match first_char {
                '\n' => TokenKind::Newline,
                c if is_blank(c) => {
                    self.cursor.take_while(is_blank);
                    TokenKind::Whitespace
                }
                _ => {
                    self.cursor.take_while(|c| c != '\n' && !is_blank(c));
                    TokenKind::Text
                }
            };
        }
        match first_char {
            '\n' => TokenKind::Newline,
            ';' => TokenKind::CommentStart,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '0' if matches!(self.cursor.first(), Some('x' | 'X')) => {
                self.cursor.bump();
                self.cursor.take_while(is_id);
                TokenKind::Number(NumberBase::Hex)
            }
            '0'..='9' => {
                self.cursor.take_while(is_id);
                TokenKind::Number(NumberBase::Dec)
            }
            '%' => self.binary_or_rem(),
            'v' | 'V' => match self.cursor.first() {
                Some(c) if c.is_ascii_hexdigit() && !self.cursor.second().is_some_and(is_id) => {
                    self.cursor.bump();
                    // Checked as hex digit above
                    TokenKind::Register(c.to_digit(16).unwrap_or_default() as u8)
                }
                _ => {
                    self.cursor.take_while(is_id);
                    TokenKind::Ident
                }
            },
            c if is_id_start(c) => {
                self.cursor.take_while(is_id);
                TokenKind::Ident
            }
            '.' => {
                if self.cursor.take_while(is_id) == 0 {
                    TokenKind::Unknown
                } else {
                    TokenKind::Directive
                }
            }
            '|' => self.double('|', Operator::LogicalOr, Operator::BitOr),
            '&' => self.double('&', Operator::LogicalAnd, Operator::BitAnd),
            '=' => {
                if self.cursor.first() == Some('=') {
                    self.cursor.bump();
                    TokenKind::Op(Operator::Eq)
                } else {
                    TokenKind::Unknown
                }
            }
            '!' => self.double('=', Operator::Ne, Operator::Not),
            '<' => match self.cursor.first() {
                Some('<') => self.bump_op(Operator::Shl),
                Some('=') => self.bump_op(Operator::Le),
                _ => TokenKind::Op(Operator::Lt),
            },
            '>' => match self.cursor.first() {
                Some('>') => self.bump_op(Operator::Shr),
                Some('=') => self.bump_op(Operator::Ge),
                _ => TokenKind::Op(Operator::Gt),
            },
            '^' => TokenKind::Op(Operator::BitXor),
            '+' => TokenKind::Op(Operator::Add),
            '-' => TokenKind::Op(Operator::Sub),
            '*' => TokenKind::Op(Operator::Mul),
            '/' => TokenKind::Op(Operator::Div),
            '~' => TokenKind::Op(Operator::Complement),
            _ => TokenKind::Unknown,
        }
    }

    /// `%` directly followed by binary digits is a numeral, anything else is the remainder
    /// operator.
    fn binary_or_rem(&mut self) -> TokenKind {
        let after_percent = self.cursor.offset();
        let digits = self.cursor.take_while(|c| c == '0' || c == '1');
        if digits > 0 && !self.cursor.first().is_some_and(is_id) {
            return TokenKind::Number(NumberBase::Bin);
        }
        self.cursor.set_offset(after_percent);
        TokenKind::Op(Operator::Rem)
    }

    fn double(&mut self, second: char, matched: Operator, single: Operator) -> TokenKind {
        if self.cursor.first() == Some(second) {
            self.bump_op(matched)
        } else {
            TokenKind::Op(single)
        }
    }

    fn bump_op(&mut self, op: Operator) -> TokenKind {
        self.cursor.bump();
        TokenKind::Op(op)
    }
}

/// Every token up to the end of the input, for debugging and tests.
pub fn tokenize(src: &str) -> impl Iterator<Item = Token> + '_ {
    let mut lexer = Lexer::new(src);
    std::iter::from_fn(move || {
        let token = lexer.next_token();
        if token.kind != TokenKind::Eof {
            Some(token)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_instruction_line() {
        assert_eq!(
            kinds("loop: ld vA, 0x1f ; count\n"),
            vec![
                TokenKind::Ident,
                TokenKind::Colon,
                TokenKind::Ident,
                TokenKind::Register(0xA),
                TokenKind::Comma,
                TokenKind::Number(NumberBase::Hex),
                TokenKind::CommentStart,
                TokenKind::Ident,
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn register_prefix_in_identifier() {
        assert_eq!(kinds("va val v10"), vec![
            TokenKind::Register(0xA),
            TokenKind::Ident,
            TokenKind::Ident,
        ]);
    }

    #[test]
    fn percent_backtracks() {
        assert_eq!(kinds("%1010"), vec![TokenKind::Number(NumberBase::Bin)]);
        assert_eq!(
            kinds("7 % 2"),
            vec![
                TokenKind::Number(NumberBase::Dec),
                TokenKind::Op(Operator::Rem),
                TokenKind::Number(NumberBase::Dec),
            ]
        );
        assert_eq!(
            kinds("%12"),
            vec![TokenKind::Op(Operator::Rem), TokenKind::Number(NumberBase::Dec)]
        );
    }

    #[test]
    fn lexes_operators() {
        assert_eq!(
            kinds("<< <= < || | != ! =="),
            vec![
                TokenKind::Op(Operator::Shl),
                TokenKind::Op(Operator::Le),
                TokenKind::Op(Operator::Lt),
                TokenKind::Op(Operator::LogicalOr),
                TokenKind::Op(Operator::BitOr),
                TokenKind::Op(Operator::Ne),
                TokenKind::Op(Operator::Not),
                TokenKind::Op(Operator::Eq),
            ]
        );
    }

    #[test]
    fn whitespace_mode_keeps_text() {
        let mut lexer = Lexer::new("; two  words\nx");
        assert_eq!(lexer.next_token().kind, TokenKind::CommentStart);
        lexer.set_whitespace_mode(true);
        let kinds: Vec<_> = std::iter::from_fn(|| {
            let token = lexer.next_token();
            (token.kind != TokenKind::Newline).then_some(token.kind)
        })
        .collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Whitespace,
                TokenKind::Text,
                TokenKind::Whitespace,
                TokenKind::Text,
            ]
        );
        lexer.set_whitespace_mode(false);
        assert_eq!(lexer.next_token().kind, TokenKind::Ident);
    }

    #[test]
    fn push_back_returns_same_token() {
        let mut lexer = Lexer::new("cls");
        let token = lexer.peek();
        assert_eq!(lexer.text(token.span), "cls");
        assert_eq!(lexer.next_token(), token);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
    }
}
