use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use crate::ast::{
    Body, Directive, InstructionStmt, Keyword, Label, Node, NodeKind, Operator, Statement,
};
use crate::error::Message;
use crate::lexer::{Lexer, NumberBase, Token, TokenKind};
use crate::opcode::{self, OPCODES};
use crate::span::{Idx, Span};
use crate::symbol::{Identifier, SymbolError, SymbolKind, SymbolTable};

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

const DIRECTIVES: &str = ".equ, .alias, .origin, .byte, .word, .reserve";

/// Output of parsing: statements, every declared name, and any diagnostics.
pub struct Parsed {
    pub statements: Vec<Statement>,
    pub symbols: SymbolTable,
    pub messages: Vec<Message>,
}

/// Recursive-descent parser turning source lines into statements.
///
/// Errors are recorded per line; parsing resumes at the next line.
pub struct AsmParser<'a> {
    lexer: Lexer<'a>,
    symbols: SymbolTable,
    /// Register aliases, usable only after their declaration
    aliases: FxMap<Identifier, u8>,
    messages: Vec<Message>,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        AsmParser {
            lexer: Lexer::new(src),
            symbols: SymbolTable::new(),
            aliases: FxMap::default(),
            messages: Vec::new(),
        }
    }

    pub fn parse(mut self) -> Parsed {
        let mut statements = Vec::new();
        while self.lexer.peek().kind != TokenKind::Eof {
            match self.statement() {
                Ok(Some(stmt)) => statements.push(stmt),
                Ok(None) => (),
                Err(message) => {
                    self.messages.push(message);
                    self.recover();
                }
            }
        }
        Parsed {
            statements,
            symbols: self.symbols,
            messages: self.messages,
        }
    }

    /// Skip to the start of the next line.
    fn recover(&mut self) {
        loop {
            match self.lexer.next_token().kind {
                TokenKind::Newline | TokenKind::Eof => break,
                _ => (),
            }
        }
    }

    fn statement(&mut self) -> Result<Option<Statement>, Message> {
        let first = self.lexer.next_token();
        let mut tok = first;

        let mut label = None;
        if tok.kind == TokenKind::Ident {
            let after = self.lexer.next_token();
            if after.kind == TokenKind::Colon {
                label = self.label(tok)?;
                tok = self.lexer.next_token();
            } else {
                self.lexer.unread(after);
            }
        }

        let body = match tok.kind {
            TokenKind::Ident => Some(Body::Instruction(self.instruction(tok)?)),
            TokenKind::Directive => self.directive(tok)?.map(Body::Directive),
            _ => {
                self.lexer.unread(tok);
                None
            }
        };
        let comment = self.comment();
        let end = self.end_of_line()?;

        if label.is_none() && body.is_none() && comment.is_none() {
            return Ok(None);
        }
        let span = Span::new(
            Idx(first.span.offs() as u32),
            (end.offs() - first.span.offs()) as u32,
        );
        Ok(Some(Statement {
            label,
            body,
            comment,
            span,
        }))
    }

    /// Declare a label. A duplicate is reported but does not end the line.
    fn label(&mut self, tok: Token) -> Result<Option<Label>, Message> {
        let text = self.lexer.text(tok.span);
        if Keyword::from_word(text).is_some() {
            return Err(Message::error(
                "parse::reserved_label",
                tok.span,
                format!("`{}` is a reserved word and cannot be used as a label", text),
            ));
        }
        let name = self.identifier(tok)?;
        match self
            .symbols
            .declare(name.clone(), SymbolKind::Label, tok.span)
        {
            Ok(()) => Ok(Some(Label {
                name,
                span: tok.span,
            })),
            Err(err) => {
                self.messages.push(duplicate(err, tok.span));
                Ok(None)
            }
        }
    }

    fn identifier(&self, tok: Token) -> Result<Identifier, Message> {
        let text = self.lexer.text(tok.span);
        Identifier::new(text).ok_or_else(|| {
            Message::error(
                "parse::identifier",
                tok.span,
                format!("`{}` is not a valid identifier", text),
            )
        })
    }

    fn instruction(&mut self, tok: Token) -> Result<InstructionStmt, Message> {
        let mnemonic = self.lexer.text(tok.span);
        if !opcode::is_mnemonic(mnemonic) {
            return Err(Message::error(
                "parse::unknown_instruction",
                tok.span,
                format!("Unknown instruction `{}`", mnemonic),
            )
            .with_label("not an instruction"));
        }
        let operands = self.operands()?;
        let span = operands
            .last()
            .map_or(tok.span, |last| tok.span.to(last.span));

        let found: Vec<_> = opcode::matching(mnemonic, &operands).collect();
        match found.as_slice() {
            [opcode] => Ok(InstructionStmt {
                opcode: *opcode,
                operands,
            }),
            [] => {
                let forms: Vec<String> = OPCODES
                    .iter()
                    .filter(|op| op.mnemonic.eq_ignore_ascii_case(mnemonic))
                    .map(|op| op.to_string())
                    .collect();
                Err(Message::error(
                    "parse::unknown_instruction",
                    span,
                    format!(
                        "Unknown instruction: no form of `{}` takes these operands",
                        mnemonic.to_ascii_uppercase()
                    ),
                )
                .with_label("invalid operands")
                .with_help(format!("available forms: {}", forms.join("; "))))
            }
            _ => Err(Message::error(
                "parse::ambiguous_instruction",
                span,
                format!(
                    "Internal error: `{}` matches {} instruction forms",
                    mnemonic.to_ascii_uppercase(),
                    found.len()
                ),
            )),
        }
    }

    fn operands(&mut self) -> Result<Vec<Node>, Message> {
        let mut operands = Vec::new();
        if ends_operands(self.lexer.peek().kind) {
            return Ok(operands);
        }
        loop {
            operands.push(self.operand()?);
            let sep = self.lexer.next_token();
            if sep.kind != TokenKind::Comma {
                self.lexer.unread(sep);
                break;
            }
        }
        Ok(operands)
    }

    fn operand(&mut self) -> Result<Node, Message> {
        let tok = self.lexer.next_token();
        match tok.kind {
            TokenKind::Register(reg) => Ok(Node::new(NodeKind::Register(reg), tok.span)),
            TokenKind::LBracket => {
                let inner = self.lexer.next_token();
                if inner.kind != TokenKind::Ident
                    || Keyword::from_word(self.lexer.text(inner.span)) != Some(Keyword::Index)
                {
                    return Err(self.unexpected(inner, "`I`"));
                }
                let close = self.expect(TokenKind::RBracket, "`]`")?;
                Ok(Node::new(
                    NodeKind::Keyword(Keyword::IndexMemory),
                    tok.span.to(close.span),
                ))
            }
            TokenKind::Ident if ends_operand(self.lexer.peek().kind) => {
                let text = self.lexer.text(tok.span);
                if let Some(keyword) = Keyword::from_word(text) {
                    return Ok(Node::new(NodeKind::Keyword(keyword), tok.span));
                }
                let name = self.identifier(tok)?;
                match self.aliases.get(&name) {
                    Some(&reg) => Ok(Node::new(NodeKind::Register(reg), tok.span)),
                    None => Ok(Node::new(NodeKind::Identifier(name), tok.span)),
                }
            }
            _ => self.expression(tok),
        }
    }

    /// Expression starting with the already consumed token `first`.
    fn expression(&mut self, first: Token) -> Result<Node, Message> {
        self.binary(first, 1)
    }

    /// Precedence climbing over binary operators binding at least as tight as `min_prec`.
    fn binary(&mut self, first: Token, min_prec: u8) -> Result<Node, Message> {
        let mut lhs = self.unary(first)?;
        loop {
            let tok = self.lexer.next_token();
            let (op, prec) = match tok.kind {
                TokenKind::Op(op) => match op.precedence() {
                    Some(prec) if prec >= min_prec => (op, prec),
                    _ => {
                        self.lexer.unread(tok);
                        break;
                    }
                },
                _ => {
                    self.lexer.unread(tok);
                    break;
                }
            };
            let next = self.lexer.next_token();
            let rhs = self.binary(next, prec + 1)?;
            let span = lhs.span.to(rhs.span);
            lhs = Node::new(
                NodeKind::Operator {
                    op,
                    operands: vec![lhs, rhs],
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn unary(&mut self, tok: Token) -> Result<Node, Message> {
        let op = match tok.kind {
            TokenKind::Op(Operator::Sub) => Operator::Neg,
            TokenKind::Op(Operator::Complement) => Operator::Complement,
            TokenKind::Op(Operator::Not) => Operator::Not,
            _ => return self.primary(tok),
        };
        let next = self.lexer.next_token();
        let operand = self.unary(next)?;
        let span = tok.span.to(operand.span);
        Ok(Node::new(
            NodeKind::Operator {
                op,
                operands: vec![operand],
            },
            span,
        ))
    }

    fn primary(&mut self, tok: Token) -> Result<Node, Message> {
        match tok.kind {
            TokenKind::Number(base) => {
                let value = self.number(tok, base)?;
                Ok(Node::new(NodeKind::Number(value), tok.span))
            }
            TokenKind::Ident => {
                let name = self.identifier(tok)?;
                if self.aliases.contains_key(&name) {
                    return Err(Message::error(
                        "parse::alias_in_expression",
                        tok.span,
                        format!("`{}` is a register alias and cannot appear in an expression", name),
                    ));
                }
                Ok(Node::new(NodeKind::Identifier(name), tok.span))
            }
            TokenKind::LParen => {
                let next = self.lexer.next_token();
                let inner = self.expression(next)?;
                let close = self.expect(TokenKind::RParen, "`)`")?;
                Ok(Node::new(inner.kind, tok.span.to(close.span)))
            }
            TokenKind::Register(_) => Err(Message::error(
                "parse::register_in_expression",
                tok.span,
                "Registers cannot appear in an expression",
            )),
            _ => Err(self.unexpected(tok, "an operand")),
        }
    }

    fn number(&self, tok: Token, base: NumberBase) -> Result<i64, Message> {
        let text = self.lexer.text(tok.span);
        i64::from_str_radix(&text[base.prefix_len()..], base.radix()).map_err(|e| {
            Message::error(
                "parse::bad_literal",
                tok.span,
                format!("Invalid numeric literal `{}`: {}", text, e),
            )
            .with_help("numbers are written as 42, 0x2A or %101010")
        })
    }

    fn directive(&mut self, tok: Token) -> Result<Option<Directive>, Message> {
        let name = self.lexer.text(tok.span)[1..].to_ascii_lowercase();
        let directive = match name.as_str() {
            "equ" => {
                let name_tok = self.expect(TokenKind::Ident, "a constant name")?;
                let name = self.identifier(name_tok)?;
                self.expect(TokenKind::Comma, "`,`")?;
                let first = self.lexer.next_token();
                let value = self.expression(first)?;
                if let Err(err) =
                    self.symbols
                        .declare(name.clone(), SymbolKind::Constant, name_tok.span)
                {
                    return Err(duplicate(err, name_tok.span));
                }
                Directive::Equ {
                    name: Label {
                        name,
                        span: name_tok.span,
                    },
                    value,
                }
            }
            "alias" => {
                self.alias()?;
                return Ok(None);
            }
            "origin" => Directive::Origin(self.single_expression()?),
            "byte" => Directive::Byte(self.expression_list()?),
            "word" => Directive::Word(self.expression_list()?),
            "reserve" => Directive::Reserve(self.single_expression()?),
            _ => {
                return Err(Message::error(
                    "parse::directive",
                    tok.span,
                    "Encountered an invalid directive.",
                )
                .with_label("unknown directive")
                .with_help(format!("available directives: {}", DIRECTIVES)))
            }
        };
        Ok(Some(directive))
    }

    /// `.alias name, vN`
    fn alias(&mut self) -> Result<(), Message> {
        let name_tok = self.expect(TokenKind::Ident, "an alias name")?;
        let name = self.identifier(name_tok)?;
        if Keyword::from_word(name.as_str()).is_some() {
            return Err(Message::error(
                "parse::alias",
                name_tok.span,
                format!("`{}` is a reserved word and cannot be an alias", name),
            ));
        }
        self.expect(TokenKind::Comma, "`,`")?;
        let reg_tok = self.lexer.next_token();
        let TokenKind::Register(reg) = reg_tok.kind else {
            return Err(self.unexpected(reg_tok, "a register"));
        };
        if self.aliases.contains_key(&name) {
            return Err(Message::error(
                "parse::alias",
                name_tok.span,
                format!("Alias `{}` is already defined", name),
            ));
        }
        self.aliases.insert(name, reg);
        Ok(())
    }

    fn single_expression(&mut self) -> Result<Node, Message> {
        let first = self.lexer.next_token();
        if ends_operands(first.kind) {
            return Err(self.unexpected(first, "an expression"));
        }
        self.expression(first)
    }

    fn expression_list(&mut self) -> Result<Vec<Node>, Message> {
        let mut nodes = vec![self.single_expression()?];
        loop {
            let sep = self.lexer.next_token();
            if sep.kind != TokenKind::Comma {
                self.lexer.unread(sep);
                break;
            }
            nodes.push(self.single_expression()?);
        }
        Ok(nodes)
    }

    /// Comment body, read with whitespace kept so the span covers the text as written.
    fn comment(&mut self) -> Option<Span> {
        let start = self.lexer.next_token();
        if start.kind != TokenKind::CommentStart {
            self.lexer.unread(start);
            return None;
        }
        self.lexer.set_whitespace_mode(true);
        let mut body: Option<Span> = None;
        loop {
            let tok = self.lexer.next_token();
            match tok.kind {
                TokenKind::Newline | TokenKind::Eof => {
                    self.lexer.unread(tok);
                    break;
                }
                TokenKind::Text => body = Some(body.map_or(tok.span, |b| b.to(tok.span))),
                _ => (),
            }
        }
        self.lexer.set_whitespace_mode(false);
        Some(body.unwrap_or(Span::new(Idx(start.span.end() as u32), 0)))
    }

    /// Consume the line terminator and return its span.
    fn end_of_line(&mut self) -> Result<Span, Message> {
        let tok = self.lexer.next_token();
        match tok.kind {
            TokenKind::Newline => Ok(tok.span),
            TokenKind::Eof => {
                self.lexer.unread(tok);
                Ok(tok.span)
            }
            _ => Err(self.unexpected(tok, "end of line")),
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, Message> {
        let tok = self.lexer.next_token();
        if tok.kind == kind {
            Ok(tok)
        } else {
            Err(self.unexpected(tok, expected))
        }
    }

    /// Error for `tok`. A line terminator is given back so recovery stops at this line.
    fn unexpected(&mut self, tok: Token, expected: &str) -> Message {
        if matches!(tok.kind, TokenKind::Newline | TokenKind::Eof) {
            self.lexer.unread(tok);
        }
        Message::error(
            "parse::unexpected_token",
            tok.span,
            format!("Expected {}, found {}", expected, tok.kind),
        )
        .with_label("unexpected token")
    }
}

fn ends_operands(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Newline | TokenKind::Eof | TokenKind::CommentStart
    )
}

fn ends_operand(kind: TokenKind) -> bool {
    kind == TokenKind::Comma || ends_operands(kind)
}

fn duplicate(err: SymbolError, span: Span) -> Message {
    let message = Message::error("parse::duplicate_symbol", span, format!("{}", err))
        .with_label("duplicate declaration");
    match err {
        SymbolError::Duplicate { previous, .. } => message.with_help(format!(
            "the first declaration is at offset {}",
            previous.offs()
        )),
        _ => message,
    }
}
