use crate::ast::{Body, Directive, InstructionStmt, Node, NodeKind, Statement};
use crate::error::{has_errors, Message};
use crate::eval::Evaluator;
use crate::parser::AsmParser;
use crate::span::Span;
use crate::symbol::{SymbolKind, SymbolTable};

/// Addresses are 16 bits wide, the machine only decodes 12 of them.
const ADDRESS_SPACE: u32 = 0x10000;

/// Successfully assembled binary.
#[derive(Debug)]
pub struct Program {
    /// Address of the first byte
    pub origin: u16,
    pub bytes: Vec<u8>,
    pub symbols: SymbolTable,
    /// Warnings and notes; never errors
    pub messages: Vec<Message>,
}

/// Assemble `src` for loading at `origin`.
///
/// All-or-nothing: any error-severity message means no binary, and every message is returned.
pub fn assemble(src: &str, origin: u16) -> Result<Program, Vec<Message>> {
    let parsed = AsmParser::new(src).parse();
    if has_errors(&parsed.messages) {
        return Err(parsed.messages);
    }

    let mut ctx = CompilationContext::new(origin, parsed.symbols, parsed.messages);
    ctx.address_pass(&parsed.statements);
    if !has_errors(&ctx.messages) {
        ctx.code_pass(&parsed.statements);
        ctx.report_unused_labels();
    }

    if has_errors(&ctx.messages) {
        return Err(ctx.messages);
    }
    Ok(Program {
        origin,
        bytes: ctx.output,
        symbols: ctx.symbols,
        messages: ctx.messages,
    })
}

/// Running state shared by both passes.
struct CompilationContext {
    origin: u16,
    /// Address of the next emitted byte. Wider than `u16` to notice overflow.
    address: u32,
    overflowed: bool,
    output: Vec<u8>,
    symbols: SymbolTable,
    messages: Vec<Message>,
}

impl CompilationContext {
    fn new(origin: u16, symbols: SymbolTable, messages: Vec<Message>) -> Self {
        CompilationContext {
            origin,
            address: origin as u32,
            overflowed: false,
            output: Vec::new(),
            symbols,
            messages,
        }
    }

    fn rewind(&mut self) {
        self.address = self.origin as u32;
        self.overflowed = false;
        self.output.clear();
    }

    /// Pass 1: give every label its address and every constant its value.
    fn address_pass(&mut self, statements: &[Statement]) {
        self.rewind();
        for stmt in statements {
            if let Some(label) = &stmt.label {
                if let Err(err) = self.symbols.define(&label.name, self.address as i64) {
                    self.error("asm::symbol", label.span, err.to_string());
                }
            }
            match &stmt.body {
                None => (),
                Some(Body::Instruction(_)) => self.advance(2, stmt.span),
                Some(Body::Directive(directive)) => match directive {
                    Directive::Equ { name, value } => {
                        match Evaluator::new(&self.symbols).try_number(value) {
                            Ok(Some(n)) => {
                                if let Err(err) = self.symbols.define(&name.name, n) {
                                    self.error("asm::symbol", name.span, err.to_string());
                                }
                            }
                            Ok(None) => self.messages.push(
                                Message::error(
                                    "asm::forward_reference",
                                    value.span,
                                    format!("Value of `{}` depends on a label defined later", name.name),
                                )
                                .with_help(".equ may only refer to labels and constants declared above it"),
                            ),
                            Err(err) => self.error("asm::eval", err.span(), err.to_string()),
                        }
                    }
                    Directive::Origin(node) => self.origin(node),
                    Directive::Byte(values) => self.advance(values.len() as u32, stmt.span),
                    Directive::Word(values) => self.advance(2 * values.len() as u32, stmt.span),
                    Directive::Reserve(node) => {
                        if let Some(count) = self.reserve_count(node) {
                            self.advance(count, stmt.span);
                        }
                    }
                },
            }
        }
    }

    /// Pass 2: evaluate operands and emit code.
    fn code_pass(&mut self, statements: &[Statement]) {
        self.rewind();
        for stmt in statements {
            for node in stmt.nodes() {
                node.visit_identifiers(&mut |name, _| self.symbols.mark_used(name));
            }
            match &stmt.body {
                None => (),
                Some(Body::Instruction(instr)) => {
                    if self.address % 2 != 0 {
                        self.messages.push(
                            Message::warning(
                                "asm::alignment",
                                stmt.span,
                                format!("Instruction at odd address 0x{:03x}", self.address),
                            )
                            .with_help("jumps can only reach even addresses; pad data with .byte 0"),
                        );
                    }
                    let word = self.encode(instr).unwrap_or(0);
                    self.emit(&word.to_be_bytes(), stmt.span);
                }
                Some(Body::Directive(directive)) => match directive {
                    Directive::Equ { .. } => (),
                    Directive::Origin(node) => self.origin(node),
                    Directive::Byte(values) => {
                        for value in values {
                            let byte = self.immediate(value, 8).unwrap_or(0) as u8;
                            self.emit(&[byte], stmt.span);
                        }
                    }
                    Directive::Word(values) => {
                        for value in values {
                            let word = self.immediate(value, 16).unwrap_or(0);
                            self.emit(&word.to_be_bytes(), stmt.span);
                        }
                    }
                    Directive::Reserve(node) => {
                        if let Some(count) = self.reserve_count(node) {
                            self.pad(count, stmt.span);
                        }
                    }
                },
            }
        }
    }

    fn encode(&mut self, instr: &InstructionStmt) -> Option<u16> {
        let mut values = Vec::with_capacity(instr.operands.len());
        let mut failed = false;
        for (kind, node) in instr.opcode.signature.iter().zip(&instr.operands) {
            let value = match (kind.bits(), &node.kind) {
                (Some(bits), _) => self.immediate(node, bits),
                (None, NodeKind::Register(reg)) => Some(*reg as u16),
                (None, _) => Some(0),
            };
            match value {
                Some(value) => values.push(value),
                None => failed = true,
            }
        }
        (!failed).then(|| instr.opcode.encode(&values))
    }

    /// Evaluate and range-check an immediate of `bits` width, accepting negative values down to
    /// `-2^(bits-1)`. Reports and returns `None` on failure.
    fn immediate(&mut self, node: &Node, bits: u32) -> Option<u16> {
        let value = match Evaluator::new(&self.symbols).number(node) {
            Ok(value) => value,
            Err(err) => {
                self.error("asm::eval", err.span(), err.to_string());
                return None;
            }
        };
        match fit(value, bits) {
            Some(value) => Some(value),
            None => {
                self.messages.push(
                    Message::error(
                        "asm::range",
                        node.span,
                        format!("Value {} does not fit in {} bits", value, bits),
                    )
                    .with_label(format!("allowed range is {} to {}", -(1i64 << (bits - 1)), (1i64 << bits) - 1)),
                );
                None
            }
        }
    }

    fn origin(&mut self, node: &Node) {
        let target = match Evaluator::new(&self.symbols).number(node) {
            Ok(target) => target,
            Err(err) => return self.error("asm::eval", err.span(), err.to_string()),
        };
        if target < self.address as i64 || target >= ADDRESS_SPACE as i64 {
            let msg = format!(
                "Cannot move origin to 0x{:x}, current address is 0x{:03x}",
                target, self.address
            );
            self.messages.push(
                Message::error("asm::origin", node.span, msg)
                    .with_help(".origin can only move forward and must stay below 0x10000"),
            );
            return;
        }
        self.pad(target as u32 - self.address, node.span);
    }

    fn reserve_count(&mut self, node: &Node) -> Option<u32> {
        match Evaluator::new(&self.symbols).number(node) {
            Ok(count) if (0..ADDRESS_SPACE as i64).contains(&count) => Some(count as u32),
            Ok(count) => {
                self.error("asm::reserve", node.span, format!("Cannot reserve {} bytes", count));
                None
            }
            Err(err) => {
                self.error("asm::eval", err.span(), err.to_string());
                None
            }
        }
    }

    /// Move the address forward without emitting.
    fn advance(&mut self, len: u32, span: Span) {
        self.address += len;
        self.check_overflow(span);
    }

    fn pad(&mut self, len: u32, span: Span) {
        let len = len.min(ADDRESS_SPACE);
        self.emit(&vec![0; len as usize], span);
    }

    fn emit(&mut self, bytes: &[u8], span: Span) {
        if !self.overflowed {
            let room = (ADDRESS_SPACE - self.address) as usize;
            self.output.extend_from_slice(&bytes[..bytes.len().min(room)]);
        }
        self.address += bytes.len() as u32;
        self.check_overflow(span);
    }

    fn check_overflow(&mut self, span: Span) {
        if self.address > ADDRESS_SPACE && !self.overflowed {
            self.overflowed = true;
            self.error(
                "asm::overflow",
                span,
                "Program extends past the end of the address space".to_string(),
            );
        }
    }

    fn report_unused_labels(&mut self) {
        let unused: Vec<Message> = self
            .symbols
            .iter()
            .filter(|symbol| symbol.kind == SymbolKind::Label && !symbol.is_used())
            .map(|symbol| {
                Message::info(
                    "asm::unused_label",
                    symbol.span,
                    format!("Label `{}` is never referenced", symbol.name),
                )
            })
            .collect();
        self.messages.extend(unused);
    }

    fn error(&mut self, code: &'static str, span: Span, text: String) {
        self.messages.push(Message::error(code, span, text));
    }
}

/// Mask `value` to `bits` if it lies in `[-2^(bits-1), 2^bits)`.
fn fit(value: i64, bits: u32) -> Option<u16> {
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << bits) - 1;
    (min..=max)
        .contains(&value)
        .then(|| (value & max) as u16)
}
