use std::fmt;

use crate::ast::{Keyword, Node, NodeKind};

/// Shape of one instruction operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    /// Any of `V0` to `VF`
    Reg,
    /// Only `V0`
    V0,
    Word(Keyword),
    /// 4-bit immediate
    Nibble,
    /// 8-bit immediate
    Byte,
    /// 12-bit immediate
    Addr,
}

impl Operand {
    pub fn accepts(self, node: &Node) -> bool {
        match (self, &node.kind) {
            (Operand::Reg, NodeKind::Register(_)) => true,
            (Operand::V0, NodeKind::Register(0)) => true,
            (Operand::Word(expected), NodeKind::Keyword(keyword)) => expected == *keyword,
            (Operand::Nibble | Operand::Byte | Operand::Addr, _) => node.is_expression(),
            _ => false,
        }
    }

    /// Width of an immediate operand.
    pub fn bits(self) -> Option<u32> {
        match self {
            Operand::Nibble => Some(4),
            Operand::Byte => Some(8),
            Operand::Addr => Some(12),
            Operand::Reg | Operand::V0 | Operand::Word(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg => write!(f, "Vx"),
            Operand::V0 => write!(f, "V0"),
            Operand::Word(keyword) => write!(f, "{}", keyword),
            Operand::Nibble => write!(f, "nibble"),
            Operand::Byte => write!(f, "byte"),
            Operand::Addr => write!(f, "addr"),
        }
    }
}

/// Assembler view of one machine instruction form.
pub struct Opcode {
    pub mnemonic: &'static str,
    pub signature: &'static [Operand],
    /// Takes operand values in signature order. Registers are passed as their index, keywords as
    /// zero, immediates already masked to width.
    encode: fn(&[u16]) -> u16,
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for (i, operand) in self.signature.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, operand)?;
        }
        Ok(())
    }
}

impl Opcode {
    pub fn encode(&self, values: &[u16]) -> u16 {
        debug_assert_eq!(values.len(), self.signature.len());
        (self.encode)(values)
    }

    pub fn matches(&self, operands: &[Node]) -> bool {
        self.signature.len() == operands.len()
            && self
                .signature
                .iter()
                .zip(operands)
                .all(|(kind, node)| kind.accepts(node))
    }
}

/// Whether any opcode carries this mnemonic, ignoring case.
pub fn is_mnemonic(word: &str) -> bool {
    OPCODES
        .iter()
        .any(|op| op.mnemonic.eq_ignore_ascii_case(word))
}

/// Every opcode form named `mnemonic` whose signature accepts `operands`.
pub fn matching<'a>(
    mnemonic: &'a str,
    operands: &'a [Node],
) -> impl Iterator<Item = &'static Opcode> + 'a {
    OPCODES
        .iter()
        .filter(move |op| op.mnemonic.eq_ignore_ascii_case(mnemonic) && op.matches(operands))
}

fn x(v: u16) -> u16 {
    (v & 0xF) << 8
}

fn y(v: u16) -> u16 {
    (v & 0xF) << 4
}

use Keyword::*;
use Operand::*;

const REG_REG: &[Operand] = &[Reg, Reg];
const REG_BYTE: &[Operand] = &[Reg, Byte];

pub static OPCODES: &[Opcode] = &[
    Opcode { mnemonic: "CLS", signature: &[], encode: |_| 0x00E0 },
    Opcode { mnemonic: "RET", signature: &[], encode: |_| 0x00EE },
    Opcode { mnemonic: "JP", signature: &[Addr], encode: |o| 0x1000 | o[0] },
    Opcode { mnemonic: "JP", signature: &[V0, Addr], encode: |o| 0xB000 | o[1] },
    Opcode { mnemonic: "CALL", signature: &[Addr], encode: |o| 0x2000 | o[0] },
    Opcode { mnemonic: "SE", signature: REG_BYTE, encode: |o| 0x3000 | x(o[0]) | o[1] },
    Opcode { mnemonic: "SE", signature: REG_REG, encode: |o| 0x5000 | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "SNE", signature: REG_BYTE, encode: |o| 0x4000 | x(o[0]) | o[1] },
    Opcode { mnemonic: "SNE", signature: REG_REG, encode: |o| 0x9000 | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "LD", signature: REG_BYTE, encode: |o| 0x6000 | x(o[0]) | o[1] },
    Opcode { mnemonic: "LD", signature: REG_REG, encode: |o| 0x8000 | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "LD", signature: &[Word(Index), Addr], encode: |o| 0xA000 | o[1] },
    Opcode { mnemonic: "LD", signature: &[Reg, Word(Delay)], encode: |o| 0xF007 | x(o[0]) },
    Opcode { mnemonic: "LD", signature: &[Reg, Word(Key)], encode: |o| 0xF00A | x(o[0]) },
    Opcode { mnemonic: "LD", signature: &[Word(Delay), Reg], encode: |o| 0xF015 | x(o[1]) },
    Opcode { mnemonic: "LD", signature: &[Word(Sound), Reg], encode: |o| 0xF018 | x(o[1]) },
    Opcode { mnemonic: "LD", signature: &[Word(Glyph), Reg], encode: |o| 0xF029 | x(o[1]) },
    Opcode { mnemonic: "LD", signature: &[Word(Bcd), Reg], encode: |o| 0xF033 | x(o[1]) },
    Opcode { mnemonic: "LD", signature: &[Word(IndexMemory), Reg], encode: |o| 0xF055 | x(o[1]) },
    Opcode { mnemonic: "LD", signature: &[Reg, Word(IndexMemory)], encode: |o| 0xF065 | x(o[0]) },
    Opcode { mnemonic: "ADD", signature: REG_BYTE, encode: |o| 0x7000 | x(o[0]) | o[1] },
    Opcode { mnemonic: "ADD", signature: REG_REG, encode: |o| 0x8004 | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "ADD", signature: &[Word(Index), Reg], encode: |o| 0xF01E | x(o[1]) },
    Opcode { mnemonic: "OR", signature: REG_REG, encode: |o| 0x8001 | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "AND", signature: REG_REG, encode: |o| 0x8002 | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "XOR", signature: REG_REG, encode: |o| 0x8003 | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "SUB", signature: REG_REG, encode: |o| 0x8005 | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "SHR", signature: REG_REG, encode: |o| 0x8006 | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "SHR", signature: &[Reg], encode: |o| 0x8006 | x(o[0]) | y(o[0]) },
    Opcode { mnemonic: "SUBN", signature: REG_REG, encode: |o| 0x8007 | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "SHL", signature: REG_REG, encode: |o| 0x800E | x(o[0]) | y(o[1]) },
    Opcode { mnemonic: "SHL", signature: &[Reg], encode: |o| 0x800E | x(o[0]) | y(o[0]) },
    Opcode { mnemonic: "RND", signature: REG_BYTE, encode: |o| 0xC000 | x(o[0]) | o[1] },
    Opcode { mnemonic: "DRW", signature: &[Reg, Reg, Nibble], encode: |o| 0xD000 | x(o[0]) | y(o[1]) | o[2] },
    Opcode { mnemonic: "SKP", signature: &[Reg], encode: |o| 0xE09E | x(o[0]) },
    Opcode { mnemonic: "SKNP", signature: &[Reg], encode: |o| 0xE0A1 | x(o[0]) },
];
