use std::fmt;

use crate::opcode::Opcode;
use crate::span::Span;
use crate::symbol::Identifier;

/// Operators usable in expressions, lowest precedence first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    LogicalOr,
    LogicalAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitOr,
    BitXor,
    BitAnd,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// Unary minus
    Neg,
    /// Bitwise complement
    Complement,
    /// Logical not
    Not,
}

/// Which kind of value an operator takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    Number,
    Boolean,
    /// Both operands of the same family
    Either,
}

impl Operator {
    /// Binding strength of a binary operator. `None` for prefix operators.
    pub fn precedence(self) -> Option<u8> {
        use Operator::*;
        let prec = match self {
            LogicalOr => 1,
            LogicalAnd => 2,
            Eq | Ne => 3,
            Lt | Le | Gt | Ge => 4,
            BitOr => 5,
            BitXor => 6,
            BitAnd => 7,
            Shl | Shr => 8,
            Add | Sub => 9,
            Mul | Div | Rem => 10,
            Neg | Complement | Not => return None,
        };
        Some(prec)
    }

    pub fn arity(self) -> usize {
        match self {
            Operator::Neg | Operator::Complement | Operator::Not => 1,
            _ => 2,
        }
    }

    pub fn operand_family(self) -> Family {
        use Operator::*;
        match self {
            LogicalOr | LogicalAnd | Not => Family::Boolean,
            Eq | Ne => Family::Either,
            _ => Family::Number,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Operator::*;
        let s = match self {
            LogicalOr => "||",
            LogicalAnd => "&&",
            Eq => "==",
            Ne => "!=",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
            BitOr => "|",
            BitXor => "^",
            BitAnd => "&",
            Shl => "<<",
            Shr => ">>",
            Add => "+",
            Sub | Neg => "-",
            Mul => "*",
            Div => "/",
            Rem => "%",
            Complement => "~",
            Not => "!",
        };
        f.write_str(s)
    }
}

/// Reserved operand words of the instruction set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    /// `I`
    Index,
    /// `[I]`
    IndexMemory,
    /// `DT`
    Delay,
    /// `ST`
    Sound,
    /// `K`
    Key,
    /// `F`
    Glyph,
    /// `B`
    Bcd,
}

impl Keyword {
    /// Case-insensitive lookup of a bare word. `[I]` is assembled by the parser.
    pub fn from_word(word: &str) -> Option<Keyword> {
        let keyword = match word.to_ascii_uppercase().as_str() {
            "I" => Keyword::Index,
            "DT" => Keyword::Delay,
            "ST" => Keyword::Sound,
            "K" => Keyword::Key,
            "F" => Keyword::Glyph,
            "B" => Keyword::Bcd,
            _ => return None,
        };
        Some(keyword)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Keyword::Index => "I",
            Keyword::IndexMemory => "[I]",
            Keyword::Delay => "DT",
            Keyword::Sound => "ST",
            Keyword::Key => "K",
            Keyword::Glyph => "F",
            Keyword::Bcd => "B",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Number(i64),
    Register(u8),
    Keyword(Keyword),
    Identifier(Identifier),
    Operator { op: Operator, operands: Vec<Node> },
}

/// Operand or expression tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

impl Node {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Node { kind, span }
    }

    /// Anything that evaluates to a value, as opposed to registers and keywords.
    pub fn is_expression(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Number(_) | NodeKind::Identifier(_) | NodeKind::Operator { .. }
        )
    }

    /// Call `f` for every identifier referenced in this tree.
    pub fn visit_identifiers(&self, f: &mut impl FnMut(&Identifier, Span)) {
        match &self.kind {
            NodeKind::Identifier(ident) => f(ident, self.span),
            NodeKind::Operator { operands, .. } => {
                for operand in operands {
                    operand.visit_identifiers(f);
                }
            }
            NodeKind::Number(_) | NodeKind::Register(_) | NodeKind::Keyword(_) => (),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Number(n) => write!(f, "{}", n),
            NodeKind::Register(r) => write!(f, "V{:X}", r),
            NodeKind::Keyword(k) => write!(f, "{}", k),
            NodeKind::Identifier(ident) => write!(f, "{}", ident),
            NodeKind::Operator { op, operands } => match operands.as_slice() {
                [operand] => write!(f, "{}{}", op, operand),
                [lhs, rhs] => write!(f, "({} {} {})", lhs, op, rhs),
                _ => write!(f, "{}(..)", op),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label {
    pub name: Identifier,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct InstructionStmt {
    pub opcode: &'static Opcode,
    pub operands: Vec<Node>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    /// `.equ name, value`
    Equ { name: Label, value: Node },
    /// `.origin address`
    Origin(Node),
    /// `.byte value, ...`
    Byte(Vec<Node>),
    /// `.word value, ...`
    Word(Vec<Node>),
    /// `.reserve count`
    Reserve(Node),
}

#[derive(Clone, Debug)]
pub enum Body {
    Instruction(InstructionStmt),
    Directive(Directive),
}

/// One source line: `[label:] [body] [; comment]`.
#[derive(Clone, Debug)]
pub struct Statement {
    pub label: Option<Label>,
    pub body: Option<Body>,
    pub comment: Option<Span>,
    pub span: Span,
}

impl Statement {
    /// Every operand and expression tree of this statement.
    pub fn nodes(&self) -> Vec<&Node> {
        match &self.body {
            None => Vec::new(),
            Some(Body::Instruction(instr)) => instr.operands.iter().collect(),
            Some(Body::Directive(directive)) => match directive {
                Directive::Equ { value, .. } => vec![value],
                Directive::Origin(node) | Directive::Reserve(node) => vec![node],
                Directive::Byte(nodes) | Directive::Word(nodes) => nodes.iter().collect(),
            },
        }
    }
}
