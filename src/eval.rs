use thiserror::Error;

use crate::ast::{Family, Node, NodeKind, Operator};
use crate::span::Span;
use crate::symbol::{Identifier, Lookup, SymbolTable};

/// Result of evaluating an expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    Number(i64),
    Boolean(bool),
    /// Depends on a symbol without a value yet
    Undefined,
}

impl Value {
    fn family(self) -> Option<Family> {
        match self {
            Value::Number(_) => Some(Family::Number),
            Value::Boolean(_) => Some(Family::Boolean),
            Value::Undefined => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("unknown symbol `{name}`")]
    Unknown { name: Identifier, span: Span },
    #[error("`{name}` has no value at this point")]
    Undefined { name: Identifier, span: Span },
    #[error("operator `{op}` expects {expected} operands")]
    Type {
        op: Operator,
        expected: &'static str,
        span: Span,
    },
    #[error("operator `{op}` takes {expected} operands, found {found}")]
    Arity {
        op: Operator,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("expected a number, found a boolean")]
    NotANumber { span: Span },
    #[error("{what} is not allowed in an expression")]
    NotAValue { what: &'static str, span: Span },
    #[error("division by zero")]
    DivideByZero { span: Span },
    #[error("shift amount {amount} is out of range")]
    ShiftRange { amount: i64, span: Span },
}

impl EvalError {
    pub fn span(&self) -> Span {
        match self {
            EvalError::Unknown { span, .. }
            | EvalError::Undefined { span, .. }
            | EvalError::Type { span, .. }
            | EvalError::Arity { span, .. }
            | EvalError::NotANumber { span }
            | EvalError::NotAValue { span, .. }
            | EvalError::DivideByZero { span }
            | EvalError::ShiftRange { span, .. } => *span,
        }
    }
}

/// Evaluates expression trees against a symbol table.
pub struct Evaluator<'a> {
    symbols: &'a SymbolTable,
}

impl<'a> Evaluator<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Evaluator { symbols }
    }

    /// Demand a concrete number. Symbols without a value are an error.
    pub fn number(&self, node: &Node) -> Result<i64, EvalError> {
        match self.evaluate(node)? {
            Value::Number(n) => Ok(n),
            Value::Boolean(_) => Err(EvalError::NotANumber { span: node.span }),
            Value::Undefined => Err(self.first_undefined(node)),
        }
    }

    /// Like [`Evaluator::number`], but yields `None` for symbols without a value yet.
    pub fn try_number(&self, node: &Node) -> Result<Option<i64>, EvalError> {
        match self.evaluate(node)? {
            Value::Number(n) => Ok(Some(n)),
            Value::Boolean(_) => Err(EvalError::NotANumber { span: node.span }),
            Value::Undefined => Ok(None),
        }
    }

    /// Non-strict evaluation: declared symbols without a value give [`Value::Undefined`].
    pub fn evaluate(&self, node: &Node) -> Result<Value, EvalError> {
        match &node.kind {
            NodeKind::Number(n) => Ok(Value::Number(*n)),
            NodeKind::Identifier(name) => match self.symbols.lookup(name) {
                Lookup::Value(value) => Ok(Value::Number(value)),
                Lookup::Undefined => Ok(Value::Undefined),
                Lookup::Unknown => Err(EvalError::Unknown {
                    name: name.clone(),
                    span: node.span,
                }),
            },
            NodeKind::Register(_) => Err(EvalError::NotAValue {
                what: "a register",
                span: node.span,
            }),
            NodeKind::Keyword(_) => Err(EvalError::NotAValue {
                what: "a keyword",
                span: node.span,
            }),
            NodeKind::Operator { op, operands } => self.operator(*op, operands, node.span),
        }
    }

    fn operator(&self, op: Operator, operands: &[Node], span: Span) -> Result<Value, EvalError> {
        if operands.len() != op.arity() {
            return Err(EvalError::Arity {
                op,
                expected: op.arity(),
                found: operands.len(),
                span,
            });
        }
        let values = operands
            .iter()
            .map(|operand| self.evaluate(operand))
            .collect::<Result<Vec<_>, _>>()?;
        self.check_types(op, &values, span)?;
        if values.contains(&Value::Undefined) {
            return Ok(Value::Undefined);
        }

        use Operator::*;
        use Value::{Boolean as B, Number as N};
        let value = match (op, values.as_slice()) {
            (Neg, [N(a)]) => N(a.wrapping_neg()),
            (Complement, [N(a)]) => N(!a),
            (Not, [B(a)]) => B(!a),
            (LogicalOr, [B(a), B(b)]) => B(*a || *b),
            (LogicalAnd, [B(a), B(b)]) => B(*a && *b),
            (Eq, [a, b]) => B(a == b),
            (Ne, [a, b]) => B(a != b),
            (Lt, [N(a), N(b)]) => B(a < b),
            (Le, [N(a), N(b)]) => B(a <= b),
            (Gt, [N(a), N(b)]) => B(a > b),
            (Ge, [N(a), N(b)]) => B(a >= b),
            (BitOr, [N(a), N(b)]) => N(a | b),
            (BitXor, [N(a), N(b)]) => N(a ^ b),
            (BitAnd, [N(a), N(b)]) => N(a & b),
            (Shl | Shr, [N(a), N(b)]) => {
                if !(0..64).contains(b) {
                    return Err(EvalError::ShiftRange { amount: *b, span });
                }
                if op == Shl {
                    N(a.wrapping_shl(*b as u32))
                } else {
                    N(a.wrapping_shr(*b as u32))
                }
            }
            (Add, [N(a), N(b)]) => N(a.wrapping_add(*b)),
            (Sub, [N(a), N(b)]) => N(a.wrapping_sub(*b)),
            (Mul, [N(a), N(b)]) => N(a.wrapping_mul(*b)),
            (Div | Rem, [N(_), N(0)]) => return Err(EvalError::DivideByZero { span }),
            (Div, [N(a), N(b)]) => N(a.wrapping_div(*b)),
            (Rem, [N(a), N(b)]) => N(a.wrapping_rem(*b)),
            _ => unreachable!("operand types checked before evaluation"),
        };
        Ok(value)
    }

    fn check_types(&self, op: Operator, values: &[Value], span: Span) -> Result<(), EvalError> {
        let families: Vec<Family> = values.iter().filter_map(|v| v.family()).collect();
        let ok = match op.operand_family() {
            Family::Either => families.windows(2).all(|pair| pair[0] == pair[1]),
            expected => families.iter().all(|&family| family == expected),
        };
        if ok {
            return Ok(());
        }
        let expected = match op.operand_family() {
            Family::Number => "numeric",
            Family::Boolean => "boolean",
            Family::Either => "matching",
        };
        Err(EvalError::Type { op, expected, span })
    }

    /// Error naming the first symbol that has no value.
    fn first_undefined(&self, node: &Node) -> EvalError {
        let mut found = None;
        node.visit_identifiers(&mut |name, span| {
            if found.is_none() && self.symbols.lookup(name) == Lookup::Undefined {
                found = Some(EvalError::Undefined {
                    name: name.clone(),
                    span,
                });
            }
        });
        found.unwrap_or(EvalError::NotAValue {
            what: "an undefined value",
            span: node.span,
        })
    }
}
