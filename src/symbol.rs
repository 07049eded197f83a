use std::fmt;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use thiserror::Error;

use crate::span::Span;

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Name matching `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(name: &str) -> Option<Identifier> {
        let mut chars = name.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        valid.then(|| Identifier(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolKind {
    Label,
    Constant,
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: Identifier,
    pub kind: SymbolKind,
    /// Where the symbol is declared
    pub span: Span,
    value: Option<i64>,
    used: bool,
}

impl Symbol {
    pub fn value(&self) -> Option<i64> {
        self.value
    }

    pub fn is_used(&self) -> bool {
        self.used
    }
}

/// Result of a lookup. Declared and undefined is not the same as unknown.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Lookup {
    Unknown,
    Undefined,
    Value(i64),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SymbolError {
    #[error("`{name}` is already declared")]
    Duplicate { name: Identifier, previous: Span },
    #[error("`{0}` is already defined")]
    Redefined(Identifier),
    #[error("`{0}` was never declared")]
    Undeclared(Identifier),
}

/// Symbols in declaration order.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: FxMap<Identifier, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a name known without giving it a value yet.
    pub fn declare(
        &mut self,
        name: Identifier,
        kind: SymbolKind,
        span: Span,
    ) -> Result<(), SymbolError> {
        if let Some(existing) = self.symbols.get(&name) {
            return Err(SymbolError::Duplicate {
                name,
                previous: existing.span,
            });
        }
        self.symbols.insert(
            name.clone(),
            Symbol {
                name,
                kind,
                span,
                value: None,
                used: false,
            },
        );
        Ok(())
    }

    /// Give a declared symbol its value. Symbols are write-once.
    pub fn define(&mut self, name: &Identifier, value: i64) -> Result<(), SymbolError> {
        let symbol = self
            .symbols
            .get_mut(name)
            .ok_or_else(|| SymbolError::Undeclared(name.clone()))?;
        if symbol.value.is_some() {
            return Err(SymbolError::Redefined(name.clone()));
        }
        symbol.value = Some(value);
        Ok(())
    }

    pub fn lookup(&self, name: &Identifier) -> Lookup {
        match self.symbols.get(name) {
            None => Lookup::Unknown,
            Some(Symbol { value: None, .. }) => Lookup::Undefined,
            Some(Symbol {
                value: Some(value), ..
            }) => Lookup::Value(*value),
        }
    }

    pub fn get(&self, name: &Identifier) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn mark_used(&mut self, name: &Identifier) {
        if let Some(symbol) = self.symbols.get_mut(name) {
            symbol.used = true;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
