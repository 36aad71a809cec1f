//! Built-in functions.
//!
//! Each builtin is a binary operator on naturals that compiles to a single
//! machine instruction. The same [`BuiltinOp::apply`] backs both the machine
//! and the tree-walking evaluator, so the two cannot disagree on arithmetic.
use core::fmt;

use arbitrary::Arbitrary;

use crate::{ast::Type, compiler::bytecode::Word};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Arbitrary)]
pub enum BuiltinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Lt,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("`{op}({a}, {b})` is not a natural number that fits a machine word")]
    OutOfRange { op: BuiltinOp, a: Word, b: Word },
}

impl BuiltinOp {
    pub const ALL: [Self; 6] = [
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Eq,
        Self::Lt,
    ];

    /// The name a program calls this builtin by.
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Eq => "eq",
            Self::Lt => "lt",
        }
    }

    /// The instruction mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
            Self::Div => "Div",
            Self::Eq => "Eq",
            Self::Lt => "Lt",
        }
    }

    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.mnemonic() == mnemonic)
    }

    pub fn arity(self) -> usize {
        2
    }

    pub fn param_types(self) -> [Type; 2] {
        [Type::Nat, Type::Nat]
    }

    pub fn return_type(self) -> Type {
        match self {
            Self::Add | Self::Sub | Self::Mul | Self::Div => Type::Nat,
            Self::Eq | Self::Lt => Type::Bool,
        }
    }

    /// Computes `a op b`.
    pub fn apply(self, a: Word, b: Word) -> Result<Word, ArithmeticError> {
        let out_of_range = ArithmeticError::OutOfRange { op: self, a, b };
        match self {
            Self::Add => a.checked_add(b).ok_or(out_of_range),
            Self::Sub => a.checked_sub(b).ok_or(out_of_range),
            Self::Mul => a.checked_mul(b).ok_or(out_of_range),
            Self::Div => a.checked_div(b).ok_or(ArithmeticError::DivisionByZero),
            Self::Eq => Ok(Word::from(a == b)),
            Self::Lt => Ok(Word::from(a < b)),
        }
    }
}

impl fmt::Display for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
