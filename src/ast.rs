//! The abstract syntax of µ-Opal, as produced by lowering the syntax tree.
//!
//! Nodes are immutable once built. Every node remembers the byte range it was
//! lowered from so later stages can point diagnostics back at the source.
use core::fmt;

use arbitrary::Arbitrary;

use crate::{builtin::BuiltinOp, compiler::bytecode::Word, lexer::Span};

/// The two value types of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Arbitrary)]
pub enum Type {
    Nat,
    Bool,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nat => write!(f, "nat"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Literal {
    Nat(Word),
    Bool(bool),
}

impl Literal {
    pub fn ty(self) -> Type {
        match self {
            Self::Nat(_) => Type::Nat,
            Self::Bool(_) => Type::Bool,
        }
    }

    /// The machine word this literal is represented by; booleans are 0 or 1.
    pub fn word(self) -> Word {
        match self {
            Self::Nat(n) => n,
            Self::Bool(b) => Word::from(b),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nat(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Variable(Box<str>),
    Apply {
        function: Box<str>,
        arguments: Vec<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
}

// Span-less constructors, mostly for building programs by hand
impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn nat(value: Word) -> Self {
        Self::new(ExprKind::Literal(Literal::Nat(value)), 0..0)
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ExprKind::Literal(Literal::Bool(value)), 0..0)
    }

    pub fn var(name: impl AsRef<str>) -> Self {
        Self::new(ExprKind::Variable(Box::from(name.as_ref())), 0..0)
    }

    pub fn apply(function: impl AsRef<str>, arguments: impl IntoIterator<Item = Expr>) -> Self {
        Self::new(
            ExprKind::Apply {
                function: Box::from(function.as_ref()),
                arguments: arguments.into_iter().collect(),
            },
            0..0,
        )
    }

    pub fn conditional(condition: Expr, then_branch: Expr, else_branch: Expr) -> Self {
        Self::new(
            ExprKind::Conditional {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            0..0,
        )
    }

    pub fn as_literal(&self) -> Option<Literal> {
        match self.kind {
            ExprKind::Literal(lit) => Some(lit),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(lit) => write!(f, "{lit}"),
            ExprKind::Variable(name) => write!(f, "{name}"),
            ExprKind::Apply {
                function,
                arguments,
            } => {
                write!(f, "{function}(")?;
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "IF {condition} THEN {then_branch} ELSE {else_branch} FI"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Box<str>,
    pub ty: Type,
    pub span: Span,
}

impl Param {
    pub fn new(name: impl AsRef<str>, ty: Type) -> Self {
        Self {
            name: Box::from(name.as_ref()),
            ty,
            span: 0..0,
        }
    }
}

/// A `DEF` from the source program.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDefinition {
    pub name: Box<str>,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub body: Expr,
    /// Covers the name of the definition only
    pub span: Span,
}

impl UserDefinition {
    pub fn new(
        name: impl AsRef<str>,
        params: impl IntoIterator<Item = Param>,
        return_type: Type,
        body: Expr,
    ) -> Self {
        Self {
            name: Box::from(name.as_ref()),
            params: params.into_iter().collect(),
            return_type,
            body,
            span: 0..0,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for UserDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DEF {}", self.name)?;
        if !self.params.is_empty() {
            write!(f, "(")?;
            for (i, param) in self.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}:{}", param.name, param.ty)?;
            }
            write!(f, ")")?;
        }
        write!(f, ":{} == {}", self.return_type, self.body)
    }
}

/// Anything a function name can resolve to.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Builtin(BuiltinOp),
    User(UserDefinition),
}

impl Definition {
    pub fn arity(&self) -> usize {
        match self {
            Self::Builtin(op) => op.arity(),
            Self::User(def) => def.arity(),
        }
    }

    pub fn param_types(&self) -> Vec<Type> {
        match self {
            Self::Builtin(op) => op.param_types().to_vec(),
            Self::User(def) => def.params.iter().map(|p| p.ty).collect(),
        }
    }

    pub fn return_type(&self) -> Type {
        match self {
            Self::Builtin(op) => op.return_type(),
            Self::User(def) => def.return_type,
        }
    }
}
