pub mod ast;
pub mod builtin;
pub mod check;
pub mod compiler;
pub mod lexer;
pub mod runtime;
pub mod syntax;
pub mod table;

pub use builtin::{ArithmeticError, BuiltinOp};
pub use check::{check, CheckError};
pub use compiler::{
    bytecode::{Address, Assembly, Instruction, ObjectCode, Word},
    compile, CompileError, CompileOptions,
};
pub use lexer::Span;
pub use runtime::{
    evaluate, execute, EvalConfig, EvalError, Fuel, MachineConfig, VmError, DEFAULT_BUDGET,
};
pub use syntax::SyntaxError;
pub use table::FunctionTable;

/// Why a source text did not make it to a function table.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("{} syntax error(s)", .0.len())]
    Syntax(Vec<SyntaxError>),
    #[error("{} error(s) in definitions", .0.len())]
    Check(Vec<CheckError>),
}

impl LoadError {
    /// Every underlying error with the source range it points at.
    pub fn diagnostics(&self) -> Vec<(String, Option<Span>)> {
        match self {
            Self::Syntax(errors) => errors
                .iter()
                .map(|err| (err.to_string(), Some(err.span())))
                .collect(),
            Self::Check(errors) => errors
                .iter()
                .map(|err| (err.to_string(), err.span()))
                .collect(),
        }
    }
}

/// Parses and checks a µ-Opal program.
pub fn load(source: &str) -> Result<FunctionTable, LoadError> {
    let definitions = syntax::parse_definitions(source).map_err(LoadError::Syntax)?;
    check(definitions).map_err(LoadError::Check)
}
