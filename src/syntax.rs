//! Parsing starts where the lexer left off: it builds a full-fidelity [`rowan`]
//! tree, which [`lower`] then turns into the abstract syntax the checker and
//! the compiler work on.
pub mod cst;
mod lower;
mod parser;

pub use lower::lower;
pub use parser::{parse, Parse, SyntaxError};

use crate::ast::UserDefinition;

/// Parses and lowers `source`, failing on any syntax error.
pub fn parse_definitions(source: &str) -> Result<Vec<UserDefinition>, Vec<SyntaxError>> {
    parse(source).ok().map(|module| lower(&module))
}
