//! The context checker: name resolution, arity and types.
//!
//! Everything the checker accepts can be compiled without user-facing
//! errors; the code generator still verifies its own invariants.
use std::collections::HashSet;

use tracing::debug;

use crate::{
    ast::{Expr, ExprKind, Param, Type, UserDefinition},
    lexer::Span,
    table::{AlreadyDefined, FunctionTable, ENTRY_POINT},
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("function `{name}` is already defined")]
    AlreadyDefined { name: Box<str>, span: Span },
    #[error("parameter `{name}` is declared twice")]
    DuplicateParameter { name: Box<str>, span: Span },
    #[error("unbound variable `{name}`")]
    UnboundVariable { name: Box<str>, span: Span },
    #[error("unknown function `{name}`")]
    UnknownFunction { name: Box<str>, span: Span },
    #[error("`{name}` expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: Box<str>,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("argument {position} of `{function}` must be `{expected}`, found `{found}`")]
    ArgumentType {
        function: Box<str>,
        position: usize,
        expected: Type,
        found: Type,
        span: Span,
    },
    #[error("`{name}` must return `{expected}`, its body is `{found}`")]
    ReturnType {
        name: Box<str>,
        expected: Type,
        found: Type,
        span: Span,
    },
    #[error("condition must be `bool`, found `{found}`")]
    ConditionType { found: Type, span: Span },
    #[error("branches have different types: `{then_type}` and `{else_type}`")]
    BranchMismatch {
        then_type: Type,
        else_type: Type,
        span: Span,
    },
    #[error("no `{ENTRY_POINT}` definition")]
    MissingEntryPoint,
    #[error("`{ENTRY_POINT}` cannot take parameters")]
    EntryPointParameters { span: Span },
}

impl CheckError {
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::AlreadyDefined { span, .. }
            | Self::DuplicateParameter { span, .. }
            | Self::UnboundVariable { span, .. }
            | Self::UnknownFunction { span, .. }
            | Self::ArityMismatch { span, .. }
            | Self::ArgumentType { span, .. }
            | Self::ReturnType { span, .. }
            | Self::ConditionType { span, .. }
            | Self::BranchMismatch { span, .. }
            | Self::EntryPointParameters { span } => Some(span.clone()),
            Self::MissingEntryPoint => None,
        }
    }
}

/// Checks `definitions` and builds the function table from them. All
/// problems are reported, not only the first.
pub fn check(
    definitions: impl IntoIterator<Item = UserDefinition>,
) -> Result<FunctionTable, Vec<CheckError>> {
    let mut errors = vec![];
    let mut table = FunctionTable::with_builtins();

    for definition in definitions {
        let mut seen = HashSet::new();
        for param in &definition.params {
            if !seen.insert(param.name.clone()) {
                errors.push(CheckError::DuplicateParameter {
                    name: param.name.clone(),
                    span: param.span.clone(),
                });
            }
        }
        if let Err(AlreadyDefined(definition)) = table.define(definition) {
            errors.push(CheckError::AlreadyDefined {
                name: definition.name,
                span: definition.span,
            });
        }
    }

    match table.get(ENTRY_POINT) {
        None => errors.push(CheckError::MissingEntryPoint),
        Some(_) if table.entry_point().is_none() => {
            let span = table
                .user_definitions()
                .find(|def| def.name.as_ref() == ENTRY_POINT)
                .map(|def| def.span.clone())
                .unwrap_or_default();
            errors.push(CheckError::EntryPointParameters { span });
        }
        Some(_) => {}
    }

    let mut checker = Checker {
        table: &table,
        errors: &mut errors,
    };
    for definition in table.user_definitions() {
        let found = checker.infer(&definition.body, &definition.params);
        if let Some(found) = found.filter(|found| *found != definition.return_type) {
            checker.errors.push(CheckError::ReturnType {
                name: definition.name.clone(),
                expected: definition.return_type,
                found,
                span: definition.body.span.clone(),
            });
        }
    }

    if errors.is_empty() {
        debug!(definitions = table.user_definitions().count(), "checked");
        Ok(table)
    } else {
        Err(errors)
    }
}

struct Checker<'a> {
    table: &'a FunctionTable,
    errors: &'a mut Vec<CheckError>,
}

impl Checker<'_> {
    /// The type of `expr`, or `None` if it has an error that was reported.
    fn infer(&mut self, expr: &Expr, params: &[Param]) -> Option<Type> {
        match &expr.kind {
            ExprKind::Literal(lit) => Some(lit.ty()),
            ExprKind::Variable(name) => {
                let param = params.iter().rev().find(|param| param.name == *name);
                if param.is_none() {
                    self.errors.push(CheckError::UnboundVariable {
                        name: name.clone(),
                        span: expr.span.clone(),
                    });
                }
                param.map(|param| param.ty)
            }
            ExprKind::Apply {
                function,
                arguments,
            } => {
                let found: Vec<_> = arguments
                    .iter()
                    .map(|arg| self.infer(arg, params))
                    .collect();
                let Some(definition) = self.table.get(function) else {
                    self.errors.push(CheckError::UnknownFunction {
                        name: function.clone(),
                        span: expr.span.clone(),
                    });
                    return None;
                };
                if definition.arity() != arguments.len() {
                    self.errors.push(CheckError::ArityMismatch {
                        name: function.clone(),
                        expected: definition.arity(),
                        found: arguments.len(),
                        span: expr.span.clone(),
                    });
                    return Some(definition.return_type());
                }
                for (position, ((arg, found), expected)) in arguments
                    .iter()
                    .zip(found)
                    .zip(definition.param_types())
                    .enumerate()
                {
                    if let Some(found) = found.filter(|found| *found != expected) {
                        self.errors.push(CheckError::ArgumentType {
                            function: function.clone(),
                            position: position + 1,
                            expected,
                            found,
                            span: arg.span.clone(),
                        });
                    }
                }
                Some(definition.return_type())
            }
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                if let Some(found) = self.infer(condition, params) {
                    if found != Type::Bool {
                        self.errors.push(CheckError::ConditionType {
                            found,
                            span: condition.span.clone(),
                        });
                    }
                }
                match (
                    self.infer(then_branch, params),
                    self.infer(else_branch, params),
                ) {
                    (Some(then_type), Some(else_type)) if then_type != else_type => {
                        self.errors.push(CheckError::BranchMismatch {
                            then_type,
                            else_type,
                            span: expr.span.clone(),
                        });
                        None
                    }
                    (Some(ty), _) | (None, Some(ty)) => Some(ty),
                    (None, None) => None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{check as check_program, CheckError};
    use crate::{
        ast::{Expr, Param, Type, UserDefinition},
        syntax::parse_definitions,
    };

    fn errors(source: &str) -> Vec<CheckError> {
        let definitions = parse_definitions(source).unwrap();
        check_program(definitions).err().unwrap_or_default()
    }

    #[test]
    fn well_typed_program() {
        let source = "
            DEF fac(n:nat):nat == IF eq(n, 0) THEN 1 ELSE mul(n, fac(sub(n, 1))) FI
            DEF even(n:nat):bool == IF eq(n, 0) THEN true ELSE IF eq(n, 1) THEN false ELSE even(sub(n, 2)) FI FI
            DEF MAIN:bool == even(fac(5))
        ";
        let_assert!(Ok(table) = check_program(parse_definitions(source).unwrap()));
        check!(table.entry_point().is_some());
        check!(table.user_definitions().count() == 3);
    }

    #[test]
    fn duplicates() {
        let source = "DEF f(a:nat, a:nat):nat == a\nDEF f:nat == 1\nDEF add:nat == 2\nDEF MAIN:nat == 0";
        let errors = errors(source);
        check!(errors.len() == 3);
        let_assert!(CheckError::DuplicateParameter { name, span } = &errors[0]);
        check!(name.as_ref() == "a");
        check!(&source[span.clone()] == "a:nat");
        let_assert!(CheckError::AlreadyDefined { name, span } = &errors[1]);
        check!(name.as_ref() == "f");
        check!(*span == (33..34));
        let_assert!(CheckError::AlreadyDefined { name, .. } = &errors[2]);
        check!(name.as_ref() == "add");
    }

    #[test]
    fn names() {
        let source = "DEF MAIN:nat == add(x, g(1))";
        let errors = errors(source);
        let_assert!([CheckError::UnboundVariable { name, span }, CheckError::UnknownFunction { name: function, .. }] = errors.as_slice());
        check!(name.as_ref() == "x");
        check!(&source[span.clone()] == "x");
        check!(function.as_ref() == "g");
    }

    #[test]
    fn arity() {
        let errors = errors("DEF MAIN:nat == add(1)");
        check!(
            errors
                == [CheckError::ArityMismatch {
                    name: Box::from("add"),
                    expected: 2,
                    found: 1,
                    span: 16..22
                }]
        );
    }

    #[test]
    fn types() {
        let source = "DEF MAIN:nat == IF 1 THEN lt(true, 2) ELSE 3 FI";
        let errors = errors(source);
        let_assert!(
            [CheckError::ConditionType { found: Type::Nat, .. }, CheckError::ArgumentType {
                function,
                position: 1,
                expected: Type::Nat,
                found: Type::Bool,
                ..
            }, CheckError::BranchMismatch {
                then_type: Type::Bool,
                else_type: Type::Nat,
                ..
            }] = errors.as_slice()
        );
        check!(function.as_ref() == "lt");

        let errors = self::errors("DEF MAIN:bool == add(1, 2)");
        let_assert!([CheckError::ReturnType { name, expected: Type::Bool, found: Type::Nat, .. }] = errors.as_slice());
        check!(name.as_ref() == "MAIN");
    }

    #[test]
    fn entry_point() {
        check!(errors("DEF f:nat == 1") == [CheckError::MissingEntryPoint]);
        let errors = errors("DEF MAIN(x:nat):nat == x");
        let_assert!([CheckError::EntryPointParameters { span }] = errors.as_slice());
        check!(*span == (4..8));
    }

    #[test]
    fn hand_built_definitions() {
        let pick = UserDefinition::new(
            "pick",
            [Param::new("x", Type::Bool), Param::new("y", Type::Nat)],
            Type::Nat,
            Expr::conditional(Expr::var("x"), Expr::var("y"), Expr::nat(0)),
        );
        let main = UserDefinition::new(
            "MAIN",
            [],
            Type::Nat,
            Expr::apply("pick", [Expr::boolean(true), Expr::nat(7)]),
        );
        let_assert!(Ok(table) = check_program([pick, main]));
        let names: Vec<_> = table.user_definitions().map(|def| def.name.as_ref()).collect();
        check!(names == ["pick", "MAIN"]);
    }
}
