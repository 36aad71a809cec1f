//! Compile µ-Opal definitions into UEBB stack machine code.
//!
//! For example:
//!
//! DEF fac(n:nat):nat == IF eq(n, 0) THEN 1 ELSE mul(n, fac(sub(n, 1))) FI
//! DEF MAIN:nat == fac(10)
//!
//! compiles to
//!
//! PushInt(10)
//! PushAddress(fac)
//! Call
//! Slide(1)          ; drop the argument, keep the result
//! Halt
//! Label(fac)        ; stack: n, return address
//! PushLocal(1)      ; n
//! JumpIfZero(zero.0)
//! PushLocal(1)
//! PushLocal(0)      ; the copy of n just pushed
//! PushInt(1)
//! Sub
//! PushAddress(fac)
//! Call
//! Slide(1)
//! Mul
//! Jump(fi.0)
//! Label(zero.0)
//! PushInt(1)
//! Label(fi.0)
//! Return
//!
//! Note that `eq(n, 0)` never gets compiled: `JumpIfZero` already tests for
//! zero, so `n` is tested directly and the branches swap places.
//! Linking then replaces every label by the index of the instruction that
//! follows it.

use tracing::{debug, instrument};

use crate::{
    ast::{Definition, Expr, ExprKind, Literal, UserDefinition},
    builtin::BuiltinOp,
    lexer::Span,
    table::{FunctionTable, ENTRY_POINT},
};

pub mod bytecode;
pub mod environment;
mod link;

use bytecode::{Assembly, Instruction, Label, ObjectCode};
use environment::Environment;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("unbound variable `{name}`")]
    UnboundVariable { name: Box<str>, span: Option<Span> },
    #[error("unknown function `{name}`")]
    UnknownFunction { name: Box<str>, span: Option<Span> },
    #[error("`{name}` expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: Box<str>,
        expected: usize,
        found: usize,
        span: Option<Span>,
    },
    #[error("no entry point: expected `{ENTRY_POINT}` without parameters")]
    MissingEntryPoint,
    #[error("internal compiler error: inconsistent stack shape: {detail}")]
    StackShapeInconsistency {
        detail: Box<str>,
        span: Option<Span>,
    },
    #[error("internal compiler error: label `{label}` is referenced but never defined")]
    UnresolvedLabel { label: Box<str> },
    #[error("internal compiler error: label `{label}` is defined more than once")]
    DuplicateLabel { label: Box<str> },
}

impl CompileError {
    /// Internal errors are bugs in the compiler, not in the program.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::StackShapeInconsistency { .. }
                | Self::UnresolvedLabel { .. }
                | Self::DuplicateLabel { .. }
        )
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::UnboundVariable { span, .. }
            | Self::UnknownFunction { span, .. }
            | Self::ArityMismatch { span, .. }
            | Self::StackShapeInconsistency { span, .. } => span.clone(),
            Self::MissingEntryPoint | Self::UnresolvedLabel { .. } | Self::DuplicateLabel { .. } => {
                None
            }
        }
    }

    /// Attaches `at` unless the error already points somewhere.
    fn with_span(mut self, at: &Span) -> Self {
        match &mut self {
            Self::UnboundVariable { span, .. }
            | Self::UnknownFunction { span, .. }
            | Self::ArityMismatch { span, .. }
            | Self::StackShapeInconsistency { span, .. } => {
                span.get_or_insert_with(|| at.clone());
            }
            Self::MissingEntryPoint | Self::UnresolvedLabel { .. } | Self::DuplicateLabel { .. } => {}
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Test `x` directly instead of computing `eq(x, 0)` in conditions
    pub peephole: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { peephole: true }
    }
}

/// Lowers the definitions of one function table. Owns the label interner and
/// the counter that keeps branch labels unique.
pub struct CodeGenerator<'t> {
    table: &'t FunctionTable,
    options: CompileOptions,
    labels: lasso::Rodeo,
    conditionals: usize,
}

impl<'t> CodeGenerator<'t> {
    pub fn new(table: &'t FunctionTable, options: CompileOptions) -> Self {
        Self {
            table,
            options,
            labels: lasso::Rodeo::default(),
            conditionals: 0,
        }
    }

    fn function_label(&mut self, name: &str) -> Label {
        Label(self.labels.get_or_intern(name))
    }

    // function names cannot contain a dot, so these never collide with them
    fn branch_labels(&mut self) -> (Label, Label) {
        let id = self.conditionals;
        self.conditionals += 1;
        (
            Label(self.labels.get_or_intern(format!("zero.{id}"))),
            Label(self.labels.get_or_intern(format!("fi.{id}"))),
        )
    }

    /// Compiles `expr` starting from `env`. The returned environment has
    /// exactly one more slot, holding the value of `expr`.
    pub fn compile(
        &mut self,
        env: Environment<'t>,
        expr: &Expr,
    ) -> Result<Environment<'t>, CompileError> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(env.push_constant(lit.word())),
            ExprKind::Variable(name) => env
                .push_variable(name)
                .map_err(|err| err.with_span(&expr.span)),
            ExprKind::Apply {
                function,
                arguments,
            } => self
                .compile_apply(env, function, arguments)
                .map_err(|err| err.with_span(&expr.span)),
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => self
                .compile_conditional(env, condition, then_branch, else_branch)
                .map_err(|err| err.with_span(&expr.span)),
        }
    }

    fn compile_apply(
        &mut self,
        mut env: Environment<'t>,
        function: &str,
        arguments: &[Expr],
    ) -> Result<Environment<'t>, CompileError> {
        let definition =
            env.table()
                .get(function)
                .ok_or_else(|| CompileError::UnknownFunction {
                    name: Box::from(function),
                    span: None,
                })?;
        if definition.arity() != arguments.len() {
            return Err(CompileError::ArityMismatch {
                name: Box::from(function),
                expected: definition.arity(),
                found: arguments.len(),
                span: None,
            });
        }

        // the first argument ends up deepest, matching the callee's frame
        for argument in arguments {
            env = self.compile(env, argument)?;
        }

        match definition {
            Definition::Builtin(op) => env.emit(Instruction::Operator(*op)),
            Definition::User(_) => {
                let target = self.function_label(function);
                let env = env
                    .emit(Instruction::PushAddress(target))?
                    .emit(Instruction::Call)?;
                if arguments.is_empty() {
                    Ok(env)
                } else {
                    env.emit(Instruction::Slide(arguments.len()))
                }
            }
        }
    }

    fn compile_conditional(
        &mut self,
        env: Environment<'t>,
        condition: &Expr,
        then_branch: &Expr,
        else_branch: &Expr,
    ) -> Result<Environment<'t>, CompileError> {
        let (zero_label, end_label) = self.branch_labels();

        // The jump is taken when the tested value is zero. Booleans are 0 or 1,
        // so for an ordinary condition that is the else branch, while for
        // `eq(x, 0)` it is exactly when the condition holds.
        let (tested, on_zero, otherwise) = match self.zero_test(condition) {
            Some(x) => (x, then_branch, else_branch),
            None => (condition, else_branch, then_branch),
        };

        let env = self
            .compile(env, tested)?
            .emit(Instruction::JumpIfZero(zero_label))?;
        let first = self
            .compile(env.branch(), otherwise)?
            .emit(Instruction::Jump(end_label))?;
        let second = self.compile(env.branch().label(zero_label), on_zero)?;

        if first.depth() != second.depth() {
            return Err(CompileError::StackShapeInconsistency {
                detail: format!(
                    "conditional branches leave {} and {} slots",
                    first.depth(),
                    second.depth()
                )
                .into_boxed_str(),
                span: None,
            });
        }

        Ok(env.join(first, second).label(end_label))
    }

    /// The `x` of a condition shaped `eq(x, 0)` or `eq(0, x)`.
    fn zero_test<'e>(&self, condition: &'e Expr) -> Option<&'e Expr> {
        if !self.options.peephole {
            return None;
        }
        let ExprKind::Apply {
            function,
            arguments,
        } = &condition.kind
        else {
            return None;
        };
        if !matches!(
            self.table.get(function),
            Some(Definition::Builtin(BuiltinOp::Eq))
        ) {
            return None;
        }
        match arguments.as_slice() {
            [x, zero] | [zero, x] if zero.as_literal() == Some(Literal::Nat(0)) => Some(x),
            _ => None,
        }
    }

    fn compile_definition(
        &mut self,
        definition: &UserDefinition,
    ) -> Result<Environment<'t>, CompileError> {
        let label = self.function_label(&definition.name);
        let env = Environment::for_definition(self.table, definition).label(label);
        self.compile(env, &definition.body)?
            .emit(Instruction::Return)
    }

    /// Emits the whole program: `MAIN` first, terminated by `Halt`, then every
    /// other definition behind a label carrying its name.
    #[instrument(skip_all)]
    pub fn assemble(mut self) -> Result<Assembly, CompileError> {
        let table = self.table;
        let main = table
            .entry_point()
            .ok_or(CompileError::MissingEntryPoint)?;
        let mut items = self
            .compile(Environment::new(table), &main.body)?
            .emit(Instruction::Halt)?
            .into_code();
        debug!(definition = ENTRY_POINT, items = items.len(), "compiled");

        for definition in table
            .user_definitions()
            .filter(|def| def.name.as_ref() != ENTRY_POINT)
        {
            let code = self.compile_definition(definition)?.into_code();
            debug!(definition = %definition.name, items = code.len(), "compiled");
            items.extend(code);
        }

        Ok(Assembly {
            items,
            labels: self.labels.into_reader(),
        })
    }
}

/// Compiles every definition of `table` into unlinked assembly.
pub fn assemble(table: &FunctionTable, options: CompileOptions) -> Result<Assembly, CompileError> {
    CodeGenerator::new(table, options).assemble()
}

/// Compiles and links `table` into executable object code.
pub fn compile(table: &FunctionTable, options: CompileOptions) -> Result<ObjectCode, CompileError> {
    assemble(table, options)?.link()
}
