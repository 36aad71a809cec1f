//! A tree-walking evaluator over the AST.
//!
//! It shares value encoding and builtin semantics with the machine but none
//! of its code generation, which makes it a reference to hold compiled
//! programs against.

use tracing::{debug, instrument};

use crate::{
    ast::{Definition, Expr, ExprKind, UserDefinition},
    builtin::ArithmeticError,
    compiler::bytecode::Word,
    table::FunctionTable,
};

use super::fuel::Fuel;

/// Nested user calls allowed before evaluation gives up.
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Upper bound on [`EvalConfig::max_depth`]; larger settings are clamped.
///
/// Every nested call recurses on the native stack. At this depth that takes
/// more than the main thread's stack, so callers going beyond the default
/// should evaluate on a thread with a larger stack.
pub const MAX_DEPTH_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    /// Expressions evaluated before giving up
    pub fuel: u64,
    /// Clamped to [`MAX_DEPTH_LIMIT`]
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            fuel: super::machine::DEFAULT_BUDGET,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("no entry point")]
    MissingEntryPoint,
    #[error("unbound variable `{0}`")]
    UnboundVariable(Box<str>),
    #[error("unknown function `{0}`")]
    UnknownFunction(Box<str>),
    #[error("`{name}` expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: Box<str>,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
    #[error("ran out of fuel after {0} evaluation steps")]
    OutOfFuel(u64),
    #[error("call depth exceeded {0}")]
    RecursionLimit(usize),
}

impl EvalError {
    /// Whether evaluation was cut short rather than failing outright.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::OutOfFuel(_) | Self::RecursionLimit(_))
    }
}

type Frame<'a> = [(&'a str, Word)];

pub struct Treewalk<'t> {
    table: &'t FunctionTable,
    fuel: Fuel,
    max_depth: usize,
    depth: usize,
}

impl<'t> Treewalk<'t> {
    pub fn new(table: &'t FunctionTable, config: EvalConfig) -> Self {
        Self {
            table,
            fuel: Fuel::with(config.fuel),
            max_depth: config.max_depth.min(MAX_DEPTH_LIMIT),
            depth: 0,
        }
    }

    /// Evaluation steps taken so far.
    pub fn steps(&self) -> u64 {
        self.fuel.spent()
    }

    /// Evaluates the body of `MAIN`.
    #[instrument(skip_all)]
    pub fn run(&mut self) -> Result<Word, EvalError> {
        let main = self
            .table
            .entry_point()
            .ok_or(EvalError::MissingEntryPoint)?;
        let result = self.eval(&main.body, &[])?;
        debug!(result, steps = self.steps(), "evaluated");
        Ok(result)
    }

    pub fn eval(&mut self, expr: &Expr, frame: &Frame) -> Result<Word, EvalError> {
        if !self.fuel.should_continue() {
            return Err(EvalError::OutOfFuel(self.fuel.spent()));
        }
        self.fuel.consume(1);

        match &expr.kind {
            ExprKind::Literal(lit) => Ok(lit.word()),
            ExprKind::Variable(name) => frame
                .iter()
                .rev()
                .find(|(bound, _)| *bound == name.as_ref())
                .map(|(_, value)| *value)
                .ok_or_else(|| EvalError::UnboundVariable(name.clone())),
            ExprKind::Apply {
                function,
                arguments,
            } => {
                let definition = self
                    .table
                    .get(function)
                    .ok_or_else(|| EvalError::UnknownFunction(function.clone()))?;
                if definition.arity() != arguments.len() {
                    return Err(EvalError::ArityMismatch {
                        name: function.clone(),
                        expected: definition.arity(),
                        found: arguments.len(),
                    });
                }
                let args = arguments
                    .iter()
                    .map(|arg| self.eval(arg, frame))
                    .collect::<Result<Vec<_>, _>>()?;
                match definition {
                    Definition::Builtin(op) => Ok(op.apply(args[0], args[1])?),
                    Definition::User(def) => self.call(def, &args),
                }
            }
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition, frame)? != 0 {
                    self.eval(then_branch, frame)
                } else {
                    self.eval(else_branch, frame)
                }
            }
        }
    }

    fn call(&mut self, definition: &UserDefinition, args: &[Word]) -> Result<Word, EvalError> {
        if self.depth >= self.max_depth {
            return Err(EvalError::RecursionLimit(self.max_depth));
        }
        let frame: Vec<_> = definition
            .params
            .iter()
            .map(|param| param.name.as_ref())
            .zip(args.iter().copied())
            .collect();
        self.depth += 1;
        let result = self.eval(&definition.body, &frame);
        self.depth -= 1;
        result
    }
}

/// Evaluates the program in `table` from `MAIN`.
pub fn evaluate(table: &FunctionTable, config: EvalConfig) -> Result<Word, EvalError> {
    Treewalk::new(table, config).run()
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{evaluate, EvalConfig, EvalError, Treewalk, MAX_DEPTH_LIMIT};
    use crate::{
        ast::{Expr, Param, Type, UserDefinition},
        builtin::ArithmeticError,
        table::FunctionTable,
    };

    fn program(definitions: impl IntoIterator<Item = UserDefinition>) -> FunctionTable {
        let mut table = FunctionTable::with_builtins();
        for def in definitions {
            table.define(def).unwrap();
        }
        table
    }

    fn main(body: Expr) -> UserDefinition {
        UserDefinition::new("MAIN", [], Type::Nat, body)
    }

    fn sum() -> UserDefinition {
        UserDefinition::new(
            "sum",
            [Param::new("n", Type::Nat)],
            Type::Nat,
            Expr::conditional(
                Expr::apply("eq", [Expr::var("n"), Expr::nat(0)]),
                Expr::nat(0),
                Expr::apply(
                    "add",
                    [
                        Expr::var("n"),
                        Expr::apply("sum", [Expr::apply("sub", [Expr::var("n"), Expr::nat(1)])]),
                    ],
                ),
            ),
        )
    }

    #[test]
    fn recursion() {
        let table = program([sum(), main(Expr::apply("sum", [Expr::nat(10)]))]);
        check!(evaluate(&table, EvalConfig::default()) == Ok(55));
    }

    #[test]
    fn argument_order() {
        let minus = UserDefinition::new(
            "minus",
            [Param::new("a", Type::Nat), Param::new("b", Type::Nat)],
            Type::Nat,
            Expr::apply("sub", [Expr::var("a"), Expr::var("b")]),
        );
        let table = program([minus, main(Expr::apply("minus", [Expr::nat(10), Expr::nat(3)]))]);
        check!(evaluate(&table, EvalConfig::default()) == Ok(7));
    }

    #[test]
    fn booleans_are_words() {
        let table = program([main(Expr::conditional(
            Expr::apply("lt", [Expr::nat(1), Expr::nat(2)]),
            Expr::boolean(true),
            Expr::boolean(false),
        ))]);
        check!(evaluate(&table, EvalConfig::default()) == Ok(1));
    }

    #[test]
    fn failures() {
        let table = program([main(Expr::apply("div", [Expr::nat(9), Expr::nat(0)]))]);
        check!(
            evaluate(&table, EvalConfig::default())
                == Err(EvalError::Arithmetic(ArithmeticError::DivisionByZero))
        );

        let table = program([UserDefinition::new("f", [], Type::Nat, Expr::nat(1))]);
        check!(evaluate(&table, EvalConfig::default()) == Err(EvalError::MissingEntryPoint));

        let table = program([main(Expr::var("x"))]);
        check!(evaluate(&table, EvalConfig::default()) == Err(EvalError::UnboundVariable(Box::from("x"))));
    }

    #[test]
    fn runaway_recursion_is_cut_short() {
        let endless = UserDefinition::new(
            "loop",
            [Param::new("n", Type::Nat)],
            Type::Nat,
            Expr::apply("loop", [Expr::var("n")]),
        );
        let table = program([endless, main(Expr::apply("loop", [Expr::nat(1)]))]);

        let_assert!(Err(err) = evaluate(&table, EvalConfig::default()));
        check!(err == EvalError::RecursionLimit(super::DEFAULT_MAX_DEPTH));
        check!(err.is_exhaustion());

        let config = EvalConfig {
            fuel: 100,
            ..EvalConfig::default()
        };
        let mut walker = Treewalk::new(&table, config);
        check!(walker.run() == Err(EvalError::OutOfFuel(100)));
        check!(walker.steps() == 100);
    }

    #[test]
    fn max_depth_is_clamped() {
        let endless = UserDefinition::new(
            "loop",
            [Param::new("n", Type::Nat)],
            Type::Nat,
            Expr::apply("loop", [Expr::var("n")]),
        );
        let looping = program([endless, main(Expr::apply("loop", [Expr::nat(1)]))]);
        let deep = program([sum(), main(Expr::apply("sum", [Expr::nat(1000)]))]);
        let config = EvalConfig {
            fuel: u64::MAX,
            max_depth: usize::MAX,
        };

        // recursing to the limit needs more than a test thread's stack
        let (looped, summed) = std::thread::Builder::new()
            .stack_size(256 << 20)
            .spawn(move || (evaluate(&looping, config), evaluate(&deep, config)))
            .unwrap()
            .join()
            .unwrap();
        check!(looped == Err(EvalError::RecursionLimit(MAX_DEPTH_LIMIT)));
        check!(summed == Ok(500_500));
    }
}
