use crate::{
    ast::UserDefinition,
    compiler::{
        bytecode::{Asm, Instruction, Label, Word},
        CompileError,
    },
    table::FunctionTable,
};

/// What occupies one runtime stack slot at some point of the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// A parameter, or a copy of one
    Bound(Box<str>),
    /// The value of some subexpression
    Intermediate,
    /// A code address: a callee about to be called, or a caller's return address
    Address,
}

/// Environments describe compilation at one program point: the shape the
/// operand stack will have when execution gets here, and the instructions
/// emitted so far.
///
/// The stack shape is what turns a variable reference into a fixed offset, so
/// it must match the runtime stack on every path reaching this point.
/// Operations consume the environment and hand back the next one; compiling
/// two alternatives from the same point goes through an explicit
/// [`Self::branch`].
#[derive(Debug, Clone)]
pub struct Environment<'t> {
    table: &'t FunctionTable,
    stack: Vec<Slot>,
    code: Vec<Asm>,
}

impl<'t> Environment<'t> {
    /// The empty environment `MAIN` starts in.
    pub fn new(table: &'t FunctionTable) -> Self {
        Self {
            table,
            stack: vec![],
            code: vec![],
        }
    }

    /// The environment at the entry of a function: the arguments in
    /// declaration order with the return address on top.
    pub fn for_definition(table: &'t FunctionTable, definition: &UserDefinition) -> Self {
        Self {
            table,
            stack: definition
                .params
                .iter()
                .map(|p| Slot::Bound(p.name.clone()))
                .chain([Slot::Address])
                .collect(),
            code: vec![],
        }
    }

    pub fn table(&self) -> &'t FunctionTable {
        self.table
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn stack(&self) -> &[Slot] {
        &self.stack
    }

    pub fn code(&self) -> &[Asm] {
        &self.code
    }

    pub fn into_code(self) -> Vec<Asm> {
        self.code
    }

    /// Same stack shape, empty instruction buffer.
    pub fn branch(&self) -> Self {
        Self {
            table: self.table,
            stack: self.stack.clone(),
            code: vec![],
        }
    }

    pub fn push_constant(self, value: Word) -> Self {
        self.emit(Instruction::PushInt(value))
            .unwrap_or_else(|_| unreachable!("pushing a constant cannot underflow"))
    }

    /// Pushes a copy of the innermost binding of `name`.
    pub fn push_variable(self, name: &str) -> Result<Self, CompileError> {
        let index = self
            .stack
            .iter()
            .rposition(|slot| matches!(slot, Slot::Bound(bound) if bound.as_ref() == name))
            .ok_or_else(|| CompileError::UnboundVariable {
                name: Box::from(name),
                span: None,
            })?;
        let offset = self.depth() - 1 - index;
        self.emit(Instruction::PushLocal(offset))
    }

    /// Appends an instruction and applies its effect to the stack shape.
    pub fn emit(mut self, instruction: Instruction<Label>) -> Result<Self, CompileError> {
        match instruction {
            Instruction::PushInt(_) => self.stack.push(Slot::Intermediate),
            Instruction::PushLocal(offset) => {
                self.require(&instruction, offset + 1)?;
                let slot = self.stack[self.depth() - 1 - offset].clone();
                self.stack.push(slot);
            }
            Instruction::PushAddress(_) => self.stack.push(Slot::Address),
            Instruction::Call => {
                self.require(&instruction, 1)?;
                self.stack.pop();
                self.stack.push(Slot::Intermediate);
            }
            Instruction::Return => {
                self.require(&instruction, 2)?;
                let value = self.stack.pop();
                self.stack.pop();
                self.stack.extend(value);
            }
            Instruction::Jump(_) | Instruction::Halt => {}
            Instruction::JumpIfZero(_) => {
                self.require(&instruction, 1)?;
                self.stack.pop();
            }
            Instruction::Slide(count) => {
                self.require(&instruction, count + 1)?;
                let top = self.stack.pop();
                self.stack.truncate(self.depth() - count);
                self.stack.extend(top);
            }
            Instruction::Operator(_) => {
                self.require(&instruction, 2)?;
                self.stack.truncate(self.depth() - 2);
                self.stack.push(Slot::Intermediate);
            }
        }
        self.code.push(Asm::Instruction(instruction));
        Ok(self)
    }

    pub fn label(mut self, label: Label) -> Self {
        self.code.push(Asm::Label(label));
        self
    }

    /// Continues after a two-way branch: the code of `first` then `second`
    /// follows ours. Both branches started from [`Self::branch`] of `self` and
    /// must have the same depth; slots on which they disagree become
    /// [`Slot::Intermediate`].
    pub fn join(mut self, first: Self, second: Self) -> Self {
        debug_assert_eq!(first.depth(), second.depth());
        self.stack = first
            .stack
            .into_iter()
            .zip(second.stack)
            .map(|(a, b)| if a == b { a } else { Slot::Intermediate })
            .collect();
        self.code.extend(first.code);
        self.code.extend(second.code);
        self
    }

    fn require(&self, instruction: &Instruction<Label>, slots: usize) -> Result<(), CompileError> {
        if self.depth() < slots {
            return Err(CompileError::StackShapeInconsistency {
                detail: format!(
                    "`{}` needs {slots} slot(s), the stack holds {}",
                    instruction.mnemonic(),
                    self.depth()
                )
                .into_boxed_str(),
                span: None,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{Environment, Slot};
    use crate::{
        ast::{Expr, Param, Type, UserDefinition},
        builtin::BuiltinOp,
        compiler::{
            bytecode::{Asm, Instruction, Label},
            CompileError,
        },
        table::FunctionTable,
    };

    fn label() -> Label {
        let mut rodeo = lasso::Rodeo::default();
        Label(rodeo.get_or_intern("target"))
    }

    fn pushed_offsets(code: &[Asm]) -> Vec<usize> {
        code.iter()
            .filter_map(|item| match item {
                Asm::Instruction(Instruction::PushLocal(offset)) => Some(*offset),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn definition_frame_layout() {
        let table = FunctionTable::with_builtins();
        let def = UserDefinition::new(
            "f",
            [Param::new("a", Type::Nat), Param::new("b", Type::Bool)],
            Type::Nat,
            Expr::var("a"),
        );
        let env = Environment::for_definition(&table, &def);
        check!(
            env.stack()
                == [
                    Slot::Bound(Box::from("a")),
                    Slot::Bound(Box::from("b")),
                    Slot::Address
                ]
        );
    }

    #[test]
    fn variable_offsets() {
        let table = FunctionTable::with_builtins();
        let def = UserDefinition::new(
            "f",
            [Param::new("a", Type::Nat), Param::new("b", Type::Nat)],
            Type::Nat,
            Expr::var("a"),
        );
        // depth 3: a at 0, b at 1
        let env = Environment::for_definition(&table, &def);
        let env = env.push_variable("a").unwrap();
        check!(pushed_offsets(env.code()) == [2]);
        // depth 4: b at 1
        let env = env.push_variable("b").unwrap();
        check!(pushed_offsets(env.code()) == [2, 2]);
        let env = env.push_constant(7);
        // depth 6: a's copy sits at 3 and is the innermost `a`
        let env = env.push_variable("a").unwrap();
        check!(pushed_offsets(env.code()) == [2, 2, 2]);
        check!(env.depth() == 7);
    }

    #[test]
    fn innermost_binding_wins() {
        let table = FunctionTable::with_builtins();
        let def = UserDefinition::new(
            "f",
            [Param::new("x", Type::Nat), Param::new("x", Type::Nat)],
            Type::Nat,
            Expr::var("x"),
        );
        let env = Environment::for_definition(&table, &def)
            .push_variable("x")
            .unwrap();
        // the second `x` is at index 1, depth is 3
        check!(pushed_offsets(env.code()) == [1]);
    }

    #[test]
    fn unbound_variable() {
        let table = FunctionTable::with_builtins();
        let env = Environment::new(&table).push_constant(1);
        let_assert!(Err(CompileError::UnboundVariable { name, .. }) = env.push_variable("n"));
        check!(name.as_ref() == "n");
    }

    #[test]
    fn call_sequence_shapes() {
        let table = FunctionTable::with_builtins();
        let target = label();
        let env = Environment::new(&table).push_constant(1).push_constant(2);
        let env = env.emit(Instruction::PushAddress(target)).unwrap();
        check!(env.depth() == 3);
        check!(env.stack().last() == Some(&Slot::Address));
        let env = env.emit(Instruction::Call).unwrap();
        check!(env.depth() == 3);
        check!(env.stack().last() == Some(&Slot::Intermediate));
        let env = env.emit(Instruction::Slide(2)).unwrap();
        check!(env.stack() == [Slot::Intermediate]);
    }

    #[test]
    fn return_keeps_the_value() {
        let table = FunctionTable::with_builtins();
        let def = UserDefinition::new("f", [Param::new("n", Type::Nat)], Type::Nat, Expr::var("n"));
        let env = Environment::for_definition(&table, &def)
            .push_variable("n")
            .unwrap()
            .emit(Instruction::Return)
            .unwrap();
        check!(env.stack() == [Slot::Bound(Box::from("n")), Slot::Bound(Box::from("n"))]);
    }

    #[test]
    fn operators_and_branches() {
        let table = FunctionTable::with_builtins();
        let env = Environment::new(&table)
            .push_constant(1)
            .push_constant(2)
            .emit(Instruction::Operator(BuiltinOp::Add))
            .unwrap();
        check!(env.stack() == [Slot::Intermediate]);
        let env = env.emit(Instruction::JumpIfZero(label())).unwrap();
        check!(env.depth() == 0);
        let env = env.emit(Instruction::Jump(label())).unwrap().label(label());
        check!(env.depth() == 0);
        check!(env.code().len() == 6);
    }

    #[test]
    fn join_forgets_disagreeing_slots() {
        let table = FunctionTable::with_builtins();
        let def = UserDefinition::new(
            "f",
            [Param::new("a", Type::Nat), Param::new("b", Type::Nat)],
            Type::Nat,
            Expr::var("a"),
        );
        let env = Environment::for_definition(&table, &def);
        let first = env.branch().push_variable("a").unwrap();
        let second = env.branch().push_variable("b").unwrap();
        let joined = env.join(first, second);
        check!(joined.stack().last() == Some(&Slot::Intermediate));
        check!(pushed_offsets(joined.code()) == [2, 1]);
        // `b` must still resolve to the parameter, not the merged value
        let joined = joined.push_variable("b").unwrap();
        check!(pushed_offsets(joined.code()) == [2, 1, 2]);
    }

    #[test]
    fn underflow_is_internal() {
        let table = FunctionTable::with_builtins();
        let_assert!(
            Err(err) = Environment::new(&table)
                .push_constant(1)
                .emit(Instruction::Operator(BuiltinOp::Mul))
        );
        check!(err.is_internal());
        check!(Environment::new(&table).emit(Instruction::Slide(1)).is_err());
        check!(Environment::new(&table).emit(Instruction::PushLocal(0)).is_err());
    }
}
