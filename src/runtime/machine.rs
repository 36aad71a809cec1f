use tracing::{debug, instrument, trace};

use crate::{
    builtin::ArithmeticError,
    compiler::bytecode::{Address, Instruction, ObjectCode, Word},
};

use super::fuel::Fuel;

/// Steps a program may take unless configured otherwise.
///
/// This only guards against runaway recursion. Running out of budget says
/// nothing about whether the program would have terminated.
pub const DEFAULT_BUDGET: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Maximum number of instructions executed before giving up
    pub budget: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("division by zero at {pc}")]
    DivisionByZero { pc: Address },
    #[error("arithmetic error at {pc}: {error}")]
    ArithmeticOverflow {
        pc: Address,
        #[source]
        error: ArithmeticError,
    },
    #[error("program halted with {depth} values on the stack, expected exactly 1")]
    MalformedResult { depth: usize },
    #[error("execution budget of {budget} steps exceeded")]
    ExecutionBudgetExceeded { budget: u64 },
    #[error("`{instruction}` at {pc} needs {needed} value(s), the stack holds {depth}")]
    StackUnderflow {
        pc: Address,
        instruction: &'static str,
        needed: usize,
        depth: usize,
    },
    #[error("program counter {pc} is outside the program")]
    ProgramCounterOutOfBounds { pc: Address },
    #[error("value {value} at {pc} is not a code address")]
    InvalidAddress { pc: Address, value: Word },
}

/// The UEBB stack machine.
///
/// Executes linked object code against an operand stack. Each executed
/// instruction costs one unit of fuel.
#[derive(Debug, Clone)]
pub struct Machine<'c> {
    code: &'c ObjectCode,
    pc: Address,
    stack: Vec<Word>,
    fuel: Fuel,
    budget: u64,
}

impl<'c> Machine<'c> {
    pub fn new(code: &'c ObjectCode, config: MachineConfig) -> Self {
        Self {
            code,
            pc: 0,
            stack: vec![],
            fuel: Fuel::with(config.budget),
            budget: config.budget,
        }
    }

    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn stack(&self) -> &[Word] {
        &self.stack
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.fuel.spent()
    }

    /// Runs until `Halt`, returning the single value left on the stack.
    #[instrument(skip_all, fields(budget = self.budget))]
    pub fn run(&mut self) -> Result<Word, VmError> {
        loop {
            if let Some(result) = self.step()? {
                debug!(result, steps = self.steps(), "halted");
                return Ok(result);
            }
        }
    }

    /// Executes a single instruction. Returns the result once the machine
    /// halts.
    pub fn step(&mut self) -> Result<Option<Word>, VmError> {
        if !self.fuel.should_continue() {
            return Err(VmError::ExecutionBudgetExceeded {
                budget: self.budget,
            });
        }
        let at = self.pc;
        let ins = *self
            .code
            .instructions()
            .get(at)
            .ok_or(VmError::ProgramCounterOutOfBounds { pc: at })?;
        self.fuel.consume(1);
        self.pc += 1;
        trace!(pc = at, %ins, depth = self.stack.len());

        match ins {
            Instruction::PushInt(n) => self.stack.push(n),
            Instruction::PushLocal(offset) => {
                self.require(at, &ins, offset.saturating_add(1))?;
                let value = self.stack[self.stack.len() - 1 - offset];
                self.stack.push(value);
            }
            Instruction::PushAddress(addr) => self.stack.push(addr as Word),
            Instruction::Call => {
                let target = self.pop_address(at, &ins)?;
                self.stack.push(self.pc as Word);
                self.pc = target;
            }
            Instruction::Return => {
                self.require(at, &ins, 2)?;
                let value = self.pop(at, &ins)?;
                let target = self.pop_address(at, &ins)?;
                self.stack.push(value);
                self.pc = target;
            }
            Instruction::Jump(addr) => self.pc = addr,
            Instruction::JumpIfZero(addr) => {
                if self.pop(at, &ins)? == 0 {
                    self.pc = addr;
                }
            }
            Instruction::Slide(count) => {
                self.require(at, &ins, count.saturating_add(1))?;
                let top = self.pop(at, &ins)?;
                self.stack.truncate(self.stack.len() - count);
                self.stack.push(top);
            }
            Instruction::Operator(op) => {
                self.require(at, &ins, 2)?;
                let b = self.pop(at, &ins)?;
                let a = self.pop(at, &ins)?;
                let result = op.apply(a, b).map_err(|error| match error {
                    ArithmeticError::DivisionByZero => VmError::DivisionByZero { pc: at },
                    error => VmError::ArithmeticOverflow { pc: at, error },
                })?;
                self.stack.push(result);
            }
            Instruction::Halt => {
                return match self.stack.as_slice() {
                    [result] => Ok(Some(*result)),
                    stack => Err(VmError::MalformedResult { depth: stack.len() }),
                };
            }
        }
        Ok(None)
    }

    fn require(&self, pc: Address, ins: &Instruction, needed: usize) -> Result<(), VmError> {
        if self.stack.len() < needed {
            return Err(VmError::StackUnderflow {
                pc,
                instruction: ins.mnemonic(),
                needed,
                depth: self.stack.len(),
            });
        }
        Ok(())
    }

    fn pop(&mut self, pc: Address, ins: &Instruction) -> Result<Word, VmError> {
        self.require(pc, ins, 1)?;
        Ok(self.stack.pop().unwrap_or_default())
    }

    fn pop_address(&mut self, pc: Address, ins: &Instruction) -> Result<Address, VmError> {
        let value = self.pop(pc, ins)?;
        Address::try_from(value).map_err(|_| VmError::InvalidAddress { pc, value })
    }
}

/// Runs `code` to completion on a fresh machine.
pub fn execute(code: &ObjectCode, config: MachineConfig) -> Result<Word, VmError> {
    Machine::new(code, config).run()
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{execute, Machine, MachineConfig, VmError};
    use crate::{builtin::ArithmeticError, builtin::BuiltinOp, compiler::bytecode::ObjectCode};

    fn listing(src: &str) -> ObjectCode {
        ObjectCode::from_listing(src).unwrap()
    }

    fn run(src: &str) -> Result<u64, VmError> {
        execute(&listing(src), MachineConfig::default())
    }

    const FACTORIAL: &str = "
        PushInt(10)
        PushAddress(5)
        Call
        Slide(1)
        Halt
        PushLocal(1)
        JumpIfZero(16)
        PushLocal(1)
        PushLocal(0)
        PushInt(1)
        Sub
        PushAddress(5)
        Call
        Slide(1)
        Mul
        Jump(17)
        PushInt(1)
        Return
    ";

    #[test]
    fn arithmetic() {
        check!(run("PushInt(5)\nPushInt(6)\nMul\nHalt") == Ok(30));
        check!(run("PushInt(7)\nPushInt(3)\nSub\nHalt") == Ok(4));
        check!(run("PushInt(81)\nPushInt(9)\nDiv\nHalt") == Ok(9));
        check!(run("PushInt(3)\nPushInt(4)\nLt\nHalt") == Ok(1));
        check!(run("PushInt(3)\nPushInt(4)\nEq\nHalt") == Ok(0));
    }

    #[test]
    fn factorial() {
        check!(run(FACTORIAL) == Ok(3_628_800));
    }

    #[test]
    fn locals_and_slides() {
        // PushLocal duplicates, Slide keeps the top value
        check!(run("PushInt(1)\nPushInt(2)\nPushInt(3)\nPushLocal(1)\nSlide(3)\nHalt") == Ok(2));
        check!(run("PushInt(1)\nPushInt(2)\nPushLocal(1)\nSlide(1)\nAdd\nHalt") == Ok(2));
    }

    #[test]
    fn conditional_jumps() {
        let src = "PushInt(0)\nJumpIfZero(4)\nPushInt(2)\nJump(5)\nPushInt(1)\nHalt";
        check!(run(src) == Ok(1));
        let src = "PushInt(3)\nJumpIfZero(4)\nPushInt(2)\nJump(5)\nPushInt(1)\nHalt";
        check!(run(src) == Ok(2));
    }

    #[test]
    fn call_pushes_the_return_address() {
        let code = listing("PushAddress(3)\nCall\nHalt\nPushInt(9)\nReturn");
        let mut machine = Machine::new(&code, MachineConfig::default());
        check!(machine.step() == Ok(None));
        check!(machine.step() == Ok(None));
        check!(machine.pc() == 3);
        check!(machine.stack() == [2]);
        check!(machine.step() == Ok(None));
        check!(machine.step() == Ok(None));
        check!(machine.pc() == 2);
        check!(machine.stack() == [9]);
        check!(machine.step() == Ok(Some(9)));
        check!(machine.steps() == 5);
    }

    #[test]
    fn runtime_failures() {
        check!(run("PushInt(9)\nPushInt(0)\nDiv\nHalt") == Err(VmError::DivisionByZero { pc: 2 }));
        check!(
            run("PushInt(3)\nPushInt(7)\nSub\nHalt")
                == Err(VmError::ArithmeticOverflow {
                    pc: 2,
                    error: ArithmeticError::OutOfRange {
                        op: BuiltinOp::Sub,
                        a: 3,
                        b: 7
                    }
                })
        );
        check!(run("PushInt(1)\nPushInt(2)\nHalt") == Err(VmError::MalformedResult { depth: 2 }));
        check!(run("Halt") == Err(VmError::MalformedResult { depth: 0 }));
        check!(run("PushInt(1)") == Err(VmError::ProgramCounterOutOfBounds { pc: 1 }));
        check!(run("PushInt(1)\nJump(7)") == Err(VmError::ProgramCounterOutOfBounds { pc: 7 }));
        let_assert!(Err(VmError::StackUnderflow { instruction, .. }) = run("PushInt(1)\nAdd\nHalt"));
        check!(instruction == "Add");
        check!(run("PushInt(1)\nSlide(1)\nHalt").is_err());

        // operands far beyond any stack are underflows too
        let_assert!(
            Err(VmError::StackUnderflow {
                pc: 1,
                instruction: "PushLocal",
                needed,
                depth: 1,
            }) = run("PushInt(1)\nPushLocal(18446744073709551615)\nHalt")
        );
        check!(needed == usize::MAX);
        let_assert!(
            Err(VmError::StackUnderflow {
                pc: 1,
                instruction: "Slide",
                depth: 1,
                ..
            }) = run("PushInt(1)\nSlide(18446744073709551615)\nHalt")
        );
    }

    #[test]
    fn budget() {
        let endless = listing("Jump(0)");
        let config = MachineConfig { budget: 250 };
        check!(execute(&endless, config) == Err(VmError::ExecutionBudgetExceeded { budget: 250 }));

        // exactly enough steps is fine, one less is not
        let code = listing(FACTORIAL);
        let mut machine = Machine::new(&code, MachineConfig::default());
        let_assert!(Ok(_) = machine.run());
        let needed = machine.steps();
        check!(execute(&code, MachineConfig { budget: needed }) == Ok(3_628_800));
        check!(execute(&code, MachineConfig { budget: needed - 1 }).is_err());
    }
}
