//! The UEBB instruction set.
//!
//! Instructions are generic over their jump target. The code generator emits
//! `Instruction<Label>` interleaved with [`Asm::Label`] markers; linking turns
//! that into plain `Instruction<Address>`, where no labels remain.
use core::fmt;
use std::str::FromStr;

use crate::builtin::BuiltinOp;

/// The only kind of runtime value. Booleans are 0 and 1, code addresses are
/// instruction indices.
pub type Word = u64;

/// Index into resolved object code.
pub type Address = usize;

/// A symbolic jump target, interned by the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) lasso::Spur);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction<A = Address> {
    /// push a constant
    PushInt(Word),
    /// push a copy of the value `n` slots below the top
    PushLocal(usize),
    /// push a code address, only ever followed by [`Self::Call`]
    PushAddress(A),
    /// pop the callee address, push the return address and jump
    Call,
    /// pop the result and the return address below it, push the result back and jump
    Return,
    Jump(A),
    /// pop a value and jump if it is zero
    JumpIfZero(A),
    /// drop `n` values below the top value
    Slide(usize),
    /// pop `b` then `a`, push `a op b`
    Operator(BuiltinOp),
    Halt,
}

impl<A> Instruction<A> {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::PushInt(_) => "PushInt",
            Self::PushLocal(_) => "PushLocal",
            Self::PushAddress(_) => "PushAddress",
            Self::Call => "Call",
            Self::Return => "Return",
            Self::Jump(_) => "Jump",
            Self::JumpIfZero(_) => "JumpIfZero",
            Self::Slide(_) => "Slide",
            Self::Operator(op) => op.mnemonic(),
            Self::Halt => "Halt",
        }
    }

    /// Rewrites the jump target, if this instruction has one.
    pub fn try_map_target<B, E>(
        self,
        func: impl FnOnce(A) -> Result<B, E>,
    ) -> Result<Instruction<B>, E> {
        Ok(match self {
            Self::PushAddress(a) => Instruction::PushAddress(func(a)?),
            Self::Jump(a) => Instruction::Jump(func(a)?),
            Self::JumpIfZero(a) => Instruction::JumpIfZero(func(a)?),
            Self::PushInt(n) => Instruction::PushInt(n),
            Self::PushLocal(n) => Instruction::PushLocal(n),
            Self::Call => Instruction::Call,
            Self::Return => Instruction::Return,
            Self::Slide(n) => Instruction::Slide(n),
            Self::Operator(op) => Instruction::Operator(op),
            Self::Halt => Instruction::Halt,
        })
    }

    pub fn map_target<B>(self, func: impl FnOnce(A) -> B) -> Instruction<B> {
        match self.try_map_target(|a| Ok::<_, std::convert::Infallible>(func(a))) {
            Ok(ins) => ins,
            Err(never) => match never {},
        }
    }
}

impl<A: fmt::Display> fmt::Display for Instruction<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.mnemonic();
        match self {
            Self::PushInt(n) => write!(f, "{mnemonic}({n})"),
            Self::PushLocal(n) | Self::Slide(n) => write!(f, "{mnemonic}({n})"),
            Self::PushAddress(a) | Self::Jump(a) | Self::JumpIfZero(a) => {
                write!(f, "{mnemonic}({a})")
            }
            Self::Call | Self::Return | Self::Operator(_) | Self::Halt => write!(f, "{mnemonic}"),
        }
    }
}

/// One line of unlinked assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asm {
    /// Marks the position of the next instruction. Not an instruction itself.
    Label(Label),
    Instruction(Instruction<Label>),
}

/// Code generator output: instructions with symbolic targets.
#[derive(Debug)]
pub struct Assembly {
    pub(crate) items: Vec<Asm>,
    pub(crate) labels: lasso::RodeoReader,
}

impl Assembly {
    pub fn label_name(&self, label: Label) -> &str {
        self.labels.resolve(&label.0)
    }

    /// Number of real instructions, that is without the label markers.
    pub fn instruction_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, Asm::Instruction(_)))
            .count()
    }
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            match item {
                Asm::Label(label) => writeln!(f, "Label({})", self.label_name(*label))?,
                Asm::Instruction(ins) => {
                    writeln!(f, "{}", ins.map_target(|label| self.label_name(label)))?
                }
            }
        }
        Ok(())
    }
}

/// Linked, executable instructions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectCode(pub(crate) Box<[Instruction]>);

impl ObjectCode {
    pub fn new(instructions: impl IntoIterator<Item = Instruction>) -> Self {
        Self(instructions.into_iter().collect())
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads back a listing as written by the `Display` impl. Blank lines
    /// and `--` comments are skipped.
    pub fn from_listing(listing: &str) -> Result<Self, ListingError> {
        listing
            .lines()
            .enumerate()
            .filter_map(|(idx, line)| {
                let line = match line.find("--") {
                    Some(comment) => &line[..comment],
                    None => line,
                }
                .trim();
                (!line.is_empty()).then_some((idx, line))
            })
            .map(|(idx, line)| {
                line.parse().map_err(|error| ListingError {
                    line: idx + 1,
                    error,
                })
            })
            .collect::<Result<_, _>>()
            .map(Self)
    }
}

impl fmt::Display for ObjectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ins in self.0.iter() {
            writeln!(f, "{ins}")?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InstructionParseError {
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(Box<str>),
    #[error("`{0}` expects an operand")]
    MissingOperand(&'static str),
    #[error("`{0}` takes no operand")]
    UnexpectedOperand(&'static str),
    #[error("malformed operand `{0}`")]
    MalformedOperand(Box<str>),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {error}")]
pub struct ListingError {
    pub line: usize,
    #[source]
    pub error: InstructionParseError,
}

impl FromStr for Instruction {
    type Err = InstructionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mnemonic, operand) = match s.split_once('(') {
            Some((mnemonic, rest)) => {
                let operand = rest
                    .strip_suffix(')')
                    .ok_or_else(|| InstructionParseError::MalformedOperand(Box::from(rest)))?;
                (mnemonic.trim(), Some(operand.trim()))
            }
            None => (s.trim(), None),
        };

        fn number<T: FromStr>(
            mnemonic: &'static str,
            operand: Option<&str>,
        ) -> Result<T, InstructionParseError> {
            let operand = operand.ok_or(InstructionParseError::MissingOperand(mnemonic))?;
            operand
                .parse()
                .map_err(|_| InstructionParseError::MalformedOperand(Box::from(operand)))
        }

        fn bare(
            ins: Instruction,
            operand: Option<&str>,
        ) -> Result<Instruction, InstructionParseError> {
            match operand {
                Some(_) => Err(InstructionParseError::UnexpectedOperand(ins.mnemonic())),
                None => Ok(ins),
            }
        }

        match mnemonic {
            "PushInt" => Ok(Self::PushInt(number("PushInt", operand)?)),
            "PushLocal" => Ok(Self::PushLocal(number("PushLocal", operand)?)),
            "PushAddress" => Ok(Self::PushAddress(number("PushAddress", operand)?)),
            "Jump" => Ok(Self::Jump(number("Jump", operand)?)),
            "JumpIfZero" => Ok(Self::JumpIfZero(number("JumpIfZero", operand)?)),
            "Slide" => Ok(Self::Slide(number("Slide", operand)?)),
            "Call" => bare(Self::Call, operand),
            "Return" => bare(Self::Return, operand),
            "Halt" => bare(Self::Halt, operand),
            other => match BuiltinOp::from_mnemonic(other) {
                Some(op) => bare(Self::Operator(op), operand),
                None => Err(InstructionParseError::UnknownMnemonic(Box::from(other))),
            },
        }
    }
}
