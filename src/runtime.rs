//! Runtimes execute a checked program: [`machine`] runs linked object code,
//! [`treewalk`] evaluates the syntax tree directly and serves as the
//! reference the machine is tested against.
pub mod fuel;
pub mod machine;
pub mod treewalk;

pub use fuel::Fuel;
pub use machine::{execute, Machine, MachineConfig, VmError, DEFAULT_BUDGET};
pub use treewalk::{evaluate, EvalConfig, EvalError, Treewalk};
