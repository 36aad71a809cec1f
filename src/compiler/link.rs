use std::collections::HashMap;

use tracing::trace;

use super::{
    bytecode::{Asm, Assembly, Label, ObjectCode},
    CompileError,
};

impl Assembly {
    /// Resolves every label to the index of the instruction following it.
    ///
    /// The first pass only counts instructions, so a label may be referenced
    /// before it is defined.
    pub fn link(&self) -> Result<ObjectCode, CompileError> {
        let mut addresses: HashMap<Label, usize> = HashMap::new();
        let mut next = 0;
        for item in &self.items {
            match item {
                Asm::Label(label) => {
                    if addresses.insert(*label, next).is_some() {
                        return Err(CompileError::DuplicateLabel {
                            label: Box::from(self.label_name(*label)),
                        });
                    }
                    trace!(label = self.label_name(*label), address = next, "resolved");
                }
                Asm::Instruction(_) => next += 1,
            }
        }

        self.items
            .iter()
            .filter_map(|item| match item {
                Asm::Instruction(ins) => Some(ins),
                Asm::Label(_) => None,
            })
            .map(|ins| {
                ins.try_map_target(|label| {
                    addresses
                        .get(&label)
                        .copied()
                        .ok_or_else(|| CompileError::UnresolvedLabel {
                            label: Box::from(self.label_name(label)),
                        })
                })
            })
            .collect::<Result<_, _>>()
            .map(ObjectCode)
    }
}
