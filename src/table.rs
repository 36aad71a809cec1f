//! The global function table: every name a program can call.
use std::collections::HashMap;

use crate::{
    ast::{Definition, UserDefinition},
    builtin::BuiltinOp,
};

/// Name of the definition a program starts executing at.
pub const ENTRY_POINT: &str = "MAIN";

/// Maps function names to their definitions.
///
/// Built once by the checker and then only read. User definitions are kept in
/// the order they were inserted so everything derived from the table, object
/// code in particular, comes out the same on every run.
#[derive(Debug, Clone)]
pub struct FunctionTable {
    definitions: HashMap<Box<str>, Definition>,
    order: Vec<Box<str>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("function `{}` is already defined", .0.name)]
pub struct AlreadyDefined(pub Box<UserDefinition>);

impl FunctionTable {
    /// A table knowing only the builtins.
    pub fn with_builtins() -> Self {
        Self {
            definitions: BuiltinOp::ALL
                .into_iter()
                .map(|op| (Box::from(op.name()), Definition::Builtin(op)))
                .collect(),
            order: vec![],
        }
    }

    /// Adds a user definition. Fails, handing the definition back, if the
    /// name is taken (builtins included).
    pub fn define(&mut self, definition: UserDefinition) -> Result<(), AlreadyDefined> {
        if self.definitions.contains_key(&definition.name) {
            return Err(AlreadyDefined(Box::new(definition)));
        }
        self.order.push(definition.name.clone());
        self.definitions
            .insert(definition.name.clone(), Definition::User(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    /// User definitions in definition order.
    pub fn user_definitions(&self) -> impl Iterator<Item = &UserDefinition> + '_ {
        self.order
            .iter()
            .filter_map(|name| match self.definitions.get(name) {
                Some(Definition::User(def)) => Some(def),
                _ => None,
            })
    }

    /// The `MAIN` definition, if one exists and takes no parameters.
    pub fn entry_point(&self) -> Option<&UserDefinition> {
        match self.definitions.get(ENTRY_POINT) {
            Some(Definition::User(def)) if def.params.is_empty() => Some(def),
            _ => None,
        }
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}
