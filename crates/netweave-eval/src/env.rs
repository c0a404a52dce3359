//! Scoped local variables of one method invocation.

use std::collections::BTreeMap;

use crate::value::Value;

#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: BTreeMap<String, Value>,
}

/// Scoped variable environment with push/pop semantics.
///
/// Variables are looked up from innermost scope outward.
/// `define` always creates in the current (innermost) scope.
/// `set` updates the first scope where the variable exists.
#[derive(Debug, Clone)]
pub struct Environment {
    scopes: Vec<Scope>,
}

impl Environment {
    /// A new environment with one scope for the parameters.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    /// Push a new scope (for the branches of an `if`).
    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pop the innermost scope. The outermost scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn define(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(name.to_string(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(name))
    }

    /// Update a variable in the first scope where it exists.
    /// Returns `false` when no scope defines it.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.bindings.get_mut(name) {
                *slot = value;
                return true;
            }
        }
        false
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
