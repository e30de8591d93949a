// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Symbol interning for class and attribute names.
//!
//! Schema names are compared constantly during rule enumeration (forbidden
//! sets, redundancy checks, partition ordering). Interned symbols make those
//! comparisons integer comparisons.

use serde::{Deserialize, Serialize};
use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

/// An interned name (class or attribute).
///
/// Symbols are cheap to copy and compare. They are only meaningful relative
/// to the [`SymbolTable`] that produced them; the schema `Domain` owns one.
pub type Name = DefaultSymbol;

/// A table for interning schema names.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    interner: StringInterner<DefaultBackend>,
}

impl SymbolTable {
    /// Create a new empty symbol table.
    pub fn new() -> Self {
        Self {
            interner: StringInterner::new(),
        }
    }

    /// Intern a string, returning its symbol.
    pub fn intern(&mut self, s: &str) -> Name {
        self.interner.get_or_intern(s)
    }

    /// Get the string for a symbol, if it exists.
    pub fn resolve(&self, name: Name) -> Option<&str> {
        self.interner.resolve(name)
    }

    /// Get the string for a symbol, panicking if not found.
    pub fn resolve_unchecked(&self, name: Name) -> &str {
        self.interner.resolve(name).expect("Name not found in table")
    }

    /// Get the symbol for a string if it has been interned.
    pub fn get(&self, s: &str) -> Option<Name> {
        self.interner.get(s)
    }

    /// Get the number of interned names.
    pub fn len(&self) -> usize {
        self.interner.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.interner.is_empty()
    }
}

/// Wrapper for serializing names with their string representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableName {
    name: String,
}

impl SerializableName {
    /// Create from a symbol and table.
    pub fn from_name(name: Name, table: &SymbolTable) -> Self {
        Self {
            name: table.resolve_unchecked(name).to_string(),
        }
    }

    /// Convert back to a symbol using a table.
    pub fn to_name(&self, table: &mut SymbolTable) -> Name {
        table.intern(&self.name)
    }

    /// Get the name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_interning() {
        let mut table = SymbolTable::new();

        let a1 = table.intern("Age");
        let a2 = table.intern("Age");
        let b = table.intern("Balance");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(table.resolve(a1), Some("Age"));
        assert_eq!(table.len(), 2);
    }
}
