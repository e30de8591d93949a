// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Entity schema model.
//!
//! A [`Domain`] is a rooted tree of [`Class`]es; each class owns an ordered
//! list of [`Attribute`]s. Relation-typed attributes (`Entity` 1:1,
//! `Table` 1:N) point at other classes of the same domain. A subset of each
//! class's attributes forms its key; keys encode structure, carry no
//! information, and are therefore forbidden as construction operands.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, PrepResult};
use crate::symbol::{Name, SymbolTable};

/// Primitive or relation type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Continuous numeric value.
    Numeric,
    /// Categorical value.
    Categorical,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Date + time.
    Timestamp,
    /// Free text.
    Text,
    /// 1:1 relation to another class.
    Entity(Name),
    /// 1:N relation to another class.
    Table(Name),
}

/// Type kind without the relation target, used by rule signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Numeric,
    Categorical,
    Date,
    Time,
    Timestamp,
    Text,
    Entity,
    Table,
}

impl DataType {
    /// The kind of this type, relation target erased.
    pub fn kind(&self) -> TypeKind {
        match self {
            DataType::Numeric => TypeKind::Numeric,
            DataType::Categorical => TypeKind::Categorical,
            DataType::Date => TypeKind::Date,
            DataType::Time => TypeKind::Time,
            DataType::Timestamp => TypeKind::Timestamp,
            DataType::Text => TypeKind::Text,
            DataType::Entity(_) => TypeKind::Entity,
            DataType::Table(_) => TypeKind::Table,
        }
    }

    /// Numeric or categorical, the types a predictor consumes directly.
    pub fn is_simple(&self) -> bool {
        matches!(self, DataType::Numeric | DataType::Categorical)
    }

    /// Entity or Table.
    pub fn is_relation(&self) -> bool {
        matches!(self, DataType::Entity(_) | DataType::Table(_))
    }

    /// The class a relation type points to.
    pub fn referenced_class(&self) -> Option<Name> {
        match self {
            DataType::Entity(class) | DataType::Table(class) => Some(*class),
            _ => None,
        }
    }
}

impl TypeKind {
    /// Whether the kind is a relation kind.
    pub fn is_relation(&self) -> bool {
        matches!(self, TypeKind::Entity | TypeKind::Table)
    }

    /// Whether the kind is numeric or categorical.
    pub fn is_simple(&self) -> bool {
        matches!(self, TypeKind::Numeric | TypeKind::Categorical)
    }
}

/// Derivation metadata attached to a constructed attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    /// Rendered formula, e.g. `Mean(Items.Price)`.
    pub formula: String,
    /// Prior cost (negative log prior) of the underlying rule tree.
    pub cost: f64,
}

/// One attribute of a class.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: Name,
    data_type: DataType,
    used: bool,
    derivation: Option<Derivation>,
}

impl Attribute {
    /// Create a native (non-derived) attribute.
    pub fn new(name: Name, data_type: DataType) -> Self {
        Self {
            name,
            data_type,
            used: true,
            derivation: None,
        }
    }

    /// Attribute name.
    pub fn name(&self) -> Name {
        self.name
    }

    /// Attribute type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Whether the attribute participates in analysis.
    pub fn used(&self) -> bool {
        self.used
    }

    /// Mark the attribute used or unused.
    pub fn set_used(&mut self, used: bool) {
        self.used = used;
    }

    /// Derivation metadata, present on constructed attributes.
    pub fn derivation(&self) -> Option<&Derivation> {
        self.derivation.as_ref()
    }

    /// True when the attribute was produced by feature construction.
    pub fn is_derived(&self) -> bool {
        self.derivation.is_some()
    }
}

/// A class: an ordered list of attributes plus a key.
#[derive(Debug, Clone)]
pub struct Class {
    name: Name,
    attributes: Vec<Attribute>,
    attribute_index: HashMap<Name, usize>,
    key: Vec<Name>,
}

impl Class {
    fn new(name: Name) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            attribute_index: HashMap::new(),
            key: Vec::new(),
        }
    }

    /// Class name.
    pub fn name(&self) -> Name {
        self.name
    }

    /// All attributes in declaration order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Used attributes in declaration order.
    pub fn used_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.used())
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: Name) -> Option<&Attribute> {
        self.attribute_index.get(&name).map(|&i| &self.attributes[i])
    }

    /// Key attribute names.
    pub fn key_attributes(&self) -> &[Name] {
        &self.key
    }

    /// Whether `name` is part of the key.
    pub fn is_key_attribute(&self, name: Name) -> bool {
        self.key.contains(&name)
    }

    /// Number of used attributes of the given kind.
    pub fn used_attribute_count_for_kind(&self, kind: TypeKind) -> usize {
        self.used_attributes()
            .filter(|a| a.data_type().kind() == kind)
            .count()
    }

    fn push_attribute(&mut self, attribute: Attribute) -> PrepResult<()> {
        if self.attribute_index.contains_key(&attribute.name()) {
            return Err(PrepError::DuplicateAttribute(format!(
                "{:?}",
                attribute.name()
            )));
        }
        self.attribute_index
            .insert(attribute.name(), self.attributes.len());
        self.attributes.push(attribute);
        Ok(())
    }
}

/// A rooted schema domain: the class tree plus its name table.
#[derive(Debug, Clone)]
pub struct Domain {
    symbols: SymbolTable,
    classes: Vec<Class>,
    class_index: HashMap<Name, usize>,
    root: Name,
}

impl Domain {
    /// The root class.
    pub fn root_class(&self) -> &Class {
        self.lookup_class(self.root).expect("root class exists")
    }

    /// Root class name.
    pub fn root(&self) -> Name {
        self.root
    }

    /// Look up a class by interned name.
    pub fn lookup_class(&self, name: Name) -> Option<&Class> {
        self.class_index.get(&name).map(|&i| &self.classes[i])
    }

    /// Look up a class by string name.
    pub fn class_named(&self, name: &str) -> Option<&Class> {
        self.symbols.get(name).and_then(|n| self.lookup_class(n))
    }

    /// All classes in discovery order (root first).
    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    /// Resolve an interned name back to its string.
    pub fn resolve(&self, name: Name) -> &str {
        self.symbols.resolve_unchecked(name)
    }

    /// Get the interned symbol of a string if present.
    pub fn name_of(&self, s: &str) -> Option<Name> {
        self.symbols.get(s)
    }

    /// Add a derived attribute to a class, interning its name.
    ///
    /// Used by the class builder when materialising constructed features.
    pub fn add_derived_attribute(
        &mut self,
        class: Name,
        attribute_name: &str,
        data_type: DataType,
        derivation: Derivation,
    ) -> PrepResult<Name> {
        let name = self.symbols.intern(attribute_name);
        let index = *self
            .class_index
            .get(&class)
            .ok_or_else(|| PrepError::UnknownClass(format!("{class:?}")))?;
        let mut attribute = Attribute::new(name, data_type);
        attribute.derivation = Some(derivation);
        self.classes[index].push_attribute(attribute)?;
        Ok(name)
    }

    /// Flip the used flag of an attribute.
    pub fn set_attribute_used(
        &mut self,
        class: Name,
        attribute: Name,
        used: bool,
    ) -> PrepResult<()> {
        let index = *self
            .class_index
            .get(&class)
            .ok_or_else(|| PrepError::UnknownClass(format!("{class:?}")))?;
        let class = &mut self.classes[index];
        let attribute_index = *class
            .attribute_index
            .get(&attribute)
            .ok_or_else(|| PrepError::UnknownAttribute(format!("{attribute:?}")))?;
        class.attributes[attribute_index].set_used(used);
        Ok(())
    }

    /// Whether an attribute name is free in the given class.
    pub fn is_attribute_name_free(&self, class: Name, attribute_name: &str) -> bool {
        match self.symbols.get(attribute_name) {
            None => true,
            Some(name) => self
                .lookup_class(class)
                .map(|c| c.attribute(name).is_none())
                .unwrap_or(true),
        }
    }

    /// Validate structural invariants: relation targets exist, keys resolve.
    pub fn check(&self) -> PrepResult<()> {
        for class in &self.classes {
            for attribute in class.attributes() {
                if let Some(target) = attribute.data_type().referenced_class() {
                    if self.lookup_class(target).is_none() {
                        return Err(PrepError::SchemaError(format!(
                            "relation attribute {} points to an unknown class",
                            self.resolve(attribute.name())
                        )));
                    }
                }
            }
            for &key in class.key_attributes() {
                if class.attribute(key).is_none() {
                    return Err(PrepError::SchemaError(format!(
                        "key attribute {} missing in class {}",
                        self.resolve(key),
                        self.resolve(class.name())
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Incremental construction of a [`Domain`].
#[derive(Debug, Default)]
pub struct DomainBuilder {
    symbols: SymbolTable,
    classes: Vec<Class>,
    class_index: HashMap<Name, usize>,
}

impl DomainBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a class, returning its interned name.
    pub fn add_class(&mut self, name: &str) -> Name {
        let symbol = self.symbols.intern(name);
        if !self.class_index.contains_key(&symbol) {
            self.class_index.insert(symbol, self.classes.len());
            self.classes.push(Class::new(symbol));
        }
        symbol
    }

    /// Add a native attribute to a declared class.
    pub fn add_attribute(
        &mut self,
        class: Name,
        name: &str,
        data_type: DataType,
    ) -> PrepResult<Name> {
        let symbol = self.symbols.intern(name);
        let index = *self
            .class_index
            .get(&class)
            .ok_or_else(|| PrepError::UnknownClass(name.to_string()))?;
        self.classes[index].push_attribute(Attribute::new(symbol, data_type))?;
        Ok(symbol)
    }

    /// Declare the key attributes of a class.
    pub fn set_key(&mut self, class: Name, key: &[Name]) -> PrepResult<()> {
        let index = *self
            .class_index
            .get(&class)
            .ok_or_else(|| PrepError::UnknownClass(format!("{class:?}")))?;
        self.classes[index].key = key.to_vec();
        Ok(())
    }

    /// Finish, validating the schema rooted at `root`.
    pub fn build(self, root: Name) -> PrepResult<Domain> {
        if !self.class_index.contains_key(&root) {
            return Err(PrepError::UnknownClass(format!("{root:?}")));
        }
        let domain = Domain {
            symbols: self.symbols,
            classes: self.classes,
            class_index: self.class_index,
            root,
        };
        domain.check()?;
        Ok(domain)
    }
}
