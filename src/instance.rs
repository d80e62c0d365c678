use crate::interpreter::Token;
use crate::lexer::Lexeme;
use crate::reference::Reference;
use crate::types::TypeDefinition;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;

/// Resolved values of one resource, keyed by template label. Nested values
/// use dotted keys (`origin.x`) and repeatable fields keep one map per list
/// element, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValueMap {
    values: BTreeMap<String, Token>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    lists: BTreeMap<String, Vec<ValueMap>>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Token> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Token) {
        self.values.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn values(&self) -> impl Iterator<Item = (&String, &Token)> {
        self.values.iter()
    }

    pub fn list(&self, field: &str) -> &[ValueMap] {
        self.lists.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn lists(&self) -> impl Iterator<Item = (&String, &Vec<ValueMap>)> {
        self.lists.iter()
    }

    pub fn push_entry(&mut self, field: impl Into<String>, entry: ValueMap) {
        self.lists.entry(field.into()).or_default().push(entry);
    }

    pub fn last_entry_mut(&mut self, field: &str) -> Option<&mut ValueMap> {
        self.lists.get_mut(field).and_then(|entries| entries.last_mut())
    }

    /// Ensures the list for `field` exists, even when empty.
    pub fn ensure_list(&mut self, field: impl Into<String>) -> &mut Vec<ValueMap> {
        self.lists.entry(field.into()).or_default()
    }

    /// Copies every value of `other` under `prefix.`.
    pub fn merge_prefixed(&mut self, prefix: &str, other: ValueMap) {
        for (key, value) in other.values {
            self.values.insert(format!("{prefix}.{key}"), value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.lists.is_empty()
    }

    /// Calls `visit` on every value, list entries included.
    pub fn visit_tokens_mut(&mut self, visit: &mut impl FnMut(&mut Token)) {
        self.values.values_mut().for_each(&mut *visit);
        for entry in self.lists.values_mut().flatten() {
            entry.visit_tokens_mut(visit);
        }
    }
}

/// A declared resource with its resolved values.
#[derive(Debug, Clone)]
pub struct ResourceInstance {
    pub reference: Reference,
    pub name: String,
    pub definition: Arc<TypeDefinition>,
    pub values: ValueMap,
    pub origin: Option<Lexeme>,
}

impl ResourceInstance {
    pub fn new(reference: Reference, name: impl Into<String>, definition: Arc<TypeDefinition>) -> Self {
        Self {
            reference,
            name: name.into(),
            definition,
            values: ValueMap::new(),
            origin: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.reference.id()
    }

    pub fn type_code(&self) -> &str {
        self.definition.code()
    }

    pub fn container(&self) -> Option<&str> {
        self.reference.container()
    }

    /// Same type, container and id.
    pub fn same_slot(&self, other: &Reference) -> bool {
        self.reference.id() == other.id()
            && self.reference.container() == other.container()
            && self.reference.type_name() == other.type_name()
    }
}

impl Display for ResourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)?;
        if !self.name.is_empty() {
            write!(f, " \"{}\"", self.name)?;
        }
        Ok(())
    }
}
