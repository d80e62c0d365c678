use super::descriptor::TypeDescriptor;
use crate::interpreter::{Statement, Token};
use crate::lexer::Lexeme;

/// A named constant usable in the expression assigned to a value, e.g.
/// `north = 0` in `direction = 0 [ north = 0, east = 1 ]`.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: Statement,
}

/// One template label claimed by a field, plus how its value is produced.
#[derive(Debug, Clone)]
pub struct FieldValue {
    pub name: String,
    /// Set by `@api(export)` or `@api("name")`.
    pub export_name: Option<String>,
    /// Written with `as Type`, or inferred from the template when the value is
    /// added to a type.
    pub descriptor: Option<TypeDescriptor>,
    pub default: Option<Statement>,
    /// The default, already evaluated by `@constexpr`.
    pub constant: Option<Token>,
    pub symbols: Vec<Symbol>,
    /// Labels written after `join`; they receive parts of the same expression.
    pub joined: Vec<FieldValue>,
    pub origin: Lexeme,
}

impl FieldValue {
    pub fn new(name: impl Into<String>, origin: Lexeme) -> Self {
        Self {
            name: name.into(),
            export_name: None,
            descriptor: None,
            default: None,
            constant: None,
            symbols: Vec::new(),
            joined: Vec::new(),
            origin,
        }
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// This value followed by its joined parts.
    pub fn parts(&self) -> impl Iterator<Item = &FieldValue> {
        std::iter::once(self).chain(self.joined.iter())
    }
}

/// Repetition bounds of a field whose values live in a list group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repeatable {
    pub lower: i64,
    pub upper: i64,
    /// Label of the `OCNT` entry that stores the element count.
    pub count_field: String,
}

impl Repeatable {
    pub fn new(lower: i64, upper: i64, count_field: impl Into<String>) -> Self {
        Self {
            lower,
            upper,
            count_field: count_field.into(),
        }
    }

    pub fn allows(&self, count: usize) -> bool {
        i64::try_from(count).is_ok_and(|count| (self.lower..=self.upper).contains(&count))
    }
}

#[derive(Debug, Clone)]
pub struct TypeField {
    pub name: String,
    pub values: Vec<FieldValue>,
    pub repeatable: Option<Repeatable>,
    /// Declared with `@synthesize`, or added for an unclaimed template label.
    /// Such a field defaults to the same-named variable of the resource scope.
    pub synthesized: bool,
    pub deprecated: Option<String>,
    pub origin: Lexeme,
}

impl TypeField {
    pub fn new(name: impl Into<String>, origin: Lexeme) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            repeatable: None,
            synthesized: false,
            deprecated: None,
            origin,
        }
    }

    /// A single-value field covering `label`.
    pub fn synthesize(label: &str, origin: Lexeme) -> Self {
        let mut field = Self::new(label, origin.clone());
        field.values.push(FieldValue::new(label, origin));
        field.synthesized = true;
        field
    }

    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values.iter().find(|v| v.name == name)
    }

    /// Every template label this field claims, joined parts included.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .flat_map(FieldValue::parts)
            .map(|v| v.name.as_str())
    }

    pub fn is_repeatable(&self) -> bool {
        self.repeatable.is_some()
    }
}
