use crate::lexer::Lexeme;
use std::collections::BTreeSet;

/// `@name` or `@name(arg, ...)` attached to the construct that follows it.
#[derive(Debug, Clone)]
pub struct Decorator {
    pub name: String,
    pub arguments: Vec<String>,
    pub origin: Lexeme,
}

impl Decorator {
    pub fn new(name: impl Into<String>, arguments: Vec<String>, origin: Lexeme) -> Self {
        Self {
            name: name.into(),
            arguments,
            origin,
        }
    }

    pub fn argument(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).map(String::as_str)
    }

    /// For `@condition`: every plain argument must be defined and every
    /// `!`-prefixed one must not be.
    pub fn condition_holds(&self, definitions: &BTreeSet<String>) -> bool {
        self.arguments.iter().all(|argument| match argument.strip_prefix('!') {
            Some(name) => !definitions.contains(name.trim()),
            None => definitions.contains(argument.trim()),
        })
    }
}

/// Decorators collected ahead of the construct they apply to.
#[derive(Debug, Clone, Default)]
pub struct Decorators(Vec<Decorator>);

impl Decorators {
    pub fn new(decorators: Vec<Decorator>) -> Self {
        Self(decorators)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Decorator> {
        self.0.iter().find(|d| d.name == name)
    }

    pub fn argument(&self, name: &str, index: usize) -> Option<&str> {
        self.get(name).and_then(|d| d.argument(index))
    }

    /// `false` if any `@condition` on the construct fails.
    pub fn conditions_hold(&self, definitions: &BTreeSet<String>) -> bool {
        self.0
            .iter()
            .filter(|d| d.name == "condition")
            .all(|d| d.condition_holds(definitions))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Decorator> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Pending decorators between the point they are read and the construct
/// that consumes them.
#[derive(Debug, Default)]
pub enum DecoratorState {
    #[default]
    Idle,
    Accumulating(Vec<Decorator>),
}

impl DecoratorState {
    pub fn push(&mut self, decorator: Decorator) {
        match self {
            DecoratorState::Idle => *self = DecoratorState::Accumulating(vec![decorator]),
            DecoratorState::Accumulating(pending) => pending.push(decorator),
        }
    }

    /// Hands the pending decorators to a construct and returns to idle.
    pub fn take(&mut self) -> Decorators {
        match std::mem::take(self) {
            DecoratorState::Idle => Decorators::default(),
            DecoratorState::Accumulating(pending) => Decorators::new(pending),
        }
    }

    /// The first decorator still waiting for a construct.
    pub fn pending(&self) -> Option<&Decorator> {
        match self {
            DecoratorState::Idle => None,
            DecoratorState::Accumulating(pending) => pending.first(),
        }
    }
}
