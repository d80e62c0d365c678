//! A small tree-walking evaluator for default values, symbol values and
//! constructor bodies. Expressions bind variables and call named functions;
//! there is no control flow.

mod builtins;
mod function;
mod scope;
mod statement;
mod token;

pub use function::{Function, FunctionBody, NativeFn, Watch};
pub use scope::{ScopeId, ScopeKind, Scopes};
pub use statement::{BinaryOp, Expression, Statement, UnaryOp};
pub(crate) use statement::read_path;
pub use token::Token;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpreterError {
    #[error("Unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("Unknown function `{0}`")]
    UnknownFunction(String),

    #[error("`{name}` expects {expected} arguments, but {found} were given")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Can not apply `{operator}` to {lhs} and {rhs}")]
    InvalidOperands {
        operator: String,
        lhs: String,
        rhs: String,
    },

    #[error("Can not apply `{operator}` to {operand}")]
    InvalidOperand { operator: String, operand: String },

    #[error("`{function}` expects {expected}, but found {found}")]
    InvalidArgument {
        function: String,
        expected: String,
        found: String,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Integer overflow in `{operator}`")]
    Overflow { operator: String },
}
