//! The resource type model: binary templates, fields, constructors and the
//! validation that keeps them consistent. Nothing here parses source text.

mod binary_template;
mod decorator;
mod definition;
mod descriptor;
mod field;

pub use binary_template::{BinaryField, BinaryTemplate, BinaryType, ByteOrder, ListGroup};
pub use decorator::{Decorator, DecoratorState, Decorators};
pub use definition::{Constructor, FieldTarget, ResolvedPath, TypeDefinition};
pub use descriptor::TypeDescriptor;
pub use field::{FieldValue, Repeatable, Symbol, TypeField};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Template label `{0}` is used more than once")]
    DuplicateLabel(String),

    #[error("Type code `{0}` must be exactly four bytes")]
    InvalidTypeCode(String),

    #[error("Unknown binary type `{0}`")]
    UnknownBinaryType(String),

    #[error("`{0}` is not a label of the binary template")]
    UnknownBinaryField(String),

    #[error("Field `{0}` is already defined")]
    DuplicateField(String),

    #[error("Field `{0}` lists no values and is not `@synthesize`d")]
    MissingValues(String),

    #[error("Unknown field `{0}`")]
    UnknownField(String),

    #[error("Template label `{label}` already belongs to field `{field}`")]
    LabelClaimed { label: String, field: String },

    #[error("`{0}` structures a list and can not hold a value")]
    ListMarkerValue(String),

    #[error("Value `{value}` is declared as {descriptor}, which can not be stored as {binary_type}")]
    IncompatibleType {
        value: String,
        descriptor: String,
        binary_type: String,
    },

    #[error("Malformed list: {0}")]
    ListGroup(String),

    #[error("Repeatable field `{field}` needs `{count}` to be an OCNT entry that opens a list")]
    MissingCountField { field: String, count: String },

    #[error("Repeatable field `{field}` has invalid bounds {lower}..{upper}")]
    InvalidRepeatBounds { field: String, lower: i64, upper: i64 },

    #[error("Value `{value}` of repeatable field `{field}` is not inside its list")]
    ValueOutsideList { field: String, value: String },

    #[error("Value `{value}` of field `{field}` is inside a list, so the field must be repeatable")]
    ValueInsideList { field: String, value: String },

    #[error("A constructor taking {0} arguments is already defined")]
    DuplicateConstructor(usize),

    #[error("The binary template is already defined")]
    DuplicateTemplate,

    #[error("Fields can only be added after the binary template")]
    MissingTemplate,
}
