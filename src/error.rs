use crate::interpreter::InterpreterError;
use crate::types::TypeError;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum RdlError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lexer(#[from] LexerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Semantic(#[from] SemanticError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("Could not read `{path}`: {message}")]
    #[diagnostic(code(rdl::io))]
    Io { path: String, message: String },

    #[error("Compilation failed with {} errors", errors.len())]
    #[diagnostic(
        code(rdl::failed),
        help("Each construct that failed is listed below; fix them in order.")
    )]
    Failed {
        #[related]
        errors: Vec<RdlError>,
    },
}

impl RdlError {
    /// Lexical and syntactic errors end the current file; everything else only
    /// aborts the construct that raised it.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RdlError::Semantic(_) | RdlError::Encoding(_))
    }

    /// Folds a list of collected diagnostics into a single error.
    #[must_use]
    pub fn from_diagnostics(mut errors: Vec<RdlError>) -> Option<RdlError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(RdlError::Failed { errors }),
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum LexerError {
    #[error("Unrecognised character `{character}`")]
    #[diagnostic(
        code(lexer::unrecognised_character),
        help("This character is not part of the language outside of strings and comments.")
    )]
    UnrecognisedCharacter {
        character: char,
        #[source_code]
        src: NamedSource<String>,
        #[label("not expected here")]
        span: SourceSpan,
    },

    #[error("Unterminated string literal")]
    #[diagnostic(
        code(lexer::unterminated_string),
        help("Close the string with the same quote character that opened it.")
    )]
    UnterminatedString {
        #[source_code]
        src: NamedSource<String>,
        #[label("string starts here")]
        span: SourceSpan,
    },

    #[error("Malformed resource reference")]
    #[diagnostic(
        code(lexer::malformed_reference),
        help("References look like `#128`, `#Type.128`, `#Container.Type.128`, `#auto` or `#?`.")
    )]
    MalformedReference {
        #[source_code]
        src: NamedSource<String>,
        #[label("could not read a reference here")]
        span: SourceSpan,
    },

    #[error("Invalid number `{text}`")]
    #[diagnostic(code(lexer::invalid_number))]
    InvalidNumber {
        text: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("this number does not fit in a signed 64-bit integer")]
        span: SourceSpan,
    },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ParserError {
    #[error("Unexpected lexeme `{found}`")]
    #[diagnostic(
        code(parser::unexpected_lexeme),
        help("The parser found a lexeme it did not expect in this position.")
    )]
    UnexpectedLexeme {
        found: String,
        expected: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("Expected {expected}, but found this")]
        span: SourceSpan,
    },

    #[error("Unexpected end of input")]
    #[diagnostic(
        code(parser::unexpected_eof),
        help("The file ended unexpectedly. The parser expected more lexemes.")
    )]
    UnexpectedEof {
        expected: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("Expected {expected} after this")]
        span: SourceSpan,
    },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum SemanticError {
    #[error("Attempted to duplicate type definition `{name}`")]
    #[diagnostic(
        code(semantic::duplicate_type),
        help("Type names must be unique within a compilation.")
    )]
    DuplicateType {
        name: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("`{name}` is already defined")]
        span: SourceSpan,
    },

    #[error("Unrecognised type `{name}`")]
    #[diagnostic(
        code(semantic::unrecognised_type),
        help("Types must be defined (or imported) before they are used.")
    )]
    UnknownType {
        name: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("no type with this name has been registered")]
        span: SourceSpan,
    },

    #[error("Type `{name}` can not be declared")]
    #[diagnostic(code(semantic::not_declarable))]
    NotDeclarable {
        name: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("this type is marked @no_declaration")]
        span: SourceSpan,
    },

    #[error("{reason}")]
    #[diagnostic(code(semantic::type_definition))]
    Type {
        reason: TypeError,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("{reason}")]
    #[diagnostic(code(semantic::evaluation))]
    Evaluation {
        reason: InterpreterError,
        #[source_code]
        src: NamedSource<String>,
        #[label("while evaluating this")]
        span: SourceSpan,
    },

    #[error("No constructor of `{type_name}` accepts {found} arguments")]
    #[diagnostic(
        code(semantic::constructor_arity),
        help("{expected}")
    )]
    ConstructorArity {
        type_name: String,
        found: usize,
        expected: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("resource arguments")]
        span: SourceSpan,
    },

    #[error("Field `{field}` takes {expected} values, but {found} were given")]
    #[diagnostic(code(semantic::value_count))]
    ValueCount {
        field: String,
        expected: usize,
        found: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("Resource {resource} has already been declared")]
    #[diagnostic(
        code(semantic::duplicate_resource),
        help("Use `override` to replace an existing resource.")
    )]
    DuplicateResource {
        resource: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("second declaration")]
        span: SourceSpan,
    },

    #[error("Resource {resource} does not exist")]
    #[diagnostic(code(semantic::unknown_resource))]
    UnknownResource {
        resource: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("referenced here")]
        span: SourceSpan,
    },

    #[error("Invalid resource id: {reason}")]
    #[diagnostic(code(semantic::invalid_resource_id))]
    InvalidResourceId {
        reason: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("Decorator `@{name}` is not attached to anything")]
    #[diagnostic(
        code(semantic::dangling_decorator),
        help("Decorators apply to the construct that follows them; move it before a type, field, template or resource.")
    )]
    DanglingDecorator {
        name: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("nothing follows this decorator")]
        span: SourceSpan,
    },

    #[error("Circular import detected: {cycle}")]
    #[diagnostic(
        code(semantic::circular_import),
        help("Break the cycle by moving shared definitions into a separate file.")
    )]
    CircularImport {
        cycle: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("this import closes the cycle")]
        span: SourceSpan,
    },

    #[error("Could not find import `{path}`")]
    #[diagnostic(
        code(semantic::import_not_found),
        help("Imports resolve relative to the importing file, then through the configured search paths.")
    )]
    ImportNotFound {
        path: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("imported here")]
        span: SourceSpan,
    },

    #[error("Module `{name}` is already defined")]
    #[diagnostic(code(semantic::duplicate_module))]
    DuplicateModule {
        name: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("redefined here")]
        span: SourceSpan,
    },

    #[error("This file requires the `{required}` format, but `{active}` is active")]
    #[diagnostic(code(semantic::format_mismatch))]
    FormatMismatch {
        required: String,
        active: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("format requirement")]
        span: SourceSpan,
    },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum EncodingError {
    #[error("Field `{field}` of {resource} expects {expected}, but found {found}")]
    #[diagnostic(
        code(encoding::type_mismatch),
        help("The value's kind must match the field's binary type.")
    )]
    TypeMismatch {
        resource: String,
        field: String,
        expected: String,
        found: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("Value {value} of field `{field}` in {resource} does not fit in {binary_type}")]
    #[diagnostic(code(encoding::out_of_range))]
    ValueOutOfRange {
        resource: String,
        field: String,
        value: String,
        binary_type: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("String in field `{field}` of {resource} is {length} bytes, the limit is {limit}")]
    #[diagnostic(code(encoding::string_too_long))]
    StringTooLong {
        resource: String,
        field: String,
        length: usize,
        limit: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("Field `{field}` of {resource} has {count} entries, expected between {lower} and {upper}")]
    #[diagnostic(code(encoding::repeat_count))]
    RepeatCount {
        resource: String,
        field: String,
        count: usize,
        lower: i64,
        upper: i64,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("Field `{field}` of {resource} is not valid hexadecimal data")]
    #[diagnostic(code(encoding::invalid_hex))]
    InvalidHexData {
        resource: String,
        field: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared here")]
        span: SourceSpan,
    },

    #[error("Container name `{container}` is longer than 255 bytes")]
    #[diagnostic(code(encoding::container_too_long))]
    ContainerTooLong { container: String },

    #[error("Resource data ended while reading field `{field}`")]
    #[diagnostic(code(encoding::truncated))]
    Truncated { field: String },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ArchiveError {
    #[error("Resource '{type_code}' #{id} can not be stored in the {format} format")]
    #[diagnostic(
        code(archive::id_out_of_range),
        help("The classic and rez formats only support ids between -32768 and 32767.")
    )]
    IdOutOfRange {
        type_code: String,
        id: i64,
        format: String,
    },

    #[error("Resource name `{name}` is longer than {limit} bytes")]
    #[diagnostic(code(archive::name_too_long))]
    NameTooLong { name: String, limit: usize },

    #[error("Attribute text `{text}` is longer than {limit} bytes")]
    #[diagnostic(code(archive::attribute_too_long))]
    AttributeTooLong { text: String, limit: usize },

    #[error("Type code `{code}` is not exactly four bytes")]
    #[diagnostic(code(archive::invalid_type_code))]
    InvalidTypeCode { code: String },

    #[error("Resource '{type_code}' #{id} was added twice")]
    #[diagnostic(code(archive::duplicate_entry))]
    DuplicateEntry { type_code: String, id: i64 },

    #[error("Resource data exceeds the {limit} byte limit of the {format} format")]
    #[diagnostic(code(archive::data_too_large))]
    DataTooLarge { format: String, limit: usize },

    #[error("Could not write `{path}`: {message}")]
    #[diagnostic(
        code(archive::io),
        help("The destination was left untouched.")
    )]
    Io { path: String, message: String },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ConfigError {
    #[error("Invalid compile options: {message}")]
    #[diagnostic(code(config::parse))]
    Parse { message: String },

    #[error("Could not read compile options from `{path}`: {message}")]
    #[diagnostic(code(config::io))]
    Io { path: String, message: String },

    #[error("Unknown archive format `{name}`")]
    #[diagnostic(
        code(config::unknown_format),
        help("Supported formats are `extended`, `classic` and `rez`.")
    )]
    UnknownFormat { name: String },
}
