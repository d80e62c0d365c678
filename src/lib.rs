pub mod api;
pub mod archive;
pub mod config;
pub mod context;
pub mod encoder;
pub mod error;
pub mod instance;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod reference;
mod serialization;
pub mod stream;
pub mod types;
pub mod utils;

pub use api::{compile, compile_file, compile_with_options, Compilation};
pub use config::CompileOptions;
pub use error::RdlError;
pub use serialization::{Manifest, ResourceSummary, TypeSummary};
