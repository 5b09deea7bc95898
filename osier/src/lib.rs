//! Front-end driver of the osier compiler.
//!
//! Owns every pool, wires the pipeline (source bytes → tokens → AST →
//! opcodes) and surfaces failures as diagnostics plus a boolean compilation
//! result.

#![warn(missing_docs)]
#![deny(unused_must_use)]

pub mod config;
pub mod diag;
pub mod driver;
pub mod lower;
pub mod source;

pub use config::{Config, ConfigError};
pub use diag::{Diagnostic, ErrorSink};
pub use driver::{
    compile_file, create_core_data, release_core_data, run_compilation, CoreData, DriverError,
};
pub use lower::{LowerError, Lowerer};
pub use source::{SourceFileId, SourceLocation, SourceReader};
