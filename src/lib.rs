//! stubsmith - Python stubs from C++ embedding registrations.
//!
//! C++ code exposes objects to Python through the `pyembed` registration
//! calls (`declare_module`, `declare_class`, `add_method`, ...). stubsmith
//! reads the compiler's AST of each translation unit, recognizes those
//! calls and reconstructs what they expose, then writes `.pyi` stubs with
//! resolved types, overloads and documentation.
//!
//! # Architecture
//!
//! - `ast`: arena-owned AST and the clang JSON provider
//! - `extract`: registration idiom matching, one fragment per file
//! - `model`: the binding model, fragment merge and name fix-up
//! - `resolve`: C++ type to Python type rendering
//! - `emit`: stub text and the post-formatter
//! - `pipeline`: worker pool, fragment cache, artifacts
//! - `config`, `cli`, `report`, `logging`: the command-line tool

pub mod ast;
pub mod cli;
pub mod config;
pub mod depfile;
pub mod emit;
pub mod error;
pub mod extract;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod resolve;

pub use ast::{AstProvider, Cursor, CursorKind, Location, ParsedUnit, TranslationUnit};
pub use config::Config;
pub use error::{Error, RunFailure};
pub use model::{BindingModel, TypeDesc};
pub use pipeline::{RunOptions, RunSummary, Runner};
pub use resolve::Resolver;

/// Version recorded in artifacts and cache entries.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
