//! Core domain types for Sidekick.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The worker proxy, the config loader and the binary all speak in these types.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod ids;
mod request;
mod results;
mod settings;

pub use ids::RequestId;
pub use request::{Position, Request, RequestError, RequestKind, SourceText};
pub use results::{
    CompletionItem, CompletionItemKind, Definition, HoverItem, Parameter, Signature, Span, Symbol,
    SymbolKind, Usage, WorkerResult,
};
pub use settings::{MemoryLimit, SettingsError, WorkerSettings};
