//! Context assembly for model calls
//!
//! Combines:
//! - Thread history (trimmed to the injection window)
//! - Business context supplied by the caller
//! - The current query

mod assembler;
pub mod supplier;

pub use assembler::{ContextAssembler, ContextConfig, DEFAULT_INJECTION_WINDOW};
pub use supplier::{render_business_context, summarize_supplier_data};
