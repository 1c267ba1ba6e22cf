//! # Connector Layer
//!
//! External integrations implementing application interfaces:
//! - Tree-sitter chunking
//! - LLM summarization over HTTP (plus a deterministic mock)
//! - Embedding backends (HTTP and mock)
//! - Document stores (OpenSearch-style FTS and in-memory)

pub mod adapter;
pub mod container;

pub use adapter::*;
pub use container::*;
