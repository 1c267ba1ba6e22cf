//! # CodeSmriti
//!
//! A persistent, multi-tenant semantic index over source repositories.
//! Repositories are ingested into a hierarchy of summarized documents
//! (repo → module → file → symbol), each embedded as a unit vector, and
//! retrieved through hybrid keyword-pre-filtered kNN search with on-demand
//! source fetching.
//!
//! ## Architecture
//!
//! The crate is organized following Domain-Driven Design principles:
//!
//! - `domain`: Document hierarchy, chunks, jobs, search types, config, errors
//! - `application`: Service interfaces, pipeline stages, orchestrator, use cases
//! - `connector`: External integrations (Tree-sitter, LLM, embeddings, stores)

pub mod application;
pub mod connector;
pub mod domain;

// Re-export commonly used types
pub use application::*;
pub use connector::*;
pub use domain::*;
