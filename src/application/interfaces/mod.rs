mod chat_client;
mod chunker_service;
mod document_store;
mod embedding_service;

pub use chat_client::*;
pub use chunker_service::*;
pub use document_store::*;
pub use embedding_service::*;
