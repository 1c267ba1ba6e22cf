mod delete_repository;
mod explore_structure;
mod fetch_source;
mod ingest_repository;
mod list_repositories;
mod search_code;

pub use delete_repository::*;
pub use explore_structure::*;
pub use fetch_source::*;
pub use ingest_repository::*;
pub use list_repositories::*;
pub use search_code::*;
