mod http_chat_client;
mod http_embedding;
mod memory_store;
mod mock_chat_client;
mod mock_embedding;
mod opensearch_store;
mod treesitter_chunker;

pub use http_chat_client::*;
pub use http_embedding::*;
pub use memory_store::*;
pub use mock_chat_client::*;
pub use mock_embedding::*;
pub use opensearch_store::*;
pub use treesitter_chunker::*;
