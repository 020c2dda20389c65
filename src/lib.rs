pub mod ann;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod math;
pub mod provider_model2vec;
pub mod scanner;
pub mod searcher;
pub mod storage;
pub mod types;

pub use config::{FolderConfig, IndexOptions, SearchOptions};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use indexer::{clear_folder, get_status, Indexer};
pub use searcher::Searcher;
pub use types::{
    Chunk, CodeSymbol, FileState, IndexPhase, IndexStatus, SearchMatch, SearchResult, SymbolKind,
};
