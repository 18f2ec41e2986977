//! Knowledge 모듈 - 문서/벡터 지식 저장소
//!
//! - Chunker: 문장 단위 텍스트 분할
//! - SQLite: 문서 원문 + 응답/출처 참조 저장
//! - LanceDB: 벡터 검색 (ANN)
//! - InMemory: 선형 스캔 참조 구현

mod chunker;
mod lance;
mod memory;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    default_chunker, sentence_chunker, split_sentences, Block, Chunk, ChunkConfig, Chunker,
    ContentKind, SentenceChunker,
};
pub use lance::LanceVectorStore;
pub use memory::InMemoryVectorStore;
pub use store::{Document, DocumentStore, NewDocument, StoredResponse, StoreStats};
pub use vector::{cosine_similarity, l2_normalize, ChunkEntry, RankedChunk, VectorStore};
