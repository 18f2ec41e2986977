//! wiki-rag - 위키 기반 RAG 어시스턴트
//!
//! 웹 페이지/파일/텍스트를 문장 단위로 청킹해 임베딩하고,
//! 코사인 유사도 검색 + Gemini 생성으로 출처 인용이 달린
//! 답변을 만드는 RAG 파이프라인입니다.

pub mod cli;
pub mod collector;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;
pub mod rag;
pub mod scraper;
pub mod source;

// Re-exports
pub use completion::{Completion, CompletionOptions, CompletionProvider, GeminiCompletion};
pub use config::{get_data_dir, EngineConfig};
pub use embedding::{create_embedder, Embedder};
pub use error::{Error, Result};
pub use knowledge::{
    default_chunker, l2_normalize, sentence_chunker, Block, Chunk, ChunkConfig, ChunkEntry,
    Chunker, ContentKind, Document, DocumentStore, InMemoryVectorStore, LanceVectorStore,
    NewDocument, RankedChunk, SentenceChunker, StoreStats, VectorStore,
};
pub use rag::{
    build_prompt, extract_keywords, ConversationTurn, IngestReport, PromptSource, RagEngine,
    RagResponse, Role, SourceReference,
};
pub use scraper::{ScrapedPage, WebScraper};
pub use source::{DocumentSource, FileSource, SourceDocument, TextSource, WebPageSource};
