//! RAG 모듈 - 인제스트/질의 파이프라인
//!
//! 문서 수집 → 청킹 → 임베딩 → 벡터 저장이 인제스트 경로,
//! 질의 임베딩 → 검색 → 프롬프트 조립 → 생성 → 출처 기록이 질의 경로입니다.
//! 엔진은 모든 협력자를 생성자 주입으로 받습니다.

pub mod prompt;
pub mod sources;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use crate::completion::{CompletionOptions, CompletionProvider, GeminiCompletion};
use crate::config::EngineConfig;
use crate::embedding::{create_embedder, Embedder};
use crate::error::Error;
use crate::knowledge::{
    l2_normalize, sentence_chunker, Block, ChunkConfig, ChunkEntry, Chunker, Document,
    DocumentStore, LanceVectorStore, NewDocument, RankedChunk, SentenceChunker, VectorStore,
};
use crate::source::DocumentSource;

pub use prompt::{build_prompt, extract_keywords, ConversationTurn, PromptSource, Role};
pub use sources::{map_source_references, parse_reference_id, SourceReference};

// ============================================================================
// Types
// ============================================================================

/// 질의 응답 결과
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    /// 생성된 답변
    pub response: String,
    /// 답변에 인용된 출처 목록 (순위 순)
    pub source_references: Vec<SourceReference>,
    /// 원본 질의
    pub query: String,
    /// 응답 추적 ID
    pub response_id: String,
    /// 처리 시각
    pub processed_at: DateTime<Utc>,
}

/// 인제스트 결과 보고
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub success: bool,
    pub document_id: Option<i64>,
    /// 생성된 청크 수
    pub chunks_processed: usize,
    /// 실제로 임베딩되어 저장된 청크 수
    pub embedding_count: usize,
    pub error: Option<String>,
}

impl IngestReport {
    fn failure(document_id: Option<i64>, chunks: usize, error: impl Into<String>) -> Self {
        Self {
            success: false,
            document_id,
            chunks_processed: chunks,
            embedding_count: 0,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// RagEngine
// ============================================================================

/// RAG 엔진
///
/// 협력자 (문서 저장소, 벡터 저장소, 임베더, 생성 프로바이더, 청커)를
/// 모두 주입받습니다. 테스트에서는 목 구현으로 대체합니다.
pub struct RagEngine {
    store: DocumentStore,
    vector: Box<dyn VectorStore>,
    embedder: Box<dyn Embedder>,
    completion: Box<dyn CompletionProvider>,
    chunker: Box<dyn Chunker>,
    config: EngineConfig,
}

impl RagEngine {
    /// 협력자를 직접 주입하여 생성
    pub fn new(
        store: DocumentStore,
        vector: Box<dyn VectorStore>,
        embedder: Box<dyn Embedder>,
        completion: Box<dyn CompletionProvider>,
        chunker: Box<dyn Chunker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            vector,
            embedder,
            completion,
            chunker,
            config,
        }
    }

    /// 설정으로 기본 협력자를 구성하여 생성
    ///
    /// 임베더/생성 API 키가 없으면 파이프라인 시작 전에 설정 에러로 실패합니다.
    pub async fn open_with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let embedder = create_embedder()?;
        let completion: Box<dyn CompletionProvider> = Box::new(GeminiCompletion::from_env()?);

        let store = DocumentStore::open_in_dir(&config.data_dir)?;
        let vector: Box<dyn VectorStore> = Box::new(
            LanceVectorStore::open(&config.data_dir.join("vectors.lance"), embedder.dimension())
                .await?,
        );
        let chunker = sentence_chunker(config.chunking.clone());

        Ok(Self::new(store, vector, embedder, completion, chunker, config))
    }

    /// 환경변수 설정으로 생성
    pub async fn open_default() -> Result<Self> {
        Self::open_with_config(EngineConfig::from_env()?).await
    }

    /// 문서 저장소 접근 (CLI 목록/삭제/통계용)
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// 벡터 저장소 접근
    pub fn vector(&self) -> &dyn VectorStore {
        self.vector.as_ref()
    }

    /// 엔진 설정
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// 블록 시퀀스 인제스트
    ///
    /// 문서 행 upsert → 기존 벡터 삭제 → 청킹 → 배치 임베딩 → 벡터 삽입.
    /// 청크 단위 임베딩 실패는 건너뛰고, 전부 실패하면 보고서로 알립니다.
    pub async fn ingest_blocks(&self, doc: NewDocument, blocks: &[Block]) -> IngestReport {
        self.ingest_blocks_with(doc, blocks, self.chunker.as_ref())
            .await
    }

    async fn ingest_blocks_with(
        &self,
        doc: NewDocument,
        blocks: &[Block],
        chunker: &dyn Chunker,
    ) -> IngestReport {
        let url = doc.url.clone();

        let doc_id = match self.store.add_document(doc) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Failed to store document {}: {}", url, e);
                return IngestReport::failure(None, 0, e.to_string());
            }
        };

        // 재인제스트 시 이전 벡터 제거 (URL 기준 upsert)
        if let Err(e) = self.vector.delete_by_doc_id(doc_id).await {
            tracing::error!("Failed to clear stale vectors for doc {}: {}", doc_id, e);
            return IngestReport::failure(Some(doc_id), 0, e.to_string());
        }

        let chunks = chunker.chunk_blocks(blocks);
        if chunks.is_empty() {
            return IngestReport::failure(Some(doc_id), 0, "No chunks produced from input");
        }

        tracing::info!("Ingesting {}: {} chunks", url, chunks.len());

        // 배치 단위 임베딩: 배치 안에서는 동시에, 배치 간에는 순차로
        let mut entries: Vec<ChunkEntry> = Vec::with_capacity(chunks.len());
        let indexed: Vec<(usize, &crate::knowledge::Chunk)> = chunks.iter().enumerate().collect();

        for batch in indexed.chunks(self.config.embed_batch_size) {
            let futures = batch
                .iter()
                .map(|&(index, chunk)| async move {
                    (index, self.embedder.embed(&chunk.text).await)
                })
                .collect::<Vec<_>>();

            for (index, result) in join_all(futures).await {
                match result {
                    Ok(embedding) => {
                        let chunk = &chunks[index];
                        entries.push(ChunkEntry {
                            doc_id,
                            chunk_index: index as i32,
                            chunk_text: chunk.text.clone(),
                            kind: chunk.kind,
                            source_urls: chunk.source_urls.clone(),
                            embedding: l2_normalize(&embedding),
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Embedding failed for chunk {} of doc {}: {}", index, doc_id, e);
                    }
                }
            }
        }

        if entries.is_empty() {
            return IngestReport::failure(
                Some(doc_id),
                chunks.len(),
                "Embedding generation failed for all chunks",
            );
        }

        let inserted = match self.vector.insert_batch(&entries).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("Failed to insert vectors for doc {}: {}", doc_id, e);
                return IngestReport::failure(Some(doc_id), chunks.len(), e.to_string());
            }
        };

        tracing::info!(
            "Ingested doc {} ({}/{} chunks embedded)",
            doc_id,
            inserted,
            chunks.len()
        );

        IngestReport {
            success: true,
            document_id: Some(doc_id),
            chunks_processed: chunks.len(),
            embedding_count: inserted,
            error: None,
        }
    }

    /// 일반 텍스트 인제스트
    pub async fn ingest_text(
        &self,
        url: &str,
        title: Option<String>,
        origin: &str,
        text: &str,
        tag: Option<String>,
    ) -> IngestReport {
        let doc = NewDocument {
            url: url.to_string(),
            title,
            origin: origin.to_string(),
            page_path: None,
            content: text.to_string(),
            tag,
        };
        self.ingest_blocks(doc, &[Block::text(text)]).await
    }

    /// 문서 소스 전체 인제스트 (소스 문서당 보고서 하나)
    ///
    /// PDF 페이지 문서 (`#page=` URL)는 PDF 프리셋 청킹을 적용합니다.
    pub async fn ingest_source(
        &self,
        source: &dyn DocumentSource,
        tag: Option<String>,
    ) -> Result<Vec<IngestReport>> {
        let documents = source.fetch().await?;
        let origin = source.origin().to_string();
        let pdf_chunker = SentenceChunker::new(ChunkConfig::for_pdf());

        let mut reports = Vec::with_capacity(documents.len());
        for doc in documents {
            let content = doc
                .blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            let is_pdf_page = doc.url.contains("#page=");

            let new_doc = NewDocument {
                url: doc.url,
                title: doc.title,
                origin: origin.clone(),
                page_path: doc.page_path,
                content,
                tag: tag.clone(),
            };

            let report = if is_pdf_page {
                self.ingest_blocks_with(new_doc, &doc.blocks, &pdf_chunker)
                    .await
            } else {
                self.ingest_blocks(new_doc, &doc.blocks).await
            };
            reports.push(report);
        }

        Ok(reports)
    }

    // ========================================================================
    // Query
    // ========================================================================

    /// RAG 질의
    ///
    /// 답변과 함께 인용 출처 목록을 반환하고, 둘 다 저장소에 기록합니다.
    /// 질의 경로의 에러는 삼키지 않고 그대로 전파합니다.
    pub async fn query(&self, query: &str, history: &[ConversationTurn]) -> Result<RagResponse> {
        let response_id = format!("resp_{}", uuid::Uuid::new_v4().simple());
        tracing::info!("Processing RAG query: {} ({})", query, response_id);

        let keywords = extract_keywords(query);
        tracing::info!("Extracted keywords: {}", keywords.join(", "));

        let ranked = self.retrieve(query, self.config.top_k).await?;

        // 출처 문서 메타데이터 조인 (없으면 None 유지)
        let documents: Vec<Option<Document>> = ranked
            .iter()
            .map(|chunk| self.store.get_document(chunk.doc_id).unwrap_or(None))
            .collect();

        let prompt_sources: Vec<PromptSource> = ranked
            .iter()
            .zip(documents.iter())
            .map(|(chunk, doc)| PromptSource {
                origin: doc
                    .as_ref()
                    .map(|d| d.origin.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
                id: chunk.doc_id.to_string(),
                text: chunk.chunk_text.clone(),
            })
            .collect();

        let prompt = build_prompt(query, &prompt_sources, history);
        tracing::debug!("Prompt length: {} chars", prompt.chars().count());

        let completion = self
            .completion
            .complete(&prompt, &CompletionOptions::default())
            .await?;

        let source_references = map_source_references(&response_id, &ranked, &documents);

        self.store
            .save_response(&response_id, query, &completion.text, &source_references)
            .context("Failed to persist response")?;

        Ok(RagResponse {
            response: completion.text,
            source_references,
            query: query.to_string(),
            response_id,
            processed_at: Utc::now(),
        })
    }

    /// 검색만 수행 (생성 없이 순위 청크 반환)
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<RankedChunk>> {
        self.retrieve(query, limit).await
    }

    /// 질의 임베딩 + 정규화 + 벡터 검색
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RankedChunk>> {
        let embedding = self.embedder.embed(query).await?;
        let normalized = l2_normalize(&embedding);
        self.vector
            .search(&normalized, limit, self.config.similarity_threshold)
            .await
    }

    // ========================================================================
    // Source Reference Lookup
    // ========================================================================

    /// 참조 ID로 출처 조회
    pub fn get_source_reference(&self, reference_id: &str) -> Result<SourceReference> {
        tracing::debug!("Fetching source reference: {}", reference_id);

        let (response_id, index) = parse_reference_id(reference_id)?;

        self.store
            .get_source_reference(&response_id, index)?
            .ok_or_else(|| Error::NotFound(format!("source reference: {}", reference_id)).into())
    }

    /// 응답 ID로 모든 출처 조회
    pub fn sources_for_response(&self, response_id: &str) -> Result<Vec<SourceReference>> {
        tracing::debug!("Fetching sources for response: {}", response_id);

        if !self.store.has_response(response_id)? {
            return Err(Error::NotFound(format!("response: {}", response_id)).into());
        }

        Ok(self.store.sources_for_response(response_id)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
