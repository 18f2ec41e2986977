//! In-Memory Vector Store - 정확한 코사인 검색
//!
//! 전체 엔트리를 선형 스캔하는 참조 구현입니다.
//! 소규모 데이터나 테스트에서 LanceDB 대신 사용합니다.

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::vector::{cosine_similarity, ChunkEntry, RankedChunk, VectorStore};

/// 메모리 벡터 저장소
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<ChunkEntry>>,
}

impl InMemoryVectorStore {
    /// 빈 저장소 생성
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert_batch(&self, entries: &[ChunkEntry]) -> Result<usize> {
        let mut guard = self.entries.write().await;
        guard.extend_from_slice(entries);
        Ok(entries.len())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<RankedChunk>> {
        let guard = self.entries.read().await;

        let mut scored: Vec<RankedChunk> = guard
            .iter()
            .map(|entry| RankedChunk {
                doc_id: entry.doc_id,
                chunk_index: entry.chunk_index,
                chunk_text: entry.chunk_text.clone(),
                kind: entry.kind,
                source_urls: entry.source_urls.clone(),
                similarity: cosine_similarity(query_embedding, &entry.embedding),
            })
            .filter(|ranked| ranked.similarity >= threshold)
            .collect();

        // 동점은 삽입 순서 유지 (stable sort)
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        scored.truncate(limit);

        Ok(scored)
    }

    async fn delete_by_doc_id(&self, doc_id: i64) -> Result<usize> {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|entry| entry.doc_id != doc_id);
        Ok(before - guard.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn has_embeddings(&self, doc_id: i64) -> Result<bool> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .any(|entry| entry.doc_id == doc_id))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::ContentKind;

    fn entry(doc_id: i64, chunk_index: i32, embedding: Vec<f32>) -> ChunkEntry {
        ChunkEntry {
            doc_id,
            chunk_index,
            chunk_text: format!("chunk {} of doc {}", chunk_index, doc_id),
            kind: ContentKind::Composite,
            source_urls: vec![],
            embedding,
        }
    }

    #[tokio::test]
    async fn test_insert_and_count() {
        let store = InMemoryVectorStore::new();
        assert_eq!(store.count().await.unwrap(), 0);

        store
            .insert_batch(&[entry(1, 0, vec![1.0, 0.0]), entry(1, 1, vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(store.has_embeddings(1).await.unwrap());
        assert!(!store.has_embeddings(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let store = InMemoryVectorStore::new();
        store
            .insert_batch(&[
                entry(1, 0, vec![0.0, 1.0]),
                entry(2, 0, vec![1.0, 0.0]),
                entry(3, 0, vec![0.7071, 0.7071]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0], 10, 0.0).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].doc_id, 2);
        assert_eq!(results[1].doc_id, 3);
        assert!((results[0].similarity - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_search_applies_threshold_and_limit() {
        let store = InMemoryVectorStore::new();
        store
            .insert_batch(&[
                entry(1, 0, vec![1.0, 0.0]),
                entry(2, 0, vec![0.9, 0.4359]),
                entry(3, 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        // 직교 벡터(score 0)는 threshold 0.5에서 제외됨
        let results = store.search(&[1.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(results.len(), 2);

        let results = store.search(&[1.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, 1);
    }

    #[tokio::test]
    async fn test_delete_by_doc_id() {
        let store = InMemoryVectorStore::new();
        store
            .insert_batch(&[
                entry(1, 0, vec![1.0, 0.0]),
                entry(1, 1, vec![0.0, 1.0]),
                entry(2, 0, vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let deleted = store.delete_by_doc_id(1).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(!store.has_embeddings(1).await.unwrap());
    }
}
