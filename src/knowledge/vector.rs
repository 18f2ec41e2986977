//! Vector Store - 벡터 검색 트레이트 및 유틸리티
//!
//! 청크 임베딩 저장소의 공통 인터페이스입니다.
//! 저장 전 벡터는 L2 정규화되어야 하며, 검색 결과 스코어는 코사인 유사도입니다.

use anyhow::Result;
use async_trait::async_trait;

use super::chunker::ContentKind;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct ChunkEntry {
    /// 문서 ID (documents.id)
    pub doc_id: i64,
    /// 청크 인덱스 (0-based)
    pub chunk_index: i32,
    /// 청크 텍스트
    pub chunk_text: String,
    /// 청크 종류
    pub kind: ContentKind,
    /// 청크에 기여한 링크 URL
    pub source_urls: Vec<String>,
    /// L2 정규화된 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 검색 결과 (유사도 순위 포함)
#[derive(Debug, Clone)]
pub struct RankedChunk {
    /// 문서 ID
    pub doc_id: i64,
    /// 청크 인덱스
    pub chunk_index: i32,
    /// 청크 텍스트
    pub chunk_text: String,
    /// 청크 종류
    pub kind: ContentKind,
    /// 청크에 기여한 링크 URL
    pub source_urls: Vec<String>,
    /// 코사인 유사도 (0.0 ~ 1.0)
    pub similarity: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 구현체는 유사도 내림차순 정렬과 임계값 필터링을 보장해야 합니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 벡터 배치 삽입
    async fn insert_batch(&self, entries: &[ChunkEntry]) -> Result<usize>;

    /// 벡터 검색 (상위 limit개, 유사도 threshold 미만은 제외)
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<RankedChunk>>;

    /// doc_id로 벡터 삭제
    async fn delete_by_doc_id(&self, doc_id: i64) -> Result<usize>;

    /// 벡터 개수 조회
    async fn count(&self) -> Result<usize>;

    /// 특정 doc_id의 임베딩 존재 여부
    async fn has_embeddings(&self, doc_id: i64) -> Result<bool>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 빈 벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// L2 정규화
///
/// 벡터를 단위 길이로 정규화합니다. 영벡터는 그대로 반환합니다 (NaN 방지).
/// 이미 정규화된 벡터에 다시 적용해도 결과가 변하지 않습니다.
pub fn l2_normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - -1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_empty_or_mismatched() {
        let a: Vec<f32> = vec![];
        let b: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = vec![3.0, 4.0];
        let normalized = l2_normalize(&v);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.0001);
        assert!((normalized[0] - 0.6).abs() < 0.0001);
        assert!((normalized[1] - 0.8).abs() < 0.0001);
    }

    #[test]
    fn test_l2_normalize_idempotent() {
        let v = vec![3.0, 4.0, 12.0];
        let once = l2_normalize(&v);
        let twice = l2_normalize(&once);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 0.0001);
        }
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        let v = vec![0.0, 0.0, 0.0];
        assert_eq!(l2_normalize(&v), v);
    }
}
