//! LanceDB Vector Store - 고성능 벡터 검색
//!
//! ANN (Approximate Nearest Neighbor) 검색으로 대용량 벡터에서도 빠른 검색을 지원합니다.
//! ref: https://lancedb.github.io/lancedb/
//!
//! 벡터는 저장 전 L2 정규화되어 있으므로 `_distance` (제곱 L2 거리)를
//! `1 - d/2`로 코사인 유사도에 정확히 되돌릴 수 있습니다.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::chunker::ContentKind;
use super::vector::{ChunkEntry, RankedChunk, VectorStore};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// Apache Arrow 기반 columnar 저장소입니다. 임베딩 차원은 사용하는
/// 임베더에 따라 달라지므로 (384 또는 1536) 열 때 지정합니다.
pub struct LanceVectorStore {
    db: Connection,
    dimension: i32,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 벡터 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            dimension: dimension as i32,
        })
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("doc_id", DataType::Int64, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("source_urls", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[ChunkEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        for entry in entries {
            if entry.embedding.len() != self.dimension as usize {
                anyhow::bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    entry.embedding.len()
                );
            }
        }

        let doc_ids: Vec<i64> = entries.iter().map(|e| e.doc_id).collect();
        let chunk_indices: Vec<i32> = entries.iter().map(|e| e.chunk_index).collect();
        let chunk_texts: Vec<&str> = entries.iter().map(|e| e.chunk_text.as_str()).collect();
        let kinds: Vec<&str> = entries.iter().map(|e| e.kind.as_str()).collect();

        // URL 목록은 JSON 문자열로 직렬화
        let source_urls: Vec<String> = entries
            .iter()
            .map(|e| serde_json::to_string(&e.source_urls).unwrap_or_else(|_| "[]".to_string()))
            .collect();

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(Int64Array::from(doc_ids)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(StringArray::from(chunk_texts)),
                Arc::new(StringArray::from(kinds)),
                Arc::new(StringArray::from(source_urls)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }
}

/// 제곱 L2 거리를 코사인 유사도로 변환
///
/// 단위 벡터 u, v에 대해 |u - v|^2 = 2 - 2*cos 이므로 cos = 1 - d/2.
/// 부동소수 오차로 범위를 벗어나는 값은 [0, 1]로 클램프합니다.
fn distance_to_similarity(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn insert_batch(&self, entries: &[ChunkEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            let table = self
                .db
                .open_table(TABLE_NAME)
                .execute()
                .await
                .context("Failed to open table")?;

            table
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        Ok(entries.len())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<RankedChunk>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for search")?;

        let results = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let mut ranked = Vec::new();

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        for batch in batches {
            let doc_ids = batch
                .column_by_name("doc_id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing doc_id column"))?;

            let chunk_indices = batch
                .column_by_name("chunk_index")
                .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_index column"))?;

            let chunk_texts = batch
                .column_by_name("chunk_text")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_text column"))?;

            let kinds = batch
                .column_by_name("kind")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing kind column"))?;

            let source_urls = batch
                .column_by_name("source_urls")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing source_urls column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let similarity = distance_to_similarity(distances.value(i));
                if similarity < threshold {
                    continue;
                }

                let urls: Vec<String> =
                    serde_json::from_str(source_urls.value(i)).unwrap_or_default();

                ranked.push(RankedChunk {
                    doc_id: doc_ids.value(i),
                    chunk_index: chunk_indices.value(i),
                    chunk_text: chunk_texts.value(i).to_string(),
                    kind: ContentKind::parse(kinds.value(i)),
                    source_urls: urls,
                    similarity,
                });
            }
        }

        Ok(ranked)
    }

    async fn delete_by_doc_id(&self, doc_id: i64) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for delete")?;

        let before_count = self.count().await?;

        // doc_id는 i64 타입으로 검증됨 - SQL 인젝션 방지
        let filter = format!("doc_id = {}", doc_id);
        table
            .delete(&filter)
            .await
            .context("Failed to delete vectors")?;

        let after_count = self.count().await?;
        Ok(before_count.saturating_sub(after_count))
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for count")?;

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }

    async fn has_embeddings(&self, doc_id: i64) -> Result<bool> {
        if !self.table_exists().await {
            return Ok(false);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table")?;

        // doc_id는 i64 타입으로 검증됨 - SQL 인젝션 방지
        let filter = format!("doc_id = {}", doc_id);
        let count = table
            .count_rows(Some(filter))
            .await
            .context("Failed to count rows for doc_id")?;

        Ok(count > 0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::vector::l2_normalize;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn test_entry(doc_id: i64, chunk_index: i32, seed: f32) -> ChunkEntry {
        let mut raw = vec![0.1; DIM];
        raw[0] = seed;
        ChunkEntry {
            doc_id,
            chunk_index,
            chunk_text: format!("Test chunk {} for doc {}", chunk_index, doc_id),
            kind: ContentKind::Composite,
            source_urls: vec!["https://wiki.example/page".to_string()],
            embedding: l2_normalize(&raw),
        }
    }

    #[test]
    fn test_distance_to_similarity() {
        // 동일 벡터: 거리 0 -> 유사도 1
        assert!((distance_to_similarity(0.0) - 1.0).abs() < 0.0001);
        // 직교 단위 벡터: 거리 2 -> 유사도 0
        assert!((distance_to_similarity(2.0) - 0.0).abs() < 0.0001);
        // 반대 방향: 거리 4 -> 클램프되어 0
        assert_eq!(distance_to_similarity(4.0), 0.0);
        // 오차로 인한 음수 거리도 1로 클램프
        assert_eq!(distance_to_similarity(-0.001), 1.0);
    }

    #[tokio::test]
    async fn test_lance_store_basic() {
        let temp_dir = TempDir::new().unwrap();
        let lance_path = temp_dir.path().join("test.lance");

        let store = LanceVectorStore::open(&lance_path, DIM).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        let entries = vec![test_entry(1, 0, 0.5), test_entry(1, 1, 0.9)];
        let inserted = store.insert_batch(&entries).await.unwrap();
        assert_eq!(inserted, 2);

        assert_eq!(store.count().await.unwrap(), 2);
        assert!(store.has_embeddings(1).await.unwrap());
        assert!(!store.has_embeddings(999).await.unwrap());
    }

    #[tokio::test]
    async fn test_lance_rejects_dimension_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let lance_path = temp_dir.path().join("dim_test.lance");

        let store = LanceVectorStore::open(&lance_path, DIM).await.unwrap();
        let mut entry = test_entry(1, 0, 0.5);
        entry.embedding = vec![0.1; DIM + 1];

        assert!(store.insert_batch(&[entry]).await.is_err());
    }

    #[tokio::test]
    async fn test_lance_search_roundtrips_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let lance_path = temp_dir.path().join("search_test.lance");

        let store = LanceVectorStore::open(&lance_path, DIM).await.unwrap();
        let entries = vec![
            test_entry(1, 0, 0.2),
            test_entry(2, 0, 0.6),
            test_entry(3, 0, 0.95),
        ];
        store.insert_batch(&entries).await.unwrap();

        let query = entries[2].embedding.clone();
        let results = store.search(&query, 2, 0.0).await.unwrap();

        assert!(!results.is_empty());
        assert!(results.len() <= 2);
        assert_eq!(results[0].doc_id, 3);
        assert_eq!(results[0].kind, ContentKind::Composite);
        assert_eq!(
            results[0].source_urls,
            vec!["https://wiki.example/page".to_string()]
        );
        assert!(results[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_lance_delete() {
        let temp_dir = TempDir::new().unwrap();
        let lance_path = temp_dir.path().join("delete_test.lance");

        let store = LanceVectorStore::open(&lance_path, DIM).await.unwrap();
        let entries = vec![
            test_entry(1, 0, 0.1),
            test_entry(1, 1, 0.4),
            test_entry(2, 0, 0.7),
        ];
        store.insert_batch(&entries).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let deleted = store.delete_by_doc_id(1).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
