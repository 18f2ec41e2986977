//! Document Store - rusqlite 기반 동기 문서/응답 저장소
//!
//! 수집한 위키 문서 원문과 질의응답 기록, 출처 참조를 저장합니다.
//! 저장 위치: ~/.wiki-rag/knowledge.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use super::chunker::ContentKind;
use crate::rag::sources::SourceReference;

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서 엔트리
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    /// 문서 출신 시스템 (예: "web", "file", "text")
    pub origin: String,
    /// 원본 내 위치 (위키 페이지 경로, 파일 경로 등)
    pub page_path: Option<String>,
    pub content: String,
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 새 문서 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub url: String,
    pub title: Option<String>,
    pub origin: String,
    pub page_path: Option<String>,
    pub content: String,
    pub tag: Option<String>,
}

/// 저장된 질의응답 기록
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub id: String,
    pub query: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub response_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// DocumentStore
// ============================================================================

/// Document Store - 동기 문서 저장소
///
/// SQLite 기반으로 문서, 응답, 출처 참조를 저장합니다.
/// 벡터 검색은 VectorStore가 담당하고 여기서는 메타데이터만 다룹니다.
pub struct DocumentStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl DocumentStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 지정 디렉토리에서 열기 (<data_dir>/knowledge.db)
    pub fn open_in_dir(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        }
        Self::open(&data_dir.join("knowledge.db"))
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                title TEXT,
                origin TEXT NOT NULL,
                page_path TEXT,
                content TEXT NOT NULL,
                tag TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .context("Failed to create documents table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_url ON documents(url)",
            [],
        )
        .context("Failed to create URL index")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_tag ON documents(tag)",
            [],
        )
        .context("Failed to create tag index")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS responses (
                id TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                answer TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .context("Failed to create responses table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS source_references (
                response_id TEXT NOT NULL,
                source_index INTEGER NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                kind TEXT NOT NULL,
                confidence REAL NOT NULL,
                page_title TEXT,
                page_path TEXT,
                url TEXT,
                PRIMARY KEY (response_id, source_index)
            )",
            [],
        )
        .context("Failed to create source_references table")?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// 문서 저장 (URL이 같으면 내용을 갱신하고 기존 ID 유지)
    pub fn add_document(&self, doc: NewDocument) -> Result<i64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO documents (url, title, origin, page_path, content, tag, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                origin = excluded.origin,
                page_path = excluded.page_path,
                content = excluded.content,
                tag = excluded.tag,
                created_at = excluded.created_at",
            params![doc.url, doc.title, doc.origin, doc.page_path, doc.content, doc.tag, now],
        )
        .context("Failed to insert document")?;

        let id: i64 = conn
            .query_row(
                "SELECT id FROM documents WHERE url = ?1",
                params![doc.url],
                |row| row.get(0),
            )
            .context("Failed to read back document id")?;

        tracing::info!("Added document: {} (id={})", doc.url, id);
        Ok(id)
    }

    /// ID로 문서 조회
    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, url, title, origin, page_path, content, tag, created_at
             FROM documents WHERE id = ?1",
        )?;

        let doc = stmt.query_row(params![id], row_to_document).ok();
        Ok(doc)
    }

    /// URL로 문서 조회
    pub fn get_by_url(&self, url: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, url, title, origin, page_path, content, tag, created_at
             FROM documents WHERE url = ?1",
        )?;

        let doc = stmt.query_row(params![url], row_to_document).ok();
        Ok(doc)
    }

    /// 문서 목록 조회 (최신순, 태그 필터 옵션)
    pub fn list_documents(&self, limit: usize, tag: Option<&str>) -> Result<Vec<Document>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let docs: Vec<Document> = if let Some(tag) = tag {
            let mut stmt = conn.prepare(
                "SELECT id, url, title, origin, page_path, content, tag, created_at
                 FROM documents
                 WHERE tag = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![tag, limit as i64], row_to_document)?;
            rows.filter_map(|r| r.ok()).collect()
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, url, title, origin, page_path, content, tag, created_at
                 FROM documents
                 ORDER BY created_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], row_to_document)?;
            rows.filter_map(|r| r.ok()).collect()
        };

        Ok(docs)
    }

    /// 문서 삭제
    pub fn delete_document(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// 간단한 LIKE 키워드 검색
    pub fn search_like(&self, keyword: &str, limit: usize) -> Result<Vec<Document>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let pattern = format!("%{}%", keyword.to_lowercase());

        let mut stmt = conn.prepare(
            "SELECT id, url, title, origin, page_path, content, tag, created_at
             FROM documents
             WHERE LOWER(content) LIKE ?1 OR LOWER(title) LIKE ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;

        let docs = stmt
            .query_map(params![pattern, limit as i64], row_to_document)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(docs)
    }

    // ========================================================================
    // Responses and Source References
    // ========================================================================

    /// 응답과 출처 참조를 한 트랜잭션으로 저장
    ///
    /// 출처 참조가 응답 없이 남는 일이 없도록 원자적으로 기록합니다.
    pub fn save_response(
        &self,
        response_id: &str,
        query: &str,
        answer: &str,
        sources: &[SourceReference],
    ) -> Result<()> {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO responses (id, query, answer, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![response_id, query, answer, now],
        )
        .context("Failed to insert response")?;

        for source in sources {
            tx.execute(
                "INSERT INTO source_references
                 (response_id, source_index, title, content, kind, confidence,
                  page_title, page_path, url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    response_id,
                    source.source_index as i64,
                    source.title,
                    source.content,
                    source.kind.as_str(),
                    source.confidence as f64,
                    source.page_title,
                    source.page_path,
                    source.url,
                ],
            )
            .context("Failed to insert source reference")?;
        }

        tx.commit().context("Failed to commit response")?;
        tracing::debug!("Saved response {} with {} sources", response_id, sources.len());
        Ok(())
    }

    /// 응답 조회
    pub fn get_response(&self, response_id: &str) -> Result<Option<StoredResponse>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, query, answer, created_at FROM responses WHERE id = ?1",
        )?;

        let response = stmt
            .query_row(params![response_id], |row| {
                Ok(StoredResponse {
                    id: row.get(0)?,
                    query: row.get(1)?,
                    answer: row.get(2)?,
                    created_at: parse_datetime(row.get::<_, String>(3)?),
                })
            })
            .ok();

        Ok(response)
    }

    /// 응답 존재 여부
    pub fn has_response(&self, response_id: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM responses WHERE id = ?1",
            params![response_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 특정 출처 참조 조회
    pub fn get_source_reference(
        &self,
        response_id: &str,
        source_index: usize,
    ) -> Result<Option<SourceReference>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT response_id, source_index, title, content, kind, confidence,
                    page_title, page_path, url
             FROM source_references
             WHERE response_id = ?1 AND source_index = ?2",
        )?;

        let source = stmt
            .query_row(params![response_id, source_index as i64], row_to_source)
            .ok();

        Ok(source)
    }

    /// 응답에 달린 모든 출처 참조 조회 (인덱스 오름차순)
    pub fn sources_for_response(&self, response_id: &str) -> Result<Vec<SourceReference>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT response_id, source_index, title, content, kind, confidence,
                    page_title, page_path, url
             FROM source_references
             WHERE response_id = ?1
             ORDER BY source_index ASC",
        )?;

        let sources = stmt
            .query_map(params![response_id], row_to_source)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(sources)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap_or(0);

        let response_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM responses", [], |row| row.get(0))
            .unwrap_or(0);

        let total_size: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(content)), 0) FROM documents",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(StoreStats {
            document_count: count as usize,
            response_count: response_count as usize,
            total_content_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// documents 행 매핑
fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        origin: row.get(3)?,
        page_path: row.get(4)?,
        content: row.get(5)?,
        tag: row.get(6)?,
        created_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

/// source_references 행 매핑
fn row_to_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceReference> {
    Ok(SourceReference {
        response_id: row.get(0)?,
        source_index: row.get::<_, i64>(1)? as usize,
        title: row.get(2)?,
        content: row.get(3)?,
        kind: ContentKind::parse(&row.get::<_, String>(4)?),
        confidence: row.get::<_, f64>(5)? as f32,
        page_title: row.get(6)?,
        page_path: row.get(7)?,
        url: row.get(8)?,
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, DocumentStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = DocumentStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn new_doc(url: &str, tag: Option<&str>) -> NewDocument {
        NewDocument {
            url: url.to_string(),
            title: Some("Example Doc".to_string()),
            origin: "web".to_string(),
            page_path: Some("/wiki/example".to_string()),
            content: "This is test content".to_string(),
            tag: tag.map(|t| t.to_string()),
        }
    }

    #[test]
    fn test_add_and_get_document() {
        let (_dir, store) = create_test_store();

        let id = store.add_document(new_doc("https://example.com/doc", Some("rust"))).unwrap();
        assert!(id > 0);

        let retrieved = store.get_document(id).unwrap().unwrap();
        assert_eq!(retrieved.title, Some("Example Doc".to_string()));
        assert_eq!(retrieved.origin, "web");
        assert_eq!(retrieved.tag, Some("rust".to_string()));
    }

    #[test]
    fn test_reingest_same_url_keeps_id() {
        let (_dir, store) = create_test_store();

        let id = store.add_document(new_doc("https://example.com/doc", None)).unwrap();

        let mut updated = new_doc("https://example.com/doc", None);
        updated.content = "Updated content".to_string();
        let id2 = store.add_document(updated).unwrap();

        assert_eq!(id, id2);
        let doc = store.get_document(id).unwrap().unwrap();
        assert_eq!(doc.content, "Updated content");
        assert_eq!(store.stats().unwrap().document_count, 1);
    }

    #[test]
    fn test_get_by_url() {
        let (_dir, store) = create_test_store();

        store.add_document(new_doc("https://example.com/test", None)).unwrap();

        assert!(store.get_by_url("https://example.com/test").unwrap().is_some());
        assert!(store.get_by_url("https://nonexistent.com").unwrap().is_none());
    }

    #[test]
    fn test_list_documents_with_tag_filter() {
        let (_dir, store) = create_test_store();

        for i in 0..5 {
            let tag = if i % 2 == 0 { Some("infra") } else { None };
            store
                .add_document(new_doc(&format!("https://example.com/doc{}", i), tag))
                .unwrap();
        }

        let list = store.list_documents(10, None).unwrap();
        assert_eq!(list.len(), 5);

        let tagged = store.list_documents(10, Some("infra")).unwrap();
        assert_eq!(tagged.len(), 3); // 0, 2, 4
    }

    #[test]
    fn test_delete_document() {
        let (_dir, store) = create_test_store();

        let id = store.add_document(new_doc("https://example.com/to-delete", None)).unwrap();
        assert!(store.get_document(id).unwrap().is_some());

        assert!(store.delete_document(id).unwrap());
        assert!(store.get_document(id).unwrap().is_none());
        assert!(!store.delete_document(id).unwrap());
    }

    #[test]
    fn test_search_like() {
        let (_dir, store) = create_test_store();

        let mut doc = new_doc("https://example.com/deploy", None);
        doc.title = Some("Deployment Guide".to_string());
        doc.content = "Run the deployment pipeline on merge".to_string();
        store.add_document(doc).unwrap();

        let mut doc = new_doc("https://example.com/oncall", None);
        doc.title = Some("Oncall Runbook".to_string());
        doc.content = "Escalate pages after fifteen minutes".to_string();
        store.add_document(doc).unwrap();

        assert_eq!(store.search_like("deployment", 10).unwrap().len(), 1);
        assert_eq!(store.search_like("nonexistent", 10).unwrap().len(), 0);
    }

    #[test]
    fn test_save_and_load_response_with_sources() {
        let (_dir, store) = create_test_store();

        let sources = vec![
            SourceReference {
                response_id: "resp_abc".to_string(),
                source_index: 0,
                title: "[1] Deployment Guide".to_string(),
                content: "First cited chunk.".to_string(),
                kind: ContentKind::Composite,
                confidence: 0.92,
                page_title: Some("Deployment Guide".to_string()),
                page_path: Some("/wiki/deploy".to_string()),
                url: Some("https://wiki.example/deploy".to_string()),
            },
            SourceReference {
                response_id: "resp_abc".to_string(),
                source_index: 1,
                title: "[2] Oncall Runbook".to_string(),
                content: "Second cited chunk.".to_string(),
                kind: ContentKind::Composite,
                confidence: 0.87,
                page_title: None,
                page_path: None,
                url: None,
            },
        ];

        store
            .save_response("resp_abc", "How do we deploy?", "Use the pipeline [1].", &sources)
            .unwrap();

        assert!(store.has_response("resp_abc").unwrap());
        assert!(!store.has_response("resp_missing").unwrap());

        let response = store.get_response("resp_abc").unwrap().unwrap();
        assert_eq!(response.query, "How do we deploy?");
        assert_eq!(response.answer, "Use the pipeline [1].");
        assert!(store.get_response("resp_missing").unwrap().is_none());

        let loaded = store.sources_for_response("resp_abc").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].source_index, 0);
        assert_eq!(loaded[0].kind, ContentKind::Composite);
        assert!((loaded[0].confidence - 0.92).abs() < 0.0001);

        let one = store.get_source_reference("resp_abc", 1).unwrap().unwrap();
        assert_eq!(one.content, "Second cited chunk.");
        assert_eq!(one.page_title, None);

        assert!(store.get_source_reference("resp_abc", 3).unwrap().is_none());
        assert!(store.get_source_reference("resp_missing", 1).unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = create_test_store();

        let mut doc = new_doc("https://example.com/test", None);
        doc.content = "1234567890".to_string(); // 10 bytes
        store.add_document(doc).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.response_count, 0);
        assert_eq!(stats.total_content_bytes, 10);
    }
}
