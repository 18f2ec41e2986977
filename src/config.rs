//! 엔진 설정 모듈
//!
//! 청킹/검색/배치 파라미터와 데이터 디렉토리를 관리합니다.
//! 환경변수로 개별 값을 덮어쓸 수 있습니다.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::knowledge::ChunkConfig;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.wiki-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wiki-rag")
}

// ============================================================================
// EngineConfig
// ============================================================================

/// RAG 엔진 설정
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 데이터 저장 디렉토리
    pub data_dir: PathBuf,
    /// 청킹 설정
    pub chunking: ChunkConfig,
    /// 임베딩 배치 크기 (동시 임베딩 호출 수)
    pub embed_batch_size: usize,
    /// 검색 결과 상위 K개
    pub top_k: usize,
    /// 유사도 임계값 (0.0 ~ 1.0, 미만은 제외)
    pub similarity_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            chunking: ChunkConfig::default(),
            embed_batch_size: 3,
            top_k: 5,
            similarity_threshold: 0.2,
        }
    }
}

impl EngineConfig {
    /// 환경변수 덮어쓰기를 적용한 설정 생성
    ///
    /// 지원 변수: WIKIRAG_DATA_DIR, WIKIRAG_CHUNK_SIZE, WIKIRAG_OVERLAP_SIZE,
    /// WIKIRAG_EMBED_BATCH, WIKIRAG_TOP_K, WIKIRAG_THRESHOLD
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("WIKIRAG_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        if let Some(size) = read_env_usize("WIKIRAG_CHUNK_SIZE")? {
            config.chunking.chunk_size = size;
        }
        if let Some(size) = read_env_usize("WIKIRAG_OVERLAP_SIZE")? {
            config.chunking.overlap_size = size;
        }
        if let Some(size) = read_env_usize("WIKIRAG_EMBED_BATCH")? {
            config.embed_batch_size = size;
        }
        if let Some(k) = read_env_usize("WIKIRAG_TOP_K")? {
            config.top_k = k;
        }

        if let Ok(raw) = std::env::var("WIKIRAG_THRESHOLD") {
            if !raw.is_empty() {
                config.similarity_threshold = raw.parse().map_err(|_| {
                    Error::Configuration(format!("WIKIRAG_THRESHOLD is not a number: {}", raw))
                })?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 검증
    ///
    /// 잘못된 조합이면 `Error::Configuration`을 반환합니다.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::Configuration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunking.overlap_size >= self.chunking.chunk_size {
            return Err(Error::Configuration(format!(
                "overlap_size ({}) must be less than chunk_size ({})",
                self.chunking.overlap_size, self.chunking.chunk_size
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::Configuration(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(Error::Configuration(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::Configuration(format!(
                "similarity_threshold must be within [0, 1]: {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// usize 환경변수 읽기 (없거나 비어있으면 None)
fn read_env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|_| Error::Configuration(format!("{} is not a number: {}", name, raw))),
        _ => Ok(None),
    }
}

// ============================================================================
// Tests
// ============================================================================
