//! 임베딩 모듈 - 외부 API를 통한 텍스트 벡터화
//!
//! 텍스트를 벡터로 변환하는 임베딩 프로바이더입니다.
//! 시맨틱 검색을 위한 핵심 모듈입니다.
//!
//! 기본은 HuggingFace Inference API (all-MiniLM-L6-v2, 384차원),
//! 대안으로 OpenAI (text-embedding-3-small, 1536차원)를 지원합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder()?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

// ============================================================================
// Embedder Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Rate Limiting / Retry
// ============================================================================

/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    async fn acquire(&mut self) {
        // 1. 최소 딜레이 적용 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();

        // 2. 윈도우 밖의 오래된 요청 제거
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. Rate limit 초과 시 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window - now.duration_since(oldest);
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                // 대기 후 다시 정리
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        // 4. 현재 요청 기록
        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

/// 429 응답 백오프 시간 계산
fn backoff_for_attempt(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt))
}

// ============================================================================
// HuggingFace Embedder
// ============================================================================

/// HuggingFace feature-extraction 엔드포인트 (all-MiniLM-L6-v2)
/// source: https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2
const HF_EMBED_URL: &str =
    "https://api-inference.huggingface.co/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2";

/// all-MiniLM-L6-v2 임베딩 차원
pub const HF_DIMENSION: usize = 384;

/// HuggingFace Inference API 임베딩 구현체
#[derive(Debug)]
pub struct HuggingFaceEmbedder {
    api_key: String,
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

/// HuggingFace 요청 본문
#[derive(Debug, Serialize)]
struct HfEmbedRequest {
    inputs: String,
    options: HfOptions,
}

#[derive(Debug, Serialize)]
struct HfOptions {
    wait_for_model: bool,
}

impl HuggingFaceEmbedder {
    /// 새 인스턴스 생성
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        // HF 무료 티어에 맞춘 보수적 한도
        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
            120,
            Duration::from_secs(60),
            Duration::from_millis(200),
        )));

        Ok(Self {
            api_key,
            client,
            rate_limiter,
        })
    }

    /// 환경변수 HF_API_KEY에서 생성
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("HF_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Configuration("HF_API_KEY not set".to_string()))?;
        Self::new(api_key)
    }

    /// 응답 본문에서 벡터 추출
    ///
    /// feature-extraction 파이프라인은 입력 형태에 따라 `[f32]` 또는
    /// `[[f32]]`를 반환하므로 둘 다 수용합니다.
    fn parse_vector(body: &str) -> Result<Vec<f32>> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| Error::Embedding(format!("Invalid embedding response: {}", e)))?;

        let vector = match &value {
            serde_json::Value::Array(items) if items.first().map_or(false, |v| v.is_array()) => {
                serde_json::from_value::<Vec<Vec<f32>>>(value.clone())
                    .ok()
                    .and_then(|mut nested| {
                        if nested.is_empty() {
                            None
                        } else {
                            Some(nested.swap_remove(0))
                        }
                    })
            }
            serde_json::Value::Array(_) => serde_json::from_value::<Vec<f32>>(value.clone()).ok(),
            _ => None,
        };

        match vector {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(Error::Embedding(
                "Embedding response contained no vector".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Embedder for HuggingFaceEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트는 영벡터로 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; HF_DIMENSION]);
        }

        let request = HfEmbedRequest {
            inputs: text.to_string(),
            options: HfOptions {
                wait_for_model: true,
            },
        };

        let mut last_error: Option<Error> = None;

        // 재시도 루프 (429 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            let response = match self
                .client
                .post(HF_EMBED_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(Error::ExternalApi {
                        service: "huggingface".to_string(),
                        message: format!("Failed to send embedding request: {}", e),
                    });
                    if attempt < MAX_RETRIES {
                        let backoff = backoff_for_attempt(attempt);
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response.text().await.map_err(|e| Error::ExternalApi {
                service: "huggingface".to_string(),
                message: format!("Failed to read response body: {}", e),
            })?;

            if status.is_success() {
                return Self::parse_vector(&body);
            }

            if status.as_u16() == 429 {
                let backoff = backoff_for_attempt(attempt);
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(Error::ExternalApi {
                    service: "huggingface".to_string(),
                    message: "Rate limit exceeded (429)".to_string(),
                });

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                return Err(Error::ExternalApi {
                    service: "huggingface".to_string(),
                    message: format!("{}: {}", status, body),
                });
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Embedding(format!("Embedding failed after {} retries", MAX_RETRIES))
        }))
    }

    fn dimension(&self) -> usize {
        HF_DIMENSION
    }

    fn name(&self) -> &str {
        "all-MiniLM-L6-v2"
    }
}

// ============================================================================
// OpenAI Embedder
// ============================================================================

/// OpenAI 임베딩 엔드포인트
/// source: https://platform.openai.com/docs/api-reference/embeddings
const OPENAI_EMBED_URL: &str = "https://api.openai.com/v1/embeddings";

/// text-embedding-3-small 모델
const OPENAI_EMBED_MODEL: &str = "text-embedding-3-small";

/// text-embedding-3-small 임베딩 차원
pub const OPENAI_DIMENSION: usize = 1536;

/// OpenAI 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedder {
    api_key: String,
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

/// OpenAI 요청 본문
#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: String,
}

/// OpenAI 응답
#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// 새 인스턴스 생성
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
            500,
            Duration::from_secs(60),
            Duration::from_millis(100),
        )));

        Ok(Self {
            api_key,
            client,
            rate_limiter,
        })
    }

    /// 환경변수 OPENAI_API_KEY에서 생성
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Configuration("OPENAI_API_KEY not set".to_string()))?;
        Self::new(api_key)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; OPENAI_DIMENSION]);
        }

        let request = OpenAiEmbedRequest {
            model: OPENAI_EMBED_MODEL.to_string(),
            input: text.to_string(),
        };

        let mut last_error: Option<Error> = None;

        for attempt in 0..=MAX_RETRIES {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            let response = match self
                .client
                .post(OPENAI_EMBED_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(Error::ExternalApi {
                        service: "openai".to_string(),
                        message: format!("Failed to send embedding request: {}", e),
                    });
                    if attempt < MAX_RETRIES {
                        let backoff = backoff_for_attempt(attempt);
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response.text().await.map_err(|e| Error::ExternalApi {
                service: "openai".to_string(),
                message: format!("Failed to read response body: {}", e),
            })?;

            if status.is_success() {
                let parsed: OpenAiEmbedResponse = serde_json::from_str(&body)
                    .map_err(|e| Error::Embedding(format!("Invalid embedding response: {}", e)))?;

                return parsed
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        Error::Embedding("Embedding response contained no vector".to_string())
                    });
            }

            if status.as_u16() == 429 {
                let backoff = backoff_for_attempt(attempt);
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(Error::ExternalApi {
                    service: "openai".to_string(),
                    message: "Rate limit exceeded (429)".to_string(),
                });

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                return Err(Error::ExternalApi {
                    service: "openai".to_string(),
                    message: format!("{}: {}", status, body),
                });
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Embedding(format!("Embedding failed after {} retries", MAX_RETRIES))
        }))
    }

    fn dimension(&self) -> usize {
        OPENAI_DIMENSION
    }

    fn name(&self) -> &str {
        OPENAI_EMBED_MODEL
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 임베딩 API 키 설정 여부
pub fn has_api_key() -> bool {
    ["HF_API_KEY", "OPENAI_API_KEY"]
        .iter()
        .any(|name| std::env::var(name).map(|k| !k.is_empty()).unwrap_or(false))
}

/// 임베딩 프로바이더 생성
///
/// 우선순위: HF_API_KEY > OPENAI_API_KEY.
/// 둘 다 없으면 설정 에러를 반환합니다.
pub fn create_embedder() -> Result<Box<dyn Embedder>> {
    if std::env::var("HF_API_KEY").map(|k| !k.is_empty()).unwrap_or(false) {
        let embedder = HuggingFaceEmbedder::from_env()?;
        tracing::info!("Using HuggingFace embedding (dimension: {})", embedder.dimension());
        return Ok(Box::new(embedder));
    }

    if std::env::var("OPENAI_API_KEY").map(|k| !k.is_empty()).unwrap_or(false) {
        let embedder = OpenAiEmbedder::from_env()?;
        tracing::info!("Using OpenAI embedding (dimension: {})", embedder.dimension());
        return Ok(Box::new(embedder));
    }

    Err(Error::Configuration(
        "No embedding API key found. Set HF_API_KEY or OPENAI_API_KEY.".to_string(),
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector_flat() {
        let body = "[0.1, 0.2, 0.3]";
        let vector = HuggingFaceEmbedder::parse_vector(body).unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_parse_vector_nested() {
        let body = "[[0.5, 0.6], [0.7, 0.8]]";
        let vector = HuggingFaceEmbedder::parse_vector(body).unwrap();
        assert_eq!(vector, vec![0.5, 0.6]);
    }

    #[test]
    fn test_parse_vector_rejects_empty_and_invalid() {
        assert!(HuggingFaceEmbedder::parse_vector("[]").is_err());
        assert!(HuggingFaceEmbedder::parse_vector("{\"error\":\"loading\"}").is_err());
        assert!(HuggingFaceEmbedder::parse_vector("not json").is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_for_attempt(0), Duration::from_millis(2000));
        assert_eq!(backoff_for_attempt(1), Duration::from_millis(4000));
        assert_eq!(backoff_for_attempt(2), Duration::from_millis(8000));
    }

    #[test]
    fn test_from_env_without_key_returns_error() {
        std::env::remove_var("HF_API_KEY");
        let result = HuggingFaceEmbedder::from_env();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
