//! 텍스트 생성 모듈 - Gemini API를 통한 답변 생성
//!
//! 조립된 프롬프트를 LLM에 전달해 최종 답변을 받아옵니다.
//! 기본 모델은 gemini-2.0-flash입니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// 생성 옵션
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// 최대 출력 토큰 수
    pub max_tokens: u32,
    /// 샘플링 온도
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.9,
        }
    }
}

/// 토큰 사용량
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// 생성 결과
#[derive(Debug, Clone)]
pub struct Completion {
    /// 생성된 텍스트
    pub text: String,
    /// 토큰 사용량 (API가 보고하지 않으면 0)
    pub usage: TokenUsage,
}

// ============================================================================
// CompletionProvider Trait
// ============================================================================

/// 텍스트 생성 프로바이더 트레이트
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 프롬프트로 텍스트 생성
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Gemini Completion
// ============================================================================

/// Gemini 생성 엔드포인트 (gemini-2.0-flash)
/// source: https://ai.google.dev/gemini-api/docs/text-generation
const GEMINI_COMPLETE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Rate Limiter 설정 (Gemini 무료 티어 기준)
const RATE_LIMIT_RPM: u32 = 15;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const MIN_DELAY_MS: u64 = 1000;
/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// 생성 API 키 설정 여부
pub fn has_api_key() -> bool {
    ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"]
        .iter()
        .any(|name| std::env::var(name).map(|k| !k.is_empty()).unwrap_or(false))
}

/// Google Gemini 생성 구현체
#[derive(Debug)]
pub struct GeminiCompletion {
    api_key: String,
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

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
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay: Duration::from_millis(MIN_DELAY_MS),
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    async fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window - now.duration_since(oldest);
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Gemini 요청 본문
/// source: https://ai.google.dev/api/generate-content
#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

/// Gemini 응답
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, Default)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

impl GeminiCompletion {
    /// 새 인스턴스 생성
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
            RATE_LIMIT_RPM,
            RATE_LIMIT_WINDOW,
        )));

        Ok(Self {
            api_key,
            client,
            rate_limiter,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    ///
    /// 우선순위: GEMINI_API_KEY > GOOGLE_AI_API_KEY
    pub fn from_env() -> Result<Self> {
        for name in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
            if let Ok(key) = std::env::var(name) {
                if !key.is_empty() {
                    tracing::debug!("Using API key from {}", name);
                    return Self::new(key);
                }
            }
        }

        Err(Error::Configuration(
            "GEMINI_API_KEY or GOOGLE_AI_API_KEY not set".to_string(),
        ))
    }

    /// 응답에서 텍스트와 사용량 추출
    fn parse_completion(body: &str) -> Result<Completion> {
        let parsed: GenerateResponse = serde_json::from_str(body).map_err(|e| Error::ExternalApi {
            service: "gemini".to_string(),
            message: format!("Invalid completion response: {}", e),
        })?;

        let text: String = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(Error::ExternalApi {
                service: "gemini".to_string(),
                message: "Completion response contained no text".to_string(),
            });
        }

        let usage = parsed
            .usage_metadata
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        Ok(Completion { text, usage })
    }
}

#[async_trait]
impl CompletionProvider for GeminiCompletion {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion> {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: options.max_tokens,
                temperature: options.temperature,
            },
        };

        let mut last_error: Option<Error> = None;

        // 재시도 루프 (429 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            // API 키는 URL이 아닌 헤더로 전송
            let response = match self
                .client
                .post(GEMINI_COMPLETE_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(Error::ExternalApi {
                        service: "gemini".to_string(),
                        message: format!("Failed to send completion request: {}", e),
                    });
                    if attempt < MAX_RETRIES {
                        let backoff =
                            Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
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
                service: "gemini".to_string(),
                message: format!("Failed to read response body: {}", e),
            })?;

            if status.is_success() {
                return Self::parse_completion(&body);
            }

            if status.as_u16() == 429 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(Error::ExternalApi {
                    service: "gemini".to_string(),
                    message: "Rate limit exceeded (429)".to_string(),
                });

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                return Err(Error::ExternalApi {
                    service: "gemini".to_string(),
                    message: format!("{}: {}", status, body),
                });
            }
        }

        Err(last_error.unwrap_or_else(|| Error::ExternalApi {
            service: "gemini".to_string(),
            message: format!("Completion failed after {} retries", MAX_RETRIES),
        }))
    }

    fn name(&self) -> &str {
        "gemini-2.0-flash"
    }
}

// ============================================================================
// Tests
// ============================================================================
