//! 에러 타입 정의
//!
//! 라이브러리 전역에서 사용하는 에러 분류입니다.
//! CLI 레벨에서는 anyhow로 감싸서 처리합니다.

use thiserror::Error;

/// wiki-rag 에러 분류
#[derive(Debug, Error)]
pub enum Error {
    /// 설정 오류 (API 키 누락, 잘못된 파라미터 등) - 시작 단계에서 치명적
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 외부 API 오류 (비정상 상태 코드, 잘못된 응답 본문)
    #[error("external API error ({service}): {message}")]
    ExternalApi {
        /// 호출한 서비스 이름
        service: String,
        /// 실패 내용
        message: String,
    },

    /// 임베딩 생성 오류 (빈 결과, 벡터 필드 누락)
    ///
    /// 배치 수집 중에는 청크 단위로 복구 가능, 단건 호출에서는 치명적입니다.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// 조회 대상 없음 (출처 참조 ID, 응답 ID 등)
    #[error("not found: {0}")]
    NotFound(String),
}

/// wiki-rag 공용 Result 타입
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Configuration("HF_API_KEY not set".to_string());
        assert!(err.to_string().contains("configuration error"));

        let err = Error::ExternalApi {
            service: "huggingface".to_string(),
            message: "503 Service Unavailable".to_string(),
        };
        assert!(err.to_string().contains("huggingface"));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::NotFound("source reference abc".to_string());
        assert_eq!(err.to_string(), "not found: source reference abc");
    }
}
