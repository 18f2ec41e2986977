//! 프롬프트 조립 모듈
//!
//! 검색된 청크와 대화 이력을 고정된 순서의 프롬프트로 조립합니다.
//! 인용 번호 [n]은 출처 참조 목록의 n-1번째 항목과 1:1로 대응합니다.

use serde::{Deserialize, Serialize};

// ============================================================================
// Conversation History
// ============================================================================

/// 대화 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// 프롬프트 표시용 이름
    pub fn as_label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// 대화 턴
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Prompt Sources
// ============================================================================

/// 프롬프트에 들어가는 출처 항목
#[derive(Debug, Clone)]
pub struct PromptSource {
    /// 출처 시스템 이름 (web, file, text)
    pub origin: String,
    /// 문서 식별자
    pub id: String,
    /// 청크 텍스트
    pub text: String,
}

// ============================================================================
// Prompt Assembly
// ============================================================================

/// 시스템 지시문 (컨텍스트 밖 답변 금지)
const SYSTEM_INSTRUCTION: &str = "\
You are an Engineering Wiki Assistant that helps answer questions based on the provided context.
Your goal is to provide accurate, helpful responses based only on the information given.
If the context doesn't contain relevant information, acknowledge that you don't have enough information.";

/// 마무리 지시문 (인용 번호 사용 요구)
const CLOSING_INSTRUCTION: &str = "\
Please provide a helpful response based on the above context. Include references to the source numbers [1], [2], etc. when appropriate.";

/// 프롬프트 조립
///
/// 순서 고정: 시스템 지시문 → 출처 목록 → 대화 이력 → 사용자 질문 →
/// 마무리 지시문. 출처 번호는 1부터 시작하며 입력 순서를 보존합니다.
pub fn build_prompt(
    query: &str,
    sources: &[PromptSource],
    history: &[ConversationTurn],
) -> String {
    let mut context_text = String::new();

    if !sources.is_empty() {
        context_text.push_str("Relevant information from our sources:\n\n");

        for (index, source) in sources.iter().enumerate() {
            context_text.push_str(&format!(
                "[{}] Source: {} (id: {}):\n{}\n\n",
                index + 1,
                source.origin,
                source.id,
                source.text
            ));
        }
    }

    if !history.is_empty() {
        context_text.push_str("\nPrevious conversation:\n");
        for turn in history {
            context_text.push_str(&format!("{}: {}\n", turn.role.as_label(), turn.content));
        }
        context_text.push('\n');
    }

    format!(
        "{}\n\n{}\n\nUser question: {}\n\n{}",
        SYSTEM_INSTRUCTION, context_text, query, CLOSING_INSTRUCTION
    )
    .trim()
    .to_string()
}

// ============================================================================
// Keyword Extraction
// ============================================================================

/// 키워드 추출에서 제외하는 불용어
const STOP_WORDS: [&str; 10] = ["the", "a", "an", "in", "on", "at", "to", "for", "with", "by"];

/// 질의에서 키워드 추출
///
/// 소문자화 후 공백으로 분리하고, 2자 이하 토큰과 불용어를 버립니다.
/// 등장 순서를 보존하며 중복은 제거하지 않습니다.
pub fn extract_keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|word| word.chars().count() > 2 && !STOP_WORDS.contains(word))
        .map(|word| word.to_string())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn source(origin: &str, id: &str, text: &str) -> PromptSource {
        PromptSource {
            origin: origin.to_string(),
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_extract_keywords_filters_stop_words_and_short_tokens() {
        let keywords = extract_keywords("What is the best way to deploy a service?");
        assert_eq!(keywords, vec!["what", "best", "way", "deploy", "service?"]);
    }

    #[test]
    fn test_extract_keywords_preserves_order_and_duplicates() {
        let keywords = extract_keywords("deploy deploy DEPLOY");
        assert_eq!(keywords, vec!["deploy", "deploy", "deploy"]);
        assert!(extract_keywords("a an in by").is_empty());
    }

    #[test]
    fn test_build_prompt_section_order() {
        let sources = vec![
            source("web", "10", "Most relevant chunk."),
            source("web", "11", "Second chunk."),
        ];
        let history = vec![
            ConversationTurn::user("Earlier question"),
            ConversationTurn::assistant("Earlier answer"),
        ];

        let prompt = build_prompt("How do we deploy?", &sources, &history);

        let sys = prompt.find("Engineering Wiki Assistant").unwrap();
        let ctx = prompt.find("Relevant information from our sources:").unwrap();
        let first = prompt.find("[1] Source: web (id: 10):").unwrap();
        let second = prompt.find("[2] Source: web (id: 11):").unwrap();
        let conv = prompt.find("Previous conversation:").unwrap();
        let user_turn = prompt.find("User: Earlier question").unwrap();
        let assistant_turn = prompt.find("Assistant: Earlier answer").unwrap();
        let question = prompt.find("User question: How do we deploy?").unwrap();
        let closing = prompt.find("Include references to the source numbers").unwrap();

        assert!(sys < ctx);
        assert!(ctx < first);
        assert!(first < second);
        assert!(second < conv);
        assert!(conv < user_turn);
        assert!(user_turn < assistant_turn);
        assert!(assistant_turn < question);
        assert!(question < closing);
    }

    #[test]
    fn test_build_prompt_without_sources_or_history() {
        let prompt = build_prompt("Anything documented?", &[], &[]);

        assert!(!prompt.contains("Relevant information from our sources:"));
        assert!(!prompt.contains("Previous conversation:"));
        assert!(prompt.contains("User question: Anything documented?"));
        // 트리밍 후에도 지시문이 양 끝에 남아야 함
        assert!(prompt.starts_with("You are an Engineering Wiki Assistant"));
        assert!(prompt.ends_with("when appropriate."));
    }

    #[test]
    fn test_build_prompt_includes_chunk_text() {
        let sources = vec![source("file", "3", "Run cargo build first.")];
        let prompt = build_prompt("How to build?", &sources, &[]);
        assert!(prompt.contains("Run cargo build first."));
    }
}
