//! 텍스트 청킹 모듈
//!
//! 문장 단위 분할을 제공합니다. 블록(텍스트/코드/이미지 캡션) 시퀀스를
//! 임베딩에 적합한 크기의 청크로 나누되, 문장은 절대 중간에서 자르지 않습니다.

use serde::{Deserialize, Serialize};

// ============================================================================
// Content Kinds
// ============================================================================

/// 콘텐츠 종류
///
/// 블록과 청크가 공유하는 분류입니다. 청커가 플러시한 청크는
/// 여러 문장이 합쳐지므로 항상 `Composite`입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// 일반 텍스트
    Text,
    /// 코드 블록
    Code,
    /// 이미지 캡션
    ImageCaption,
    /// 여러 문장이 합쳐진 청크
    Composite,
}

impl ContentKind {
    /// 문자열 표현
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Code => "code",
            ContentKind::ImageCaption => "image_caption",
            ContentKind::Composite => "composite",
        }
    }

    /// 문자열에서 파싱 (알 수 없는 값은 Text로 폴백)
    pub fn parse(s: &str) -> Self {
        match s {
            "code" => ContentKind::Code,
            "image_caption" => ContentKind::ImageCaption,
            "composite" => ContentKind::Composite,
            _ => ContentKind::Text,
        }
    }
}

// ============================================================================
// Blocks and Chunks
// ============================================================================

/// 청커 입력 블록
///
/// 소스(웹 페이지, PDF 페이지 등)에서 추출된 순서 있는 텍스트 단위입니다.
#[derive(Debug, Clone)]
pub struct Block {
    /// 블록 텍스트
    pub text: String,
    /// 블록 종류
    pub kind: ContentKind,
    /// 블록에 포함된 링크 URL
    pub source_urls: Vec<String>,
}

impl Block {
    /// 일반 텍스트 블록 생성
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ContentKind::Text,
            source_urls: vec![],
        }
    }

    /// 코드 블록 생성
    pub fn code(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ContentKind::Code,
            source_urls: vec![],
        }
    }

    /// 이미지 캡션 블록 생성
    pub fn image_caption(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ContentKind::ImageCaption,
            source_urls: vec![],
        }
    }

    /// URL 목록 부착
    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.source_urls = urls;
        self
    }
}

/// 청커 출력 청크
///
/// 임베딩 직전까지만 존재하는 일시적 데이터입니다.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 청크 텍스트 (문장들을 공백으로 연결)
    pub text: String,
    /// 청크 종류
    pub kind: ContentKind,
    /// 기여한 블록들의 URL (순서 유지, 중복 제거)
    pub source_urls: Vec<String>,
}

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 청크 목표 크기 (문자 수)
    pub chunk_size: usize,
    /// 오버랩 예산 (문자 수) - 문장 개수 비율로 환산되어 적용됨
    pub overlap_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap_size: 100,
        }
    }
}

impl ChunkConfig {
    /// PDF 본문용 설정
    pub fn for_pdf() -> Self {
        Self {
            chunk_size: 512,
            overlap_size: 100,
        }
    }

    /// 오버랩 없는 설정
    pub fn without_overlap(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            overlap_size: 0,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 블록 시퀀스를 청크로 분할
    fn chunk_blocks(&self, blocks: &[Block]) -> Vec<Chunk>;

    /// 단일 텍스트를 청크로 분할
    fn chunk_text(&self, text: &str) -> Vec<Chunk> {
        self.chunk_blocks(&[Block::text(text)])
    }

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// SentenceChunker
// ============================================================================

/// 문장 단위 청커
///
/// 블록 텍스트를 문장으로 평탄화한 뒤 누적 버퍼에 모으고,
/// 공백 포함 길이가 `chunk_size` 예산에 도달하면 플러시합니다.
/// 오버랩은 문자 단위가 아니라 `overlap_size / chunk_size` 비율만큼의
/// 문장 개수를 다음 버퍼로 넘기는 방식입니다 (문장 무결성 유지).
pub struct SentenceChunker {
    config: ChunkConfig,
}

/// 버퍼에 쌓인 문장 (기여 블록의 URL 포함)
#[derive(Clone)]
struct BufferedSentence {
    text: String,
    chars: usize,
    urls: Vec<String>,
}

impl SentenceChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// 오버랩으로 넘길 문장 개수
    ///
    /// floor(overlap_size / chunk_size * 버퍼 문장 수), 최대 버퍼 크기 - 1.
    /// 버퍼 전체를 시드로 넘기면 플러시가 진행되지 않으므로 상한을 둡니다.
    fn overlap_sentence_count(&self, buffer_len: usize) -> usize {
        if self.config.chunk_size == 0 || buffer_len == 0 {
            return 0;
        }
        let fraction = self.config.overlap_size as f32 / self.config.chunk_size as f32;
        let count = (fraction * buffer_len as f32).floor() as usize;
        count.min(buffer_len - 1)
    }

    /// 버퍼를 청크로 플러시하고 오버랩 시드를 버퍼에 남김
    fn flush(&self, buffer: &mut Vec<BufferedSentence>, chunks: &mut Vec<Chunk>) {
        if buffer.is_empty() {
            return;
        }

        let text = buffer
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();

        // URL 순서 유지 + 중복 제거
        let mut urls: Vec<String> = Vec::new();
        for sentence in buffer.iter() {
            for url in &sentence.urls {
                if !urls.contains(url) {
                    urls.push(url.clone());
                }
            }
        }

        chunks.push(Chunk {
            text,
            kind: ContentKind::Composite,
            source_urls: urls,
        });

        let keep = self.overlap_sentence_count(buffer.len());
        let seed: Vec<BufferedSentence> = buffer[buffer.len() - keep..].to_vec();
        *buffer = seed;
    }
}

impl Chunker for SentenceChunker {
    fn chunk_blocks(&self, blocks: &[Block]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut buffer: Vec<BufferedSentence> = Vec::new();

        for block in blocks {
            for sentence in split_sentences(&block.text) {
                let sentence_chars = sentence.chars().count();

                // 문장을 붙였을 때 공백 포함 길이가 예산에 도달하면 플러시.
                // 예산을 넘는 단일 문장은 그대로 수용 (더 쪼개지 않음).
                let joined_chars = joined_char_count(&buffer);
                if !buffer.is_empty()
                    && joined_chars + 1 + sentence_chars >= self.config.chunk_size
                {
                    self.flush(&mut buffer, &mut chunks);
                }

                buffer.push(BufferedSentence {
                    text: sentence,
                    chars: sentence_chars,
                    urls: block.source_urls.clone(),
                });
            }
        }

        // 남은 버퍼는 마지막 청크로 플러시 (시드는 버림)
        if !buffer.is_empty() {
            self.flush(&mut buffer, &mut chunks);
            buffer.clear();
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "SentenceChunker"
    }
}

/// 버퍼의 공백 포함 문자 수
fn joined_char_count(buffer: &[BufferedSentence]) -> usize {
    if buffer.is_empty() {
        return 0;
    }
    let chars: usize = buffer.iter().map(|s| s.chars).sum();
    chars + buffer.len() - 1
}

// ============================================================================
// Sentence Splitting
// ============================================================================

/// 텍스트를 문장으로 분할
///
/// 분할 기준: 줄바꿈, 또는 문장 종결 부호(. ! ?) 뒤에 공백이 오는 경우.
/// 각 문장은 트리밍되고 빈 조각은 버립니다.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            push_trimmed(&mut sentences, &mut current);
            continue;
        }

        current.push(c);

        if matches!(c, '.' | '!' | '?') {
            let next_is_space = chars.peek().map(|n| n.is_whitespace()).unwrap_or(false);
            if next_is_space {
                push_trimmed(&mut sentences, &mut current);
            }
        }
    }

    push_trimmed(&mut sentences, &mut current);
    sentences
}

/// 트리밍 후 비어있지 않으면 추가
fn push_trimmed(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(SentenceChunker::with_defaults())
}

/// 설정 지정 청커 생성
pub fn sentence_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(SentenceChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_basic() {
        let sentences = split_sentences("A. B. C.");
        assert_eq!(sentences, vec!["A.", "B.", "C."]);
    }

    #[test]
    fn test_split_sentences_newlines_and_punctuation() {
        let sentences = split_sentences("First line\nSecond sentence. Third one! Is it? Yes");
        assert_eq!(
            sentences,
            vec!["First line", "Second sentence.", "Third one!", "Is it?", "Yes"]
        );
    }

    #[test]
    fn test_split_sentences_no_split_without_space() {
        // 공백이 따라오지 않는 마침표는 분할 지점이 아님 (버전 번호 등)
        let sentences = split_sentences("version 1.2.3 released. done");
        assert_eq!(sentences, vec!["version 1.2.3 released.", "done"]);
    }

    #[test]
    fn test_chunker_empty_input() {
        let chunker = SentenceChunker::with_defaults();
        assert!(chunker.chunk_blocks(&[]).is_empty());
        assert!(chunker.chunk_text("").is_empty());
        assert!(chunker.chunk_text("   \n  ").is_empty());
    }

    #[test]
    fn test_chunker_single_sentence_per_chunk() {
        // 예산 5, 오버랩 0: "A. B. C."는 문장별로 3개의 청크가 됨
        let chunker = SentenceChunker::new(ChunkConfig::without_overlap(5));
        let chunks = chunker.chunk_text("A. B. C.");

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["A.", "B.", "C."]);
        assert!(chunks.iter().all(|c| c.kind == ContentKind::Composite));
    }

    #[test]
    fn test_chunker_oversized_sentence_not_split() {
        let chunker = SentenceChunker::new(ChunkConfig::without_overlap(10));
        let long = "This single sentence is much longer than the budget allows.";
        let chunks = chunker.chunk_text(long);

        // 단일 문장은 더 쪼개지 않고 예산 초과를 허용
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, long);
    }

    #[test]
    fn test_chunker_no_shared_sentences_without_overlap() {
        let chunker = SentenceChunker::new(ChunkConfig::without_overlap(40));
        let text = "Alpha sentence one. Beta sentence two. Gamma sentence three. \
                    Delta sentence four. Epsilon sentence five.";
        let chunks = chunker.chunk_text(text);
        assert!(chunks.len() > 1);

        // 오버랩 0이면 청크 간 공유 문장이 없어야 함
        let mut seen: Vec<String> = Vec::new();
        for chunk in &chunks {
            for sentence in split_sentences(&chunk.text) {
                assert!(!seen.contains(&sentence), "shared sentence: {}", sentence);
                seen.push(sentence);
            }
        }
    }

    #[test]
    fn test_chunker_reconstruction_without_overlap() {
        let chunker = SentenceChunker::new(ChunkConfig::without_overlap(50));
        let text = "One two three four. Five six seven eight. Nine ten eleven twelve. \
                    Thirteen fourteen fifteen. Sixteen seventeen eighteen.";
        let original = split_sentences(text);

        let chunks = chunker.chunk_text(text);
        let mut rebuilt: Vec<String> = Vec::new();
        for chunk in &chunks {
            rebuilt.extend(split_sentences(&chunk.text));
        }

        // 청크들을 순서대로 이으면 원본 문장 시퀀스가 복원되어야 함
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_chunker_overlap_carries_trailing_sentences() {
        // chunk_size 40, overlap 20 -> 버퍼 문장 수의 절반을 다음 버퍼로 넘김
        let chunker = SentenceChunker::new(ChunkConfig {
            chunk_size: 40,
            overlap_size: 20,
        });
        let text = "Aaaa bbbb one. Cccc dddd two. Eeee ffff three. Gggg hhhh four.";
        let chunks = chunker.chunk_text(text);
        assert!(chunks.len() > 1);

        // 첫 청크의 마지막 문장이 둘째 청크의 첫 문장으로 이어져야 함
        let first = split_sentences(&chunks[0].text);
        let second = split_sentences(&chunks[1].text);
        assert_eq!(first.last(), second.first());
    }

    #[test]
    fn test_chunker_budget_respected() {
        let config = ChunkConfig::without_overlap(60);
        let chunker = SentenceChunker::new(config.clone());
        let text = "Short one. Short two. Short three. Short four. Short five. \
                    Short six. Short seven. Short eight.";
        let chunks = chunker.chunk_text(text);

        for chunk in &chunks {
            assert!(
                chunk.text.chars().count() <= config.chunk_size,
                "chunk over budget: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn test_chunker_collects_block_urls() {
        let chunker = SentenceChunker::with_defaults();
        let blocks = vec![
            Block::text("See the docs.").with_urls(vec!["https://a.example".to_string()]),
            Block::text("And the guide.").with_urls(vec![
                "https://b.example".to_string(),
                "https://a.example".to_string(),
            ]),
        ];

        let chunks = chunker.chunk_blocks(&blocks);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].source_urls,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn test_content_kind_roundtrip() {
        for kind in [
            ContentKind::Text,
            ContentKind::Code,
            ContentKind::ImageCaption,
            ContentKind::Composite,
        ] {
            assert_eq!(ContentKind::parse(kind.as_str()), kind);
        }
        // 알 수 없는 값은 Text 폴백
        assert_eq!(ContentKind::parse("unknown"), ContentKind::Text);
    }
}
