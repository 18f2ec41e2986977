//! 출처 참조 모듈
//!
//! 답변에 인용된 청크들을 프론트/CLI에서 다시 찾아갈 수 있는
//! 참조 레코드로 변환합니다. 참조 ID는 `{response_id}_src{index}` 형식으로
//! 문자열만으로 (응답, 인덱스) 쌍을 복원할 수 있습니다.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::knowledge::{ContentKind, Document, RankedChunk};

/// 참조 ID 구분자
const REFERENCE_DELIMITER: &str = "_src";

// ============================================================================
// SourceReference
// ============================================================================

/// 출처 참조
///
/// 응답 하나당 인용된 청크 수만큼 생성됩니다. `source_index`는 0부터
/// 시작하며 프롬프트의 인용 번호는 `source_index + 1`입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReference {
    /// 소속 응답 ID
    pub response_id: String,
    /// 응답 내 위치 (0-based, 순위 순서)
    pub source_index: usize,
    /// 표시용 제목 ("[n] <문서 제목>")
    pub title: String,
    /// 인용된 청크 텍스트
    pub content: String,
    /// 청크 종류
    pub kind: ContentKind,
    /// 유사도 점수 (0.0 ~ 1.0)
    pub confidence: f32,
    /// 원본 문서 제목
    pub page_title: Option<String>,
    /// 원본 내 위치 (위키 페이지 경로 등)
    pub page_path: Option<String>,
    /// 원본 문서 URL
    pub url: Option<String>,
}

impl SourceReference {
    /// 참조 ID (`{response_id}_src{index}`)
    pub fn reference_id(&self) -> String {
        format!("{}{}{}", self.response_id, REFERENCE_DELIMITER, self.source_index)
    }

    /// 프롬프트/답변에 쓰인 인용 번호 표기 ("[1]", "[2]", ...)
    pub fn citation(&self) -> String {
        format!("[{}]", self.source_index + 1)
    }
}

/// 참조 ID를 (응답 ID, 인덱스)로 분해
///
/// `_src` 구분자가 없거나 인덱스가 숫자가 아니면 `Error::NotFound`.
pub fn parse_reference_id(reference_id: &str) -> Result<(String, usize)> {
    let pos = reference_id.rfind(REFERENCE_DELIMITER).ok_or_else(|| {
        Error::NotFound(format!("source reference: {}", reference_id))
    })?;

    let response_id = &reference_id[..pos];
    let index_part = &reference_id[pos + REFERENCE_DELIMITER.len()..];

    let index: usize = index_part
        .parse()
        .map_err(|_| Error::NotFound(format!("source reference: {}", reference_id)))?;

    if response_id.is_empty() {
        return Err(Error::NotFound(format!(
            "source reference: {}",
            reference_id
        )));
    }

    Ok((response_id.to_string(), index))
}

/// 순위가 매겨진 청크들을 출처 참조 목록으로 변환
///
/// 입력 순서(이미 유사도 내림차순)를 그대로 보존하므로
/// 인덱스가 프롬프트의 인용 번호와 1:1로 대응합니다.
pub fn map_source_references(
    response_id: &str,
    ranked: &[RankedChunk],
    documents: &[Option<Document>],
) -> Vec<SourceReference> {
    ranked
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let document = documents.get(index).and_then(|d| d.as_ref());

            let doc_title = document
                .and_then(|d| d.title.clone())
                .unwrap_or_else(|| format!("Document {}", chunk.doc_id));

            SourceReference {
                response_id: response_id.to_string(),
                source_index: index,
                title: format!("[{}] {}", index + 1, doc_title),
                content: chunk.chunk_text.clone(),
                kind: chunk.kind,
                confidence: chunk.similarity,
                page_title: document.and_then(|d| d.title.clone()),
                page_path: document.and_then(|d| d.page_path.clone()),
                url: document.map(|d| d.url.clone()),
            }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(response_id: &str, index: usize) -> SourceReference {
        SourceReference {
            response_id: response_id.to_string(),
            source_index: index,
            title: format!("[{}] Some Doc", index + 1),
            content: "Chunk text.".to_string(),
            kind: ContentKind::Composite,
            confidence: 0.9,
            page_title: Some("Some Doc".to_string()),
            page_path: Some("/wiki/some-doc".to_string()),
            url: Some("https://wiki.example/some-doc".to_string()),
        }
    }

    #[test]
    fn test_reference_id_roundtrip() {
        for index in [0usize, 1, 7, 42] {
            let id = reference("resp_0a1b2c", index).reference_id();
            let (response_id, parsed_index) = parse_reference_id(&id).unwrap();
            assert_eq!(response_id, "resp_0a1b2c");
            assert_eq!(parsed_index, index);
        }
    }

    #[test]
    fn test_citation_is_one_based() {
        assert_eq!(reference("resp_x", 0).citation(), "[1]");
        assert_eq!(reference("resp_x", 4).citation(), "[5]");
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        assert!(matches!(
            parse_reference_id("resp_without_delimiter"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            parse_reference_id("resp_abc_srcNaN"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(parse_reference_id("_src0"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_parse_uses_last_delimiter() {
        // 응답 ID 자체에 _src가 들어가도 마지막 구분자로 분해
        let (response_id, index) = parse_reference_id("resp_src_test_src3").unwrap();
        assert_eq!(response_id, "resp_src_test");
        assert_eq!(index, 3);
    }

    #[test]
    fn test_map_source_references_preserves_order() {
        let ranked = vec![
            RankedChunk {
                doc_id: 10,
                chunk_index: 0,
                chunk_text: "Most relevant.".to_string(),
                kind: ContentKind::Composite,
                source_urls: vec![],
                similarity: 0.92,
            },
            RankedChunk {
                doc_id: 11,
                chunk_index: 2,
                chunk_text: "Second best.".to_string(),
                kind: ContentKind::Composite,
                source_urls: vec![],
                similarity: 0.87,
            },
        ];

        let references = map_source_references("resp_xyz", &ranked, &[None, None]);

        assert_eq!(references.len(), 2);
        assert_eq!(references[0].source_index, 0);
        assert_eq!(references[0].reference_id(), "resp_xyz_src0");
        assert_eq!(references[0].title, "[1] Document 10");
        assert!((references[0].confidence - 0.92).abs() < 0.0001);
        assert_eq!(references[1].reference_id(), "resp_xyz_src1");
        assert_eq!(references[1].title, "[2] Document 11");
    }
}
