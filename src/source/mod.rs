//! 문서 소스 모듈
//!
//! 인제스트 파이프라인에 문서를 공급하는 소스 추상화입니다.
//! 웹 페이지, 로컬 파일/폴더, 인라인 텍스트를 동일한 인터페이스로 다룹니다.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::collector::{CollectorConfig, FileCollector, FileType};
use crate::extractor::ContentExtractor;
use crate::knowledge::Block;
use crate::scraper::WebScraper;

// ============================================================================
// Types
// ============================================================================

/// 소스에서 가져온 문서
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// 문서 식별 URL (파일은 file://, 인라인 텍스트는 text:// 스킴)
    pub url: String,
    /// 문서 제목
    pub title: Option<String>,
    /// 원본 내 위치 (위키 페이지 경로, 파일 경로)
    pub page_path: Option<String>,
    /// 청커 입력용 블록 시퀀스
    pub blocks: Vec<Block>,
}

// ============================================================================
// DocumentSource Trait
// ============================================================================

/// 문서 소스 트레이트
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// 소스에서 문서들을 가져옴
    async fn fetch(&self) -> Result<Vec<SourceDocument>>;

    /// 출처 시스템 이름 (출처 인용에 표시됨)
    fn origin(&self) -> &str;
}

// ============================================================================
// WebPageSource
// ============================================================================

/// 웹 페이지 소스
pub struct WebPageSource {
    scraper: WebScraper,
    url: String,
}

impl WebPageSource {
    /// URL로 생성
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            scraper: WebScraper::new()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DocumentSource for WebPageSource {
    async fn fetch(&self) -> Result<Vec<SourceDocument>> {
        let page = self.scraper.scrape(&self.url).await?;

        Ok(vec![SourceDocument {
            url: page.url.clone(),
            title: page.title.clone(),
            page_path: page_path_from_url(&page.url),
            blocks: page.blocks,
        }])
    }

    fn origin(&self) -> &str {
        "web"
    }
}

// ============================================================================
// FileSource
// ============================================================================

/// 로컬 파일/폴더 소스
pub struct FileSource {
    collector: FileCollector,
    extractor: ContentExtractor,
    path: PathBuf,
}

impl FileSource {
    /// 경로로 생성 (파일 또는 폴더)
    pub fn new(path: PathBuf) -> Self {
        Self::with_config(path, CollectorConfig::default())
    }

    /// 수집 설정 지정하여 생성
    pub fn with_config(path: PathBuf, config: CollectorConfig) -> Self {
        Self {
            collector: FileCollector::new(config),
            extractor: ContentExtractor::new(),
            path,
        }
    }
}

#[async_trait]
impl DocumentSource for FileSource {
    async fn fetch(&self) -> Result<Vec<SourceDocument>> {
        let files = if self.path.is_dir() {
            self.collector.collect_directory(&self.path)?
        } else {
            self.collector
                .collect_file(&self.path)?
                .into_iter()
                .collect()
        };

        let mut documents = Vec::with_capacity(files.len());

        for file in files {
            let contents = match self.extractor.extract(&file.path, file.file_type).await {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::warn!("Failed to extract {:?}: {}", file.path, e);
                    continue;
                }
            };

            let path_display = file.path.display().to_string();
            let title = file
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string());

            match file.file_type {
                // PDF는 페이지 단위로 별도 문서 (페이지별 출처 인용)
                FileType::Pdf => {
                    for content in contents {
                        if content.text.trim().is_empty() {
                            continue;
                        }
                        let page = content.metadata.page_number.unwrap_or(1);
                        documents.push(SourceDocument {
                            url: format!("file://{}#page={}", path_display, page),
                            title: title
                                .as_ref()
                                .map(|t| format!("{} (p.{})", t, page)),
                            page_path: Some(format!("{}#page={}", path_display, page)),
                            blocks: vec![Block::text(content.text)],
                        });
                    }
                }
                FileType::Text => {
                    let blocks: Vec<Block> = contents
                        .into_iter()
                        .filter(|c| !c.text.trim().is_empty())
                        .map(|c| Block::text(c.text))
                        .collect();

                    if blocks.is_empty() {
                        continue;
                    }

                    documents.push(SourceDocument {
                        url: format!("file://{}", path_display),
                        title: title.clone(),
                        page_path: Some(path_display.clone()),
                        blocks,
                    });
                }
            }
        }

        Ok(documents)
    }

    fn origin(&self) -> &str {
        "file"
    }
}

// ============================================================================
// TextSource
// ============================================================================

/// 인라인 텍스트 소스
///
/// CLI에서 바로 넘긴 텍스트를 문서 하나로 취급합니다.
pub struct TextSource {
    text: String,
    title: Option<String>,
}

impl TextSource {
    /// 텍스트로 생성
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            title: None,
        }
    }

    /// 제목 지정
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[async_trait]
impl DocumentSource for TextSource {
    async fn fetch(&self) -> Result<Vec<SourceDocument>> {
        let id = uuid::Uuid::new_v4().simple().to_string();

        Ok(vec![SourceDocument {
            url: format!("text://{}", id),
            title: self.title.clone(),
            page_path: None,
            blocks: vec![Block::text(self.text.clone())],
        }])
    }

    fn origin(&self) -> &str {
        "text"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// URL에서 페이지 경로 추출
fn page_path_from_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let path = parsed.path();
    if path.is_empty() || path == "/" {
        None
    } else {
        Some(path.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
