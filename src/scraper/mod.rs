//! 웹 스크래퍼 모듈 - 위키 페이지 콘텐츠 추출
//!
//! HTML에서 제목과 블록 단위 콘텐츠를 추출합니다.
//! 본문 단락은 텍스트 블록으로, pre/code는 코드 블록으로, img의 alt는
//! 이미지 캡션 블록으로 수집되어 청커 입력이 됩니다.

use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};

use crate::knowledge::Block;

/// 스크랩된 페이지
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    /// 페이지 제목
    pub title: Option<String>,
    /// 청커 입력용 블록 시퀀스 (문서 순서 유지)
    pub blocks: Vec<Block>,
    /// 원본 URL
    pub url: String,
}

impl ScrapedPage {
    /// 블록들을 이어붙인 전체 본문
    pub fn full_text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 웹 스크래퍼
pub struct WebScraper {
    client: reqwest::Client,
}

impl WebScraper {
    /// 새 스크래퍼 생성
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("wiki-rag/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("HTTP 클라이언트 생성 실패")?;

        Ok(Self { client })
    }

    /// URL에서 페이지 추출
    pub async fn scrape(&self, url: &str) -> Result<ScrapedPage> {
        tracing::info!("Scraping: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP 요청 실패")?;

        let html = response.text().await.context("응답 본문 읽기 실패")?;

        Ok(self.parse(&html, url))
    }

    /// HTML 문자열 파싱
    pub fn parse(&self, html: &str, url: &str) -> ScrapedPage {
        let document = Html::parse_document(html);

        ScrapedPage {
            title: self.extract_title(&document),
            blocks: self.extract_blocks(&document),
            url: url.to_string(),
        }
    }

    /// 제목 추출 (title 태그, 없으면 h1)
    fn extract_title(&self, document: &Html) -> Option<String> {
        if let Ok(title_selector) = Selector::parse("title") {
            if let Some(element) = document.select(&title_selector).next() {
                let title = element.text().collect::<String>().trim().to_string();
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }

        if let Ok(h1_selector) = Selector::parse("h1") {
            if let Some(element) = document.select(&h1_selector).next() {
                let title = element.text().collect::<String>().trim().to_string();
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }

        None
    }

    /// 블록 단위 콘텐츠 추출 (문서 순서 유지)
    fn extract_blocks(&self, document: &Html) -> Vec<Block> {
        let mut blocks = Vec::new();

        let selector = match Selector::parse("h1, h2, h3, h4, h5, h6, p, li, pre, img") {
            Ok(s) => s,
            Err(_) => return blocks,
        };

        for element in document.select(&selector) {
            match element.value().name() {
                "pre" => {
                    // pre 내부 코드는 들여쓰기/줄바꿈을 보존
                    let code = element.text().collect::<String>();
                    let code = code.trim_matches('\n').to_string();
                    if !code.trim().is_empty() {
                        blocks.push(Block::code(code));
                    }
                }
                "img" => {
                    if let Some(alt) = element.value().attr("alt") {
                        let alt = alt.trim();
                        if !alt.is_empty() {
                            blocks.push(Block::image_caption(alt.to_string()));
                        }
                    }
                }
                _ => {
                    // li 안의 중첩 목록은 부모에서 한 번만 수집
                    let text = collapse_whitespace(&element.text().collect::<String>());
                    if text.is_empty() {
                        continue;
                    }
                    let urls = extract_link_urls(&element);
                    blocks.push(Block::text(text).with_urls(urls));
                }
            }
        }

        blocks
    }
}

impl Default for WebScraper {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("WebScraper 생성 실패: {}", e);
            // 최소한의 클라이언트로 폴백
            Self {
                client: reqwest::Client::new(),
            }
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 요소 안의 링크 href 수집 (절대 URL만)
fn extract_link_urls(element: &ElementRef) -> Vec<String> {
    let mut urls = Vec::new();

    if let Ok(selector) = Selector::parse("a[href]") {
        for link in element.select(&selector) {
            if let Some(href) = link.value().attr("href") {
                if href.starts_with("http://") || href.starts_with("https://") {
                    let href = href.to_string();
                    if !urls.contains(&href) {
                        urls.push(href);
                    }
                }
            }
        }
    }

    urls
}

/// 연속 공백 정리
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::ContentKind;

    #[test]
    fn test_scraper_creation() {
        let scraper = WebScraper::new();
        assert!(scraper.is_ok());
    }

    #[test]
    fn test_extract_title() {
        let scraper = WebScraper::new().expect("scraper creation failed");
        let html = r#"
            <html>
                <head><title>Test Page Title</title></head>
                <body><h1>Main Heading</h1></body>
            </html>
        "#;
        let page = scraper.parse(html, "https://wiki.example/test");
        assert_eq!(page.title, Some("Test Page Title".to_string()));
    }

    #[test]
    fn test_extract_title_h1_fallback() {
        let scraper = WebScraper::new().expect("scraper creation failed");
        let html = r#"
            <html>
                <head><title></title></head>
                <body><h1>H1 Heading</h1></body>
            </html>
        "#;
        let page = scraper.parse(html, "https://wiki.example/test");
        assert_eq!(page.title, Some("H1 Heading".to_string()));
    }

    #[test]
    fn test_extract_blocks_in_order() {
        let scraper = WebScraper::new().expect("scraper creation failed");
        let html = r#"
            <html><body>
                <h1>Deploy Guide</h1>
                <p>First run the build.</p>
                <pre>cargo build --release</pre>
                <p>Then push the image.</p>
            </body></html>
        "#;
        let page = scraper.parse(html, "https://wiki.example/deploy");

        assert_eq!(page.blocks.len(), 4);
        assert_eq!(page.blocks[0].text, "Deploy Guide");
        assert_eq!(page.blocks[1].kind, ContentKind::Text);
        assert_eq!(page.blocks[2].kind, ContentKind::Code);
        assert_eq!(page.blocks[2].text, "cargo build --release");
        assert_eq!(page.blocks[3].text, "Then push the image.");
    }

    #[test]
    fn test_extract_blocks_collects_links() {
        let scraper = WebScraper::new().expect("scraper creation failed");
        let html = r#"
            <html><body>
                <p>See <a href="https://docs.example/guide">the guide</a>
                   and <a href="/relative">this</a>.</p>
            </body></html>
        "#;
        let page = scraper.parse(html, "https://wiki.example/page");

        assert_eq!(page.blocks.len(), 1);
        // 상대 경로는 제외, 절대 URL만 수집
        assert_eq!(
            page.blocks[0].source_urls,
            vec!["https://docs.example/guide".to_string()]
        );
    }

    #[test]
    fn test_extract_image_caption() {
        let scraper = WebScraper::new().expect("scraper creation failed");
        let html = r#"
            <html><body>
                <img src="arch.png" alt="Service architecture diagram">
                <img src="decor.png" alt="">
            </body></html>
        "#;
        let page = scraper.parse(html, "https://wiki.example/arch");

        assert_eq!(page.blocks.len(), 1);
        assert_eq!(page.blocks[0].kind, ContentKind::ImageCaption);
        assert_eq!(page.blocks[0].text, "Service architecture diagram");
    }

    #[test]
    fn test_full_text_joins_blocks() {
        let scraper = WebScraper::new().expect("scraper creation failed");
        let html = "<html><body><p>One.</p><p>Two.</p></body></html>";
        let page = scraper.parse(html, "https://wiki.example/short");
        assert_eq!(page.full_text(), "One.\nTwo.");
    }
}
