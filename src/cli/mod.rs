//! CLI 모듈
//!
//! wiki-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::collector::{CollectionStats, CollectorConfig, FileCollector};
use crate::completion;
use crate::config::{get_data_dir, EngineConfig};
use crate::embedding;
use crate::knowledge::DocumentStore;
use crate::rag::{ConversationTurn, RagEngine};
use crate::source::{DocumentSource, FileSource, TextSource, WebPageSource};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "wiki-rag")]
#[command(version, about = "위키 기반 RAG 어시스턴트", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// URL, 파일, 폴더, 또는 텍스트를 지식베이스에 추가
    Ingest {
        /// 수집할 URL
        #[arg(short, long)]
        url: Option<String>,

        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 수집할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 문서 태그
        #[arg(long)]
        tag: Option<String>,

        /// PDF 파일 건너뛰기
        #[arg(long)]
        skip_pdfs: bool,
    },

    /// 질문하고 출처 인용이 달린 답변 받기
    Ask {
        /// 질문
        query: String,

        /// 대화 이력 JSON 파일 ([{"role":"user","content":"..."}, ...])
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// 검색할 출처 개수 (기본값: 설정의 top_k)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// 지식베이스 검색 (답변 생성 없이)
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// 벡터 검색 대신 키워드(LIKE) 검색 사용
        #[arg(short, long)]
        keyword: bool,
    },

    /// 저장된 출처 참조 조회
    Sources {
        /// 참조 ID (예: resp_abc123_src0)
        #[arg(short, long)]
        id: Option<String>,

        /// 응답 ID의 모든 출처 조회
        #[arg(short, long)]
        response: Option<String>,
    },

    /// 저장된 문서 목록
    List {
        /// 태그 필터
        #[arg(short, long)]
        tag: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 URL
        #[arg(short, long)]
        url: Option<String>,

        /// 삭제할 문서 ID
        #[arg(short, long)]
        id: Option<i64>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            url,
            text,
            file,
            dir,
            tag,
            skip_pdfs,
        } => cmd_ingest(url, text, file, dir, tag, skip_pdfs).await,
        Commands::Ask {
            query,
            context,
            limit,
        } => cmd_ask(&query, context, limit).await,
        Commands::Search {
            query,
            limit,
            keyword,
        } => cmd_search(&query, limit, keyword).await,
        Commands::Sources { id, response } => cmd_sources(id, response).await,
        Commands::List { tag, limit } => cmd_list(tag, limit).await,
        Commands::Delete { url, id } => cmd_delete(url, id).await,
        Commands::Status => cmd_status().await,
    }
}

/// 임베딩/생성 API 키 확인
fn require_api_keys() -> Result<()> {
    if !embedding::has_api_key() {
        bail!(
            "임베딩 API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export HF_API_KEY=your-api-key\n  \
             또는\n  \
             export OPENAI_API_KEY=your-api-key"
        );
    }
    if !completion::has_api_key() {
        bail!(
            "생성 API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

/// 문서 저장소만 필요한 명령어용 (API 키 불필요)
fn open_store() -> Result<DocumentStore> {
    let config = EngineConfig::from_env()?;
    DocumentStore::open_in_dir(&config.data_dir).context("문서 저장소 열기 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(
    url: Option<String>,
    text: Option<String>,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    tag: Option<String>,
    skip_pdfs: bool,
) -> Result<()> {
    require_api_keys()?;

    let engine = RagEngine::open_default()
        .await
        .context("RagEngine 초기화 실패")?;

    let source: Box<dyn DocumentSource> = if let Some(ref url_str) = url {
        println!("[*] URL 스크래핑 중: {}", url_str);
        Box::new(WebPageSource::new(url_str.clone()).context("WebPageSource 생성 실패")?)
    } else if let Some(text_content) = text {
        Box::new(TextSource::new(text_content))
    } else if let Some(path) = file.or(dir) {
        if !path.exists() {
            bail!("경로를 찾을 수 없습니다: {}", path.display());
        }

        // 수집 대상 미리 보기
        let config = CollectorConfig {
            skip_pdfs,
            ..Default::default()
        };
        let collector = FileCollector::new(config.clone());
        let files = if path.is_dir() {
            collector.collect_directory(&path)?
        } else {
            collector.collect_file(&path)?.into_iter().collect()
        };

        if files.is_empty() {
            println!("[!] 수집할 파일이 없습니다.");
            return Ok(());
        }

        let stats = CollectionStats::from_files(&files);
        println!("[*] 수집 대상: {} 파일", stats.total_files);
        println!("    텍스트: {}, PDF: {}", stats.text_files, stats.pdf_files);
        println!("    총 크기: {}", format_bytes(stats.total_size as usize));
        println!();

        Box::new(FileSource::with_config(path, config))
    } else {
        bail!("--url, --text, --file, --dir 중 하나를 지정해야 합니다");
    };

    println!("[*] 문서 저장 및 임베딩 생성 중...");

    let reports = engine
        .ingest_source(source.as_ref(), tag)
        .await
        .context("문서 수집 실패")?;

    if reports.is_empty() {
        println!("[!] 수집된 문서가 없습니다.");
        return Ok(());
    }

    let mut success_count = 0;
    let mut error_count = 0;

    for report in &reports {
        if report.success {
            success_count += 1;
        } else {
            error_count += 1;
            if let Some(ref error) = report.error {
                println!("[!] 실패: {}", error);
            }
        }
    }

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", success_count, error_count);

    for report in reports.iter().filter(|r| r.success) {
        if let Some(id) = report.document_id {
            println!(
                "     문서 #{}: 청크 {} 중 {} 임베딩됨",
                id, report.chunks_processed, report.embedding_count
            );
        }
    }

    Ok(())
}

/// 질의 명령어 (ask)
///
/// 검색 + 생성 전체 파이프라인을 수행하고 출처를 함께 표시합니다.
async fn cmd_ask(query: &str, context: Option<PathBuf>, limit: Option<usize>) -> Result<()> {
    require_api_keys()?;

    let history: Vec<ConversationTurn> = match context {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("대화 이력 파일 읽기 실패: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("대화 이력 JSON 파싱 실패: {}", path.display()))?
        }
        None => vec![],
    };

    println!("[*] 질의 중: \"{}\"", query);

    let mut config = EngineConfig::from_env()?;
    if let Some(limit) = limit {
        config.top_k = limit;
    }

    let engine = RagEngine::open_with_config(config)
        .await
        .context("RagEngine 초기화 실패")?;

    let response = engine.query(query, &history).await.context("질의 실패")?;

    println!();
    println!("{}", response.response);
    println!();

    if response.source_references.is_empty() {
        println!("[!] 인용된 출처가 없습니다.");
    } else {
        println!("[OK] 출처 ({} 건):", response.source_references.len());
        for source in &response.source_references {
            println!(
                "  {} [유사도: {:.4}] (참조 ID: {})",
                source.title,
                source.confidence,
                source.reference_id()
            );
            if let Some(ref url) = source.url {
                println!("      URL: {}", url);
            }
            println!("      {}", truncate_text(&source.content, 150));
        }
    }

    println!();
    println!("[*] 응답 ID: {}", response.response_id);

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(query: &str, limit: usize, keyword: bool) -> Result<()> {
    println!("[*] 검색 중: \"{}\"", query);

    if keyword {
        // 키워드(LIKE) 검색은 API 키 없이 동작
        let store = open_store()?;
        let docs = store.search_like(query, limit).context("키워드 검색 실패")?;

        if docs.is_empty() {
            println!("\n[!] 검색 결과가 없습니다.");
            return Ok(());
        }

        println!("\n[OK] 검색 결과 ({} 건):\n", docs.len());
        for (i, doc) in docs.iter().enumerate() {
            let title_display = doc.title.as_deref().unwrap_or("-");
            println!("{}. [KW] Doc #{} {}", i + 1, doc.id, title_display);
            println!("   URL: {}", doc.url);
            println!("   내용: {}", truncate_text(&doc.content, 200));
            println!();
        }
        return Ok(());
    }

    if !embedding::has_api_key() {
        bail!(
            "벡터 검색에는 임베딩 API 키가 필요합니다.\n\
             설정: export HF_API_KEY=your-key (또는 --keyword 사용)"
        );
    }

    let engine = RagEngine::open_default()
        .await
        .context("RagEngine 초기화 실패")?;

    let results = engine.search(query, limit).await.context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [VEC] [유사도: {:.4}] Doc #{} (청크 {})",
            i + 1,
            result.similarity,
            result.doc_id,
            result.chunk_index
        );

        if let Some(doc) = engine.store().get_document(result.doc_id)? {
            if let Some(ref title) = doc.title {
                println!("   제목: {}", title);
            }
            println!("   URL: {}", doc.url);
        }

        println!("   내용: {}", truncate_text(&result.chunk_text, 200));
        println!();
    }

    Ok(())
}

/// 출처 조회 명령어 (sources)
async fn cmd_sources(id: Option<String>, response: Option<String>) -> Result<()> {
    let store = open_store()?;

    let references = if let Some(ref reference_id) = id {
        let (response_id, index) = crate::rag::parse_reference_id(reference_id)
            .with_context(|| format!("잘못된 참조 ID: {}", reference_id))?;

        match store.get_source_reference(&response_id, index)? {
            Some(reference) => vec![reference],
            None => bail!("참조 ID '{}'인 출처를 찾을 수 없습니다", reference_id),
        }
    } else if let Some(ref response_id) = response {
        let stored = store
            .get_response(response_id)?
            .ok_or_else(|| anyhow::anyhow!("응답 ID '{}'를 찾을 수 없습니다", response_id))?;

        println!("[*] 질의: {}", stored.query);
        println!("[*] 답변: {}", truncate_text(&stored.answer, 200));
        println!();

        store.sources_for_response(response_id)?
    } else {
        bail!("--id 또는 --response 중 하나를 지정해야 합니다");
    };

    if references.is_empty() {
        println!("[!] 저장된 출처가 없습니다.");
        return Ok(());
    }

    println!("[OK] 출처 ({} 건):\n", references.len());

    for reference in &references {
        println!("  {} (참조 ID: {})", reference.title, reference.reference_id());
        println!("      종류: {} | 유사도: {:.4}", reference.kind.as_str(), reference.confidence);
        if let Some(ref page_title) = reference.page_title {
            println!("      문서: {}", page_title);
        }
        if let Some(ref url) = reference.url {
            println!("      URL: {}", url);
        }
        println!("      {}", truncate_text(&reference.content, 200));
        println!();
    }

    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(tag: Option<String>, limit: usize) -> Result<()> {
    let store = open_store()?;

    let docs = store
        .list_documents(limit, tag.as_deref())
        .context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        let tag_display = doc.tag.as_deref().unwrap_or("-");
        let title_display = doc
            .title
            .as_ref()
            .map(|t| truncate_text(t, 40))
            .unwrap_or_else(|| "-".to_string());

        println!("  #{:<4} [{}] [{}] {}", doc.id, doc.origin, tag_display, title_display);
        println!("        URL: {}", doc.url);
        println!(
            "        {} | {} chars",
            doc.created_at.format("%Y-%m-%d %H:%M"),
            doc.content.chars().count()
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
///
/// 문서 행과 벡터를 함께 삭제합니다. 임베딩 키가 없으면
/// 벡터 저장소를 열 수 없으므로 문서 행만 삭제합니다.
async fn cmd_delete(url: Option<String>, id: Option<i64>) -> Result<()> {
    let store = open_store()?;

    let doc_id = if let Some(id) = id {
        id
    } else if let Some(ref url_str) = url {
        let doc = store
            .get_by_url(url_str)
            .context("문서 조회 실패")?
            .ok_or_else(|| anyhow::anyhow!("URL '{}'인 문서를 찾을 수 없습니다", url_str))?;
        doc.id
    } else {
        bail!("--id 또는 --url 중 하나를 지정해야 합니다");
    };

    if store.get_document(doc_id)?.is_none() {
        bail!("ID {}인 문서를 찾을 수 없습니다", doc_id);
    }

    // 벡터 삭제 (임베딩 키가 있어야 벡터 저장소 차원을 알 수 있음)
    if embedding::has_api_key() && completion::has_api_key() {
        let engine = RagEngine::open_default()
            .await
            .context("RagEngine 초기화 실패")?;
        engine
            .vector()
            .delete_by_doc_id(doc_id)
            .await
            .context("벡터 삭제 실패")?;
        engine.store().delete_document(doc_id).context("문서 삭제 실패")?;
        println!("[OK] 문서 #{} 삭제됨 (벡터 포함)", doc_id);
    } else {
        store.delete_document(doc_id).context("문서 삭제 실패")?;
        println!("[OK] 문서 #{} 삭제됨", doc_id);
        println!("     (주의: API 키가 없어 벡터 인덱스는 정리되지 않았습니다)");
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("wiki-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = get_data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    if embedding::has_api_key() {
        println!("[OK] 임베딩 API 키: 설정됨");
    } else {
        println!("[!] 임베딩 API 키: 미설정");
        println!("    설정: export HF_API_KEY=your-key");
    }

    if completion::has_api_key() {
        println!("[OK] 생성 API 키: 설정됨");
    } else {
        println!("[!] 생성 API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match open_store() {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!("[OK] 저장된 문서: {} 건", stats.document_count);
                println!("[OK] 저장된 응답: {} 건", stats.response_count);
                println!(
                    "     총 콘텐츠: {}",
                    format_bytes(stats.total_content_bytes)
                );
            }
            Err(e) => {
                println!("[!] 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            println!("[!] 문서 저장소 열기 실패: {}", e);
        }
    }

    // 벡터 스토어 상태 (API 키가 있을 때만)
    if embedding::has_api_key() && completion::has_api_key() {
        match RagEngine::open_default().await {
            Ok(engine) => match engine.vector().count().await {
                Ok(count) => {
                    println!("[OK] 벡터 인덱스: {} 청크", count);
                }
                Err(e) => {
                    tracing::debug!("Vector stats unavailable: {}", e);
                }
            },
            Err(e) => {
                tracing::debug!("RagEngine init failed: {}", e);
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        let truncated = truncate_text(korean, 5);
        assert_eq!(truncated, "안녕하세요...");
    }
}
