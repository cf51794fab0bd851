//! # Scraper
//!
//! Para cada região: pagina a API até o último token, classifica os itens,
//! grava o CSV bruto, reordena as colunas para o schema canônico e envia um
//! único objeto por região para a camada bruta:
//!
//! `<raw_location>/region=<região minúscula>/<yymmddHHMMSS>_<REGIÃO>_videos.csv`

use std::collections::HashMap;

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::api::PageSource;
use crate::errors::{ApiError, ScrapeError};
use crate::storage::{ObjectStore, StorageLocation};
use crate::video::{ItemOutcome, RAW_HEADER, SkipReason, VideoRecord, classify_item};

/// Ordem final das colunas do CSV enviado.
pub const CANONICAL_COLUMNS: [&str; 16] = [
    "video_id",
    "trending_date",
    "title",
    "channel_title",
    "category_id",
    "publish_time",
    "tags",
    "views",
    "likes",
    "dislikes",
    "comment_count",
    "thumbnail_link",
    "comments_disabled",
    "ratings_disabled",
    "video_error_or_removed",
    "description",
];

/// Formato da data de ingestão (local).
pub const TRENDING_DATE_FORMAT: &str = "%y.%d.%m";

const FILE_TIMESTAMP_FORMAT: &str = "%y%m%d%H%M%S";

/// Coluna do CSV bruto que alimenta cada coluna canônica.
pub fn source_column(canonical: &str) -> &str {
    match canonical {
        "channel_title" => "channelTitle",
        "category_id" => "categoryId",
        "publish_time" => "publishedAt",
        "views" => "view_count",
        other => other,
    }
}

/// Reordena uma linha bruta (chaveada pelo cabeçalho bruto) para o schema canônico.
/// Colunas sem origem ficam vazias.
pub fn canonical_row<'a>(raw: &HashMap<&str, &'a str>) -> Vec<&'a str> {
    CANONICAL_COLUMNS
        .iter()
        .map(|column| raw.get(source_column(column)).copied().unwrap_or(""))
        .collect()
}

/// Primeira passada: cabeçalho bruto + uma linha sanitizada por vídeo.
pub fn raw_csv(records: &[VideoRecord]) -> String {
    let mut out = RAW_HEADER.join(",");
    out.push('\n');
    for record in records {
        out.push_str(&record.raw_line());
        out.push('\n');
    }
    out
}

/// Segunda passada: relê o CSV bruto e grava com o cabeçalho canônico.
pub fn reformat_csv(raw: &str) -> Result<Vec<u8>, ScrapeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(raw.as_bytes());
    let headers = reader.headers()?.clone();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CANONICAL_COLUMNS)?;

    for record in reader.records() {
        let record = record?;
        let row: HashMap<&str, &str> = headers.iter().zip(record.iter()).collect();
        writer.write_record(canonical_row(&row))?;
    }

    writer.into_inner().map_err(|e| ScrapeError::Io(e.into_error()))
}

/// Resultado da paginação de uma região.
#[derive(Debug, Clone)]
pub struct RegionBatch {
    pub region: String,
    pub records: Vec<VideoRecord>,
    pub skipped: Vec<SkipReason>,
    pub pages: usize,
}

/// Resumo do objeto enviado para uma região.
#[derive(Debug, Clone, Serialize)]
pub struct RegionUpload {
    pub region: String,
    pub bucket: String,
    pub key: String,
    pub rows: usize,
    pub skipped: usize,
    pub pages: usize,
}

pub struct Scraper<'a, S: PageSource> {
    source: S,
    store: &'a dyn ObjectStore,
    raw_location: StorageLocation,
    max_pages: usize,
}

impl<'a, S: PageSource> Scraper<'a, S> {
    pub fn new(
        source: S,
        store: &'a dyn ObjectStore,
        raw_location: StorageLocation,
        max_pages: usize,
    ) -> Self {
        Self {
            source,
            store,
            raw_location,
            max_pages,
        }
    }

    /// Processa as regiões em sequência. Qualquer erro, inclusive o limite de
    /// requisições, interrompe todas as regiões restantes.
    pub fn run(&self, regions: &[String]) -> Result<Vec<RegionUpload>, ScrapeError> {
        let mut uploads = Vec::with_capacity(regions.len());
        for region in regions {
            let batch = self.collect_region_pages(region).inspect_err(|e| {
                error!(region = %region, error = %e, "falha ao paginar a região");
            })?;
            let upload = self.upload_region(&batch).inspect_err(|e| {
                error!(region = %region, error = %e, "falha ao enviar o CSV da região");
            })?;
            uploads.push(upload);
        }
        Ok(uploads)
    }

    /// Segue os tokens de continuação até uma página sem token.
    pub fn collect_region_pages(&self, region: &str) -> Result<RegionBatch, ApiError> {
        let trending_date = Local::now().format(TRENDING_DATE_FORMAT).to_string();

        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
            pb.set_style(style);
        }

        let mut batch = RegionBatch {
            region: region.to_string(),
            records: Vec::new(),
            skipped: Vec::new(),
            pages: 0,
        };
        let mut token: Option<String> = None;

        loop {
            if batch.pages == self.max_pages {
                pb.abandon();
                return Err(ApiError::PageLimitExceeded {
                    region: region.to_string(),
                    max_pages: self.max_pages,
                });
            }
            batch.pages += 1;

            let page = match self.source.fetch_page(region, token.as_deref(), batch.pages) {
                Ok(page) => page,
                Err(e) => {
                    pb.abandon();
                    return Err(e);
                }
            };

            for item in &page.items {
                match classify_item(item, &trending_date) {
                    ItemOutcome::Included(record) => batch.records.push(record),
                    ItemOutcome::Skipped(reason) => {
                        debug!(region, page = batch.pages, ?reason, "item descartado");
                        batch.skipped.push(reason);
                    }
                }
            }

            pb.set_message(format!(
                "{}: página {} ({} vídeos)",
                region,
                batch.pages,
                batch.records.len()
            ));
            pb.tick();

            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        pb.finish_and_clear();
        info!(
            region,
            pages = batch.pages,
            rows = batch.records.len(),
            skipped = batch.skipped.len(),
            "paginação concluída"
        );
        Ok(batch)
    }

    /// Gera o CSV canônico da região e envia como um único objeto.
    pub fn upload_region(&self, batch: &RegionBatch) -> Result<RegionUpload, ScrapeError> {
        let raw = raw_csv(&batch.records);
        let body = reformat_csv(&raw)?;

        let filename = format!(
            "{}_{}_videos.csv",
            Local::now().format(FILE_TIMESTAMP_FORMAT),
            batch.region.to_uppercase()
        );
        let key = self.raw_location.key(&format!(
            "region={}/{}",
            batch.region.to_lowercase(),
            filename
        ));

        info!(region = %batch.region, key = %key, "enviando dados da região");
        self.store.put(self.raw_location.bucket(), &key, &body)?;

        Ok(RegionUpload {
            region: batch.region.clone(),
            bucket: self.raw_location.bucket().to_string(),
            key,
            rows: batch.records.len(),
            skipped: batch.skipped.len(),
            pages: batch.pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::VideoPage;
    use crate::storage::LocalObjectStore;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Devolve páginas roteirizadas e registra cada chamada (região, token).
    struct ScriptedSource {
        pages: RefCell<VecDeque<Result<VideoPage, ApiError>>>,
        calls: RefCell<Vec<(String, Option<String>)>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<VideoPage, ApiError>>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl PageSource for &ScriptedSource {
        fn fetch_page(
            &self,
            region: &str,
            page_token: Option<&str>,
            _page: usize,
        ) -> Result<VideoPage, ApiError> {
            self.calls
                .borrow_mut()
                .push((region.to_string(), page_token.map(str::to_string)));
            self.pages
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(VideoPage::default()))
        }
    }

    fn video(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "snippet": {"title": format!("video {}", id), "channelTitle": "c", "categoryId": "22"},
            "statistics": {"viewCount": "10", "likeCount": "1", "dislikeCount": "0", "commentCount": "2"}
        })
    }

    fn page(ids: &[&str], token: Option<&str>) -> Result<VideoPage, ApiError> {
        Ok(VideoPage {
            items: ids.iter().map(|id| video(id)).collect(),
            next_page_token: token.map(str::to_string),
        })
    }

    fn raw_location() -> StorageLocation {
        StorageLocation::parse("s3://raw-bucket/youtube/raw_statistics").unwrap()
    }

    #[test]
    fn pagination_stops_at_first_page_without_token() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let source = ScriptedSource::new(vec![
            page(&["a"], Some("T2")),
            page(&["b"], Some("T3")),
            page(&["c"], None),
            page(&["never"], None),
        ]);
        let scraper = Scraper::new(&source, &store, raw_location(), 10);

        let batch = scraper.collect_region_pages("US").unwrap();

        assert_eq!(batch.pages, 3);
        assert_eq!(batch.records.len(), 3);
        let calls = source.calls.borrow();
        let tokens: Vec<Option<&str>> = calls.iter().map(|(_, t)| t.as_deref()).collect();
        assert_eq!(tokens, vec![None, Some("T2"), Some("T3")]);
    }

    #[test]
    fn page_limit_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let source = ScriptedSource::new(vec![page(&["a"], Some("T2")), page(&["b"], Some("T3"))]);
        let scraper = Scraper::new(&source, &store, raw_location(), 2);

        let err = scraper.collect_region_pages("US").unwrap_err();
        assert!(matches!(err, ApiError::PageLimitExceeded { max_pages: 2, .. }));
        assert_eq!(source.calls.borrow().len(), 2);
    }

    #[test]
    fn skipped_items_are_counted_with_reason() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let removed = json!({"id": "gone", "snippet": {}});
        let source = ScriptedSource::new(vec![Ok(VideoPage {
            items: vec![video("a"), removed],
            next_page_token: None,
        })]);
        let scraper = Scraper::new(&source, &store, raw_location(), 10);

        let batch = scraper.collect_region_pages("CA").unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.skipped, vec![SkipReason::MissingStatistics]);
    }

    #[test]
    fn upload_uses_region_partition_and_canonical_header() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let source = ScriptedSource::new(vec![page(&["a", "b"], None)]);
        let scraper = Scraper::new(&source, &store, raw_location(), 10);

        let uploads = scraper.run(&["GB".to_string()]).unwrap();
        let upload = &uploads[0];
        assert!(upload.key.starts_with("youtube/raw_statistics/region=gb/"));
        assert!(upload.key.ends_with("_GB_videos.csv"));

        let body = String::from_utf8(store.get("raw-bucket", &upload.key).unwrap()).unwrap();
        let mut lines = body.lines();
        assert_eq!(lines.next().unwrap(), CANONICAL_COLUMNS.join(","));
        let first = lines.next().unwrap();
        assert!(first.starts_with("a,"));
        assert!(first.contains(",video a,c,22,"));
    }

    #[test]
    fn canonical_mapping_roundtrips_by_name() {
        let raw_values: Vec<String> = RAW_HEADER.iter().map(|h| format!("v-{}", h)).collect();
        let raw: HashMap<&str, &str> = RAW_HEADER
            .iter()
            .copied()
            .zip(raw_values.iter().map(String::as_str))
            .collect();

        let canonical = canonical_row(&raw);
        assert_eq!(canonical.len(), CANONICAL_COLUMNS.len());

        for (column, value) in CANONICAL_COLUMNS.iter().zip(&canonical) {
            match raw.get(source_column(column)) {
                Some(original) => assert_eq!(original, value),
                None => assert_eq!(*value, ""),
            }
        }
        assert_eq!(canonical[7], "v-view_count");
        assert_eq!(canonical[14], "");
    }

    #[test]
    fn reformat_keeps_row_count() {
        let records: Vec<VideoRecord> = ["a", "b", "c"]
            .iter()
            .filter_map(|id| match classify_item(&video(id), "24.01.05") {
                ItemOutcome::Included(r) => Some(r),
                ItemOutcome::Skipped(_) => None,
            })
            .collect();
        let out = reformat_csv(&raw_csv(&records)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 4);
    }
}
