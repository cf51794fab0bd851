use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use serde_json::{Value, json};
use tempfile::TempDir;

use youtube_etl::api::{PageSource, VideoPage};
use youtube_etl::catalog::{Catalog, DataFormat};
use youtube_etl::cleansing::run_job;
use youtube_etl::crawler::crawl;
use youtube_etl::dataset::read_dataset;
use youtube_etl::errors::{ApiError, ScrapeError};
use youtube_etl::models::{CleansingConfig, ConverterConfig, WriteMode};
use youtube_etl::processor::Converter;
use youtube_etl::scraper::{CANONICAL_COLUMNS, Scraper};
use youtube_etl::storage::{LocalObjectStore, ObjectStore, StorageLocation};

enum Step {
    Page(VideoPage),
    RateLimit,
}

/// Fonte de páginas roteirizada por região; registra cada chamada.
#[derive(Default)]
struct ScriptedApi {
    pages: RefCell<HashMap<String, VecDeque<Step>>>,
    calls: RefCell<Vec<(String, Option<String>)>>,
}

impl ScriptedApi {
    fn push(&self, region: &str, step: Step) {
        self.pages
            .borrow_mut()
            .entry(region.to_string())
            .or_default()
            .push_back(step);
    }

    fn called_regions(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(r, _)| r.clone()).collect()
    }
}

impl PageSource for &ScriptedApi {
    fn fetch_page(&self, region: &str, page_token: Option<&str>, page: usize) -> Result<VideoPage, ApiError> {
        self.calls
            .borrow_mut()
            .push((region.to_string(), page_token.map(str::to_string)));
        let step = self
            .pages
            .borrow_mut()
            .get_mut(region)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Step::Page(p)) => Ok(p),
            Some(Step::RateLimit) => Err(ApiError::RateLimited {
                region: region.to_string(),
                page,
            }),
            None => Ok(VideoPage::default()),
        }
    }
}

fn item(id: &str, views: &str) -> Value {
    json!({
        "id": id,
        "snippet": {
            "title": format!("Vídeo {}, \"ao vivo\"", id),
            "publishedAt": "2024-05-01T10:00:00Z",
            "channelId": "UC1",
            "channelTitle": "Canal",
            "categoryId": "10",
            "description": "linha1\nlinha2",
            "thumbnails": {"default": {"url": format!("https://i.ytimg.com/vi/{}/default.jpg", id)}}
        },
        "statistics": {"viewCount": views, "likeCount": "5", "dislikeCount": "1", "commentCount": "2"}
    })
}

fn page(items: Vec<Value>, token: Option<&str>) -> Step {
    Step::Page(VideoPage {
        items,
        next_page_token: token.map(str::to_string),
    })
}

fn raw_location() -> StorageLocation {
    StorageLocation::parse("s3://raw/youtube/raw_statistics").unwrap()
}

fn regions(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

#[test]
fn two_pages_produce_one_csv_with_all_rows() {
    let dir = TempDir::new().unwrap();
    let store = LocalObjectStore::new(dir.path());
    let api = ScriptedApi::default();
    api.push("US", page(vec![item("a", "10"), item("b", "20")], Some("T2")));
    api.push("US", page(vec![item("c", "30")], None));

    let uploads = Scraper::new(&api, &store, raw_location(), 10)
        .run(&regions(&["US"]))
        .unwrap();

    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].rows, 3);
    assert_eq!(uploads[0].pages, 2);
    assert!(uploads[0].key.starts_with("youtube/raw_statistics/region=us/"));
    assert!(uploads[0].key.ends_with("_US_videos.csv"));

    let report = serde_json::to_value(&uploads).unwrap();
    assert_eq!(report[0]["region"], "US");
    assert_eq!(report[0]["bucket"], "raw");
    assert_eq!(report[0]["rows"], 3);

    let body = String::from_utf8(store.get("raw", &uploads[0].key).unwrap()).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], CANONICAL_COLUMNS.join(","));

    let calls = api.calls.borrow();
    assert_eq!(calls[0].1, None);
    assert_eq!(calls[1].1.as_deref(), Some("T2"));
}

#[test]
fn rate_limit_halts_every_remaining_region() {
    let dir = TempDir::new().unwrap();
    let store = LocalObjectStore::new(dir.path());
    let api = ScriptedApi::default();
    api.push("US", page(vec![item("a", "10")], Some("T2")));
    api.push("US", Step::RateLimit);
    api.push("CA", page(vec![item("b", "1")], None));

    let err = Scraper::new(&api, &store, raw_location(), 10)
        .run(&regions(&["US", "CA"]))
        .unwrap_err();

    assert!(matches!(
        err,
        ScrapeError::Api(ApiError::RateLimited { ref region, page: 2 }) if region == "US"
    ));
    assert!(store.list("raw", "").unwrap().is_empty());
    assert!(!api.called_regions().contains(&"CA".to_string()));
}

#[test]
fn scrape_crawl_and_cleanse_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = LocalObjectStore::new(dir.path().join("s3"));
    let mut catalog = Catalog::open(dir.path().join("catalog.json")).unwrap();

    let api = ScriptedApi::default();
    api.push("US", page(vec![item("0123", "100"), item("0456", "200")], None));
    api.push("CA", page(vec![item("c1", "50")], None));
    api.push("IN", page(vec![item("i1", "999")], None));

    Scraper::new(&api, &store, raw_location(), 10)
        .run(&regions(&["US", "CA", "IN"]))
        .unwrap();

    let raw = crawl(
        &store,
        &mut catalog,
        &raw_location(),
        DataFormat::Csv,
        "db_youtube_raw",
        "raw_statistics",
    )
    .unwrap();
    assert_eq!(raw.partitions.len(), 3);

    let config = CleansingConfig {
        target_location: "s3://cleansed/youtube/raw_statistics/".to_string(),
        ..CleansingConfig::default()
    };
    let summary = run_job(&store, &mut catalog, &config).unwrap();

    assert_eq!(summary.rows, 3);
    assert_eq!(summary.result.paths.len(), 2);
    assert!(summary.result.paths.iter().all(|p| p.ends_with(".snappy.parquet")));
    assert_eq!(
        summary
            .result
            .partitions_values
            .get("s3://cleansed/youtube/raw_statistics/region=us/"),
        Some(&vec!["us".to_string()])
    );

    let target = StorageLocation::parse(&config.target_location).unwrap();
    let files = read_dataset(&store, &target, DataFormat::Parquet, None, &[]).unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.partition[0].1 != "in"));
    assert_eq!(files.iter().map(|f| f.frame.height()).sum::<usize>(), 3);
    let us = files.iter().find(|f| f.partition[0].1 == "us").unwrap();
    let ids = us.frame.column("video_id").unwrap().as_materialized_series().clone();
    assert!(ids.str().unwrap().into_no_null_iter().any(|id| id == "0123"));

    let entry = catalog.table("db_youtube_cleaned", "raw_statistics").unwrap();
    assert_eq!(entry.partition_key_names(), vec!["region"]);
    assert!(entry.columns.iter().any(|c| c.name == "views" && c.data_type == "bigint"));
    assert!(entry.columns.iter().all(|c| c.name != "video_error_or_removed"));
    assert!(entry.columns.iter().all(|c| c.name != "region"));
}

#[test]
fn converter_flattens_reference_json() {
    let dir = TempDir::new().unwrap();
    let store = LocalObjectStore::new(dir.path().join("s3"));
    let mut catalog = Catalog::open(dir.path().join("catalog.json")).unwrap();

    store
        .put(
            "raw",
            "youtube/raw_statistics_reference_data/US_category_id.json",
            br#"{"items": [{"a": 1, "b": {"c": 2}}]}"#,
        )
        .unwrap();

    let event = json!({
        "Records": [{"s3": {
            "bucket": {"name": "raw"},
            "object": {"key": "youtube/raw_statistics_reference_data/US_category_id.json"}
        }}]
    });
    let settings = ConverterConfig {
        output: StorageLocation::parse("s3://cleansed/youtube/reference/").unwrap(),
        database: "db_youtube_cleaned".to_string(),
        table: "cleaned_statistics_reference_data".to_string(),
        write_mode: WriteMode::Append,
    };

    let result = Converter::new(&store, &mut catalog, settings).handle(&event).unwrap();
    assert_eq!(result.paths.len(), 1);
    assert!(result.partitions_values.is_empty());

    let entry = catalog
        .table("db_youtube_cleaned", "cleaned_statistics_reference_data")
        .unwrap();
    let names: Vec<&str> = entry.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b.c"]);
}

#[test]
fn bundled_configuration_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/pipeline.toml");
    let config = youtube_etl::models::Config::load_from_file(path).unwrap();
    assert_eq!(config.cleansing.mappings.len(), 17);
    assert_eq!(config.scraper.regions, regions(&["US", "CA", "IN"]));
}
