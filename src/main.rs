//! # YouTube ETL Pipeline
//!
//! ## Visão Geral
//! Ponto de entrada dos três estágios (scrape, convert, cleanse) e do crawler
//! que registra a zona bruta no catálogo. Cada subcomando carrega o mesmo
//! `pipeline.toml` e recebe a sua seção já validada.
//!
//! ## Códigos de Saída
//! - `0`: sucesso.
//! - `1`: falha de configuração ou de processamento.
//! - `2`: a API sinalizou limite de requisições (HTTP 429); nenhuma região
//!   restante foi processada.

use std::error::Error;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use youtube_etl::api::{YouTubeApi, create_http_client};
use youtube_etl::catalog::{Catalog, DataFormat};
use youtube_etl::cleansing::run_job;
use youtube_etl::crawler::crawl;
use youtube_etl::errors::{ApiError, ScrapeError};
use youtube_etl::models::Config;
use youtube_etl::processor::Converter;
use youtube_etl::scraper::Scraper;
use youtube_etl::storage::{LocalObjectStore, StorageLocation};

#[derive(Parser, Debug)]
#[command(name = "youtube_etl", version, about = "Pipeline ETL de vídeos em alta do YouTube")]
struct Cli {
    /// Arquivo de configuração TOML.
    #[arg(short, long, default_value = "pipeline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Coleta os vídeos em alta de cada região e envia os CSVs brutos.
    Scrape,

    /// Converte o objeto JSON apontado por uma notificação em Parquet.
    Convert {
        /// Arquivo com o evento de notificação (`-` lê da entrada padrão).
        #[arg(long, default_value = "-")]
        event: String,
    },

    /// Registra no catálogo um dataset existente.
    Crawl {
        #[arg(long)]
        location: String,

        #[arg(long)]
        database: String,

        #[arg(long)]
        table: String,

        /// `csv` ou `parquet`.
        #[arg(long, default_value = "csv")]
        format: String,
    },

    /// Executa o job de limpeza (bruto -> limpo).
    Cleanse,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_event(source: &str) -> Result<Value, Box<dyn Error>> {
    let content = if source == "-" {
        io::read_to_string(io::stdin())?
    } else {
        fs::read_to_string(source)?
    };
    Ok(serde_json::from_str(&content)?)
}

fn scrape(config: &Config) -> Result<(), Box<dyn Error>> {
    let settings = &config.scraper;
    let api_key = settings.resolve_api_key(|key| std::env::var(key).ok())?;

    // Reuso de conexões (keep-alive) entre páginas e regiões
    let client = create_http_client(Duration::from_secs(settings.timeout_secs))?;
    let api = YouTubeApi::new(client, settings, api_key);

    let store = LocalObjectStore::new(&config.storage.root);
    let raw_location = StorageLocation::parse(&settings.raw_location)?;

    let uploads = Scraper::new(api, &store, raw_location, settings.max_pages).run(&settings.regions)?;
    for upload in &uploads {
        info!(
            region = %upload.region,
            key = %upload.key,
            rows = upload.rows,
            skipped = upload.skipped,
            "região concluída"
        );
    }
    println!("{}", serde_json::to_string_pretty(&uploads)?);
    Ok(())
}

fn convert(config: &Config, event: &str) -> Result<(), Box<dyn Error>> {
    let settings = config.converter_settings()?;
    let event = read_event(event)?;

    let store = LocalObjectStore::new(&config.storage.root);
    let mut catalog = Catalog::open(&config.catalog.path)?;

    let result = Converter::new(&store, &mut catalog, settings).handle(&event)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn crawl_location(
    config: &Config,
    location: &str,
    database: &str,
    table: &str,
    format: &str,
) -> Result<(), Box<dyn Error>> {
    let location = StorageLocation::parse(location)?;
    let format: DataFormat = format.parse()?;

    let store = LocalObjectStore::new(&config.storage.root);
    let mut catalog = Catalog::open(&config.catalog.path)?;

    let entry = crawl(&store, &mut catalog, &location, format, database, table)?;
    info!(
        database = %entry.database,
        table = %entry.name,
        columns = entry.columns.len(),
        "crawler concluído"
    );
    Ok(())
}

fn cleanse(config: &Config) -> Result<(), Box<dyn Error>> {
    let store = LocalObjectStore::new(&config.storage.root);
    let mut catalog = Catalog::open(&config.catalog.path)?;

    let summary = run_job(&store, &mut catalog, &config.cleansing)?;
    info!(
        run_id = %summary.run_id,
        rows = summary.rows,
        files = summary.result.paths.len(),
        "limpeza concluída"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Limite de requisições encerra com código próprio; o resto é falha genérica.
fn exit_code(err: &(dyn Error + 'static)) -> ExitCode {
    match err.downcast_ref::<ScrapeError>() {
        Some(ScrapeError::Api(ApiError::RateLimited { .. })) => ExitCode::from(2),
        _ => ExitCode::from(1),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let global_timer = Instant::now();

    let config = match Config::load_from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "erro na carga de configuração");
            return ExitCode::from(1);
        }
    };

    let outcome = match &cli.command {
        Command::Scrape => scrape(&config),
        Command::Convert { event } => convert(&config, event),
        Command::Crawl {
            location,
            database,
            table,
            format,
        } => crawl_location(&config, location, database, table, format),
        Command::Cleanse => cleanse(&config),
    };

    match outcome {
        Ok(()) => {
            info!(elapsed = ?global_timer.elapsed(), "pipeline finalizado");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "pipeline interrompido");
            exit_code(e.as_ref())
        }
    }
}
