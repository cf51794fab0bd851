//! Configuration Models
//!
//! ## Visão Geral
//! Este módulo define as estruturas de configuração dos três estágios do pipeline
//! (scraper, conversor e job de limpeza) e das camadas de apoio (storage e catálogo).
//! Nada é lido de variáveis globais em tempo de execução: cada componente recebe
//! a sua struct já resolvida na construção.
//!
//! ## Boas Práticas
//! - **Encapsulamento**: Validações de integridade ocorrem no momento da carga.
//! - **Defaults**: Todas as seções têm valores padrão, um TOML vazio é válido.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::catalog::parse_type;
use crate::dataset::PartitionPredicate;
use crate::errors::ConfigError;
use crate::storage::StorageLocation;

/// Variáveis de ambiente do deploy serverless do conversor.
pub const ENV_CLEANSED_PATH: &str = "s3_cleansed_layer";
pub const ENV_CATALOG_DB: &str = "glue_catalog_db_name";
pub const ENV_CATALOG_TABLE: &str = "glue_catalog_table_name";
pub const ENV_WRITE_MODE: &str = "write_data_operation";

/// Fallback da chave da API quando `scraper.api_key` não está no TOML.
pub const ENV_API_KEY: &str = "YOUTUBE_API_KEY";

/// Configuração raiz, espelho do arquivo `pipeline.toml`.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    pub scraper: ScraperConfig,
    pub converter: ConverterSection,
    pub cleansing: CleansingConfig,
}

/// Raiz física do object store local (um diretório por bucket).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
        }
    }
}

/// Localização do arquivo JSON do catálogo.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/catalog.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScraperConfig {
    /// Endpoint de vídeos da API (sem query string).
    pub api_url: String,

    /// Chave de acesso. Se ausente, usa `YOUTUBE_API_KEY`.
    pub api_key: Option<String>,

    /// Códigos de região de duas letras, processados na ordem.
    pub regions: Vec<String>,

    /// Destino dos CSVs brutos (`s3://bucket/prefixo`).
    pub raw_location: String,

    pub page_size: u32,

    /// Limite de segurança da paginação por região.
    pub max_pages: usize,

    pub timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            api_url: "https://www.googleapis.com/youtube/v3/videos".to_string(),
            api_key: None,
            regions: vec!["US".to_string(), "CA".to_string(), "IN".to_string()],
            raw_location: "s3://youtube-project-analytics-raw-useast1-dev/youtube/raw_statistics"
                .to_string(),
            page_size: 50,
            max_pages: 100,
            timeout_secs: 30,
        }
    }
}

impl ScraperConfig {
    /// Resolve a chave da API: TOML primeiro, ambiente depois.
    pub fn resolve_api_key<F>(&self, lookup: F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| lookup(ENV_API_KEY))
            .ok_or(ConfigError::MissingSetting("scraper.api_key / YOUTUBE_API_KEY"))
    }
}

/// Seção `[converter]` como escrita no TOML; todos os campos podem vir do ambiente.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ConverterSection {
    pub cleansed_path: Option<String>,
    pub database: Option<String>,
    pub table: Option<String>,
    pub write_mode: Option<WriteMode>,
}

/// Configuração efetiva do conversor: {output path, database, table, write mode}.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub output: StorageLocation,
    pub database: String,
    pub table: String,
    pub write_mode: WriteMode,
}

impl ConverterSection {
    /// Combina o TOML com o ambiente. O ambiente tem precedência, como no deploy serverless.
    pub fn resolve<F>(&self, lookup: F) -> Result<ConverterConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = lookup(ENV_CLEANSED_PATH)
            .or_else(|| self.cleansed_path.clone())
            .ok_or(ConfigError::MissingSetting("converter.cleansed_path / s3_cleansed_layer"))?;

        let database = lookup(ENV_CATALOG_DB)
            .or_else(|| self.database.clone())
            .ok_or(ConfigError::MissingSetting("converter.database / glue_catalog_db_name"))?;

        let table = lookup(ENV_CATALOG_TABLE)
            .or_else(|| self.table.clone())
            .ok_or(ConfigError::MissingSetting("converter.table / glue_catalog_table_name"))?;

        let write_mode: WriteMode = match lookup(ENV_WRITE_MODE) {
            Some(raw) => raw.parse()?,
            None => self
                .write_mode
                .ok_or(ConfigError::MissingSetting("converter.write_mode / write_data_operation"))?,
        };

        let output = StorageLocation::parse(&path)
            .map_err(|e| ConfigError::Invalid(format!("converter.cleansed_path: {}", e)))?;

        if database.trim().is_empty() || table.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "database/tabela do conversor não podem ser vazios".to_string(),
            ));
        }

        Ok(ConverterConfig {
            output,
            database,
            table,
            write_mode,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CleansingConfig {
    pub job_name: String,
    pub source_database: String,
    pub source_table: String,

    /// Filtro aplicado sobre as partições antes de qualquer leitura.
    pub push_down_predicate: String,

    pub target_location: String,
    pub target_database: String,
    pub target_table: String,
    pub partition_keys: Vec<String>,
    pub write_mode: WriteMode,
    pub mappings: Vec<ColumnMapping>,
}

impl Default for CleansingConfig {
    fn default() -> Self {
        Self {
            job_name: "youtube-raw-to-cleansed".to_string(),
            source_database: "db_youtube_raw".to_string(),
            source_table: "raw_statistics".to_string(),
            push_down_predicate: "region in ('ca','gb','us')".to_string(),
            target_location: "s3://de-on-youtube-cleansed-useast1-dev/youtube/raw_statistics/"
                .to_string(),
            target_database: "db_youtube_cleaned".to_string(),
            target_table: "raw_statistics".to_string(),
            partition_keys: vec!["region".to_string()],
            write_mode: WriteMode::Append,
            mappings: default_mappings(),
        }
    }
}

/// Uma regra (origem, tipo origem, destino, tipo destino).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(from = "(String, String, String, String)")]
pub struct ColumnMapping {
    pub source: String,
    pub source_type: String,
    pub target: String,
    pub target_type: String,
}

impl From<(String, String, String, String)> for ColumnMapping {
    fn from((source, source_type, target, target_type): (String, String, String, String)) -> Self {
        Self {
            source,
            source_type,
            target,
            target_type,
        }
    }
}

impl ColumnMapping {
    pub fn new(source: &str, source_type: &str, target: &str, target_type: &str) -> Self {
        Self {
            source: source.to_string(),
            source_type: source_type.to_string(),
            target: target.to_string(),
            target_type: target_type.to_string(),
        }
    }
}

/// Mapeamento do schema de vídeos (bruto -> limpo).
pub fn default_mappings() -> Vec<ColumnMapping> {
    [
        ("video_id", "string"),
        ("trending_date", "string"),
        ("title", "string"),
        ("channel_title", "string"),
        ("category_id", "long"),
        ("publish_time", "string"),
        ("tags", "string"),
        ("views", "long"),
        ("likes", "long"),
        ("dislikes", "long"),
        ("comment_count", "long"),
        ("thumbnail_link", "string"),
        ("comments_disabled", "boolean"),
        ("ratings_disabled", "boolean"),
        ("video_error_or_removed", "boolean"),
        ("description", "string"),
        ("region", "string"),
    ]
    .iter()
    .map(|(name, ty)| ColumnMapping::new(name, ty, name, ty))
    .collect()
}

/// Estratégia de escrita de um dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum WriteMode {
    Append,
    Overwrite,
    OverwritePartitions,
    ErrorIfExists,
}

impl FromStr for WriteMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "overwrite" => Ok(WriteMode::Overwrite),
            "overwrite_partitions" => Ok(WriteMode::OverwritePartitions),
            "error" | "errorifexists" => Ok(WriteMode::ErrorIfExists),
            _ => Err(ConfigError::UnsupportedWriteMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for WriteMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WriteMode> for String {
    fn from(mode: WriteMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteMode::Append => "append",
            WriteMode::Overwrite => "overwrite",
            WriteMode::OverwritePartitions => "overwrite_partitions",
            WriteMode::ErrorIfExists => "error",
        };
        f.write_str(name)
    }
}

impl Config {
    /// Carrega e valida o ficheiro de configuração TOML.
    ///
    /// # Erros
    /// Retorna `ConfigError::Io` se o ficheiro não for encontrado,
    /// `ConfigError::Toml` se a sintaxe for inválida ou
    /// `ConfigError::Invalid` se os valores violarem as regras.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validação pós-carga (Fail-Fast).
    fn validate(&self) -> Result<(), ConfigError> {
        let scraper = &self.scraper;
        if scraper.regions.is_empty() {
            return Err(ConfigError::Invalid("scraper.regions está vazio".to_string()));
        }
        for region in &scraper.regions {
            if region.len() != 2 || !region.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ConfigError::Invalid(format!(
                    "código de região inválido: '{}'",
                    region
                )));
            }
        }
        if !(1..=50).contains(&scraper.page_size) {
            return Err(ConfigError::Invalid(format!(
                "scraper.page_size deve estar entre 1 e 50 (recebido {})",
                scraper.page_size
            )));
        }
        if scraper.max_pages == 0 {
            return Err(ConfigError::Invalid("scraper.max_pages deve ser > 0".to_string()));
        }
        StorageLocation::parse(&scraper.raw_location)
            .map_err(|e| ConfigError::Invalid(format!("scraper.raw_location: {}", e)))?;

        let job = &self.cleansing;
        StorageLocation::parse(&job.target_location)
            .map_err(|e| ConfigError::Invalid(format!("cleansing.target_location: {}", e)))?;
        PartitionPredicate::parse(&job.push_down_predicate)?;
        if job.mappings.is_empty() {
            return Err(ConfigError::Invalid("cleansing.mappings está vazio".to_string()));
        }
        for mapping in &job.mappings {
            parse_type(&mapping.source_type)?;
            parse_type(&mapping.target_type)?;
        }
        for (name, value) in [
            ("cleansing.job_name", &job.job_name),
            ("cleansing.source_database", &job.source_database),
            ("cleansing.source_table", &job.source_table),
            ("cleansing.target_database", &job.target_database),
            ("cleansing.target_table", &job.target_table),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} está vazio", name)));
            }
        }

        Ok(())
    }

    /// Configuração do conversor resolvida contra o ambiente do processo.
    pub fn converter_settings(&self) -> Result<ConverterConfig, ConfigError> {
        self.converter.resolve(|key| std::env::var(key).ok())
    }
}
