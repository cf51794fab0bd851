//! Implementações de traits para os enums de erro do sistema
//!
//! Este módulo existe exclusivamente para desacoplar:
//! - definição de erros (enums)
//! - implementação de traits (`Display`, `Error`, `From`)

use std::error::Error as StdError;
use std::fmt;

use polars::prelude::PolarsError;

use crate::errors::{ApiError, CatalogError, ConfigError, ProcessorError, ScrapeError, StorageError};

/* ========================================================================== */
/* Display                                                                    */
/* ========================================================================== */

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "[Config] falha ao ler '{}': {}", path.display(), source)
            }
            ConfigError::Toml(err) => write!(f, "[Config] erro no TOML: {}", err),
            ConfigError::Invalid(msg) => write!(f, "[Config] {}", msg),
            ConfigError::MissingSetting(name) => {
                write!(f, "[Config] configuração obrigatória ausente: {}", name)
            }
            ConfigError::UnsupportedWriteMode(mode) => {
                write!(f, "[Config] modo de escrita não suportado: '{}'", mode)
            }
            ConfigError::UnsupportedType(ty) => {
                write!(f, "[Config] tipo de coluna não suportado: '{}'", ty)
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NetworkError(err) => write!(f, "[API] falha de rede: {}", err),
            ApiError::RateLimited { region, page } => write!(
                f,
                "[API] limite de requisições excedido (região {}, página {})",
                region, page
            ),
            ApiError::InvalidPayload { region, page, source } => write!(
                f,
                "[API] resposta inválida (região {}, página {}): {}",
                region, page, source
            ),
            ApiError::PageLimitExceeded { region, max_pages } => write!(
                f,
                "[API] região {} ultrapassou o limite de {} páginas",
                region, max_pages
            ),
            ApiError::InvalidUrl(msg) => write!(f, "[API] URL inválida: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io { path, source } => {
                write!(f, "[Storage] '{}': {}", path.display(), source)
            }
            StorageError::NotFound { bucket, key } => {
                write!(f, "[Storage] objeto não encontrado: s3://{}/{}", bucket, key)
            }
            StorageError::InvalidLocation(loc) => {
                write!(f, "[Storage] localização inválida: '{}'", loc)
            }
            StorageError::InvalidKey(key) => write!(f, "[Storage] chave inválida: '{}'", key),
            StorageError::AlreadyExists(loc) => {
                write!(f, "[Storage] destino já contém dados: {}", loc)
            }
        }
    }
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Io(err) => write!(f, "[Catálogo] {}", err),
            CatalogError::Json(err) => write!(f, "[Catálogo] JSON inválido: {}", err),
            CatalogError::TableNotFound { database, table } => {
                write!(f, "[Catálogo] tabela não encontrada: {}.{}", database, table)
            }
        }
    }
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeError::Api(err) => write!(f, "{}", err),
            ScrapeError::Csv(err) => write!(f, "[CSV] {}", err),
            ScrapeError::Io(err) => write!(f, "[I/O] {}", err),
            ScrapeError::Storage(err) => write!(f, "{}", err),
        }
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorError::Json(err) => {
                write!(f, "[JSON] {}", err)
            }

            ProcessorError::Polars(err) => {
                write!(f, "[Polars] {}", err)
            }

            ProcessorError::Schema(msg) => {
                write!(f, "[Schema] {}", msg)
            }

            ProcessorError::MalformedEvent(key) => {
                write!(f, "[Evento] chave esperada ausente no evento: {}", key)
            }

            ProcessorError::Storage(err) => write!(f, "{}", err),
            ProcessorError::Catalog(err) => write!(f, "{}", err),
            ProcessorError::Config(err) => write!(f, "{}", err),
        }
    }
}

/* ========================================================================== */
/* std::error::Error                                                          */
/* ========================================================================== */

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml(err) => Some(err),
            _ => None,
        }
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ApiError::NetworkError(err) => Some(err),
            ApiError::InvalidPayload { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StorageError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl StdError for CatalogError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CatalogError::Io(err) => Some(err),
            CatalogError::Json(err) => Some(err),
            CatalogError::TableNotFound { .. } => None,
        }
    }
}

impl StdError for ScrapeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ScrapeError::Api(err) => Some(err),
            ScrapeError::Csv(err) => Some(err),
            ScrapeError::Io(err) => Some(err),
            ScrapeError::Storage(err) => Some(err),
        }
    }
}

impl StdError for ProcessorError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ProcessorError::Json(err) => Some(err),
            ProcessorError::Polars(err) => Some(err),
            ProcessorError::Storage(err) => Some(err),
            ProcessorError::Catalog(err) => Some(err),
            ProcessorError::Config(err) => Some(err),
            ProcessorError::Schema(_) | ProcessorError::MalformedEvent(_) => None,
        }
    }
}

/* ========================================================================== */
/* Conversions                                                                */
/* ========================================================================== */

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::NetworkError(err)
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Io(err)
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Json(err)
    }
}

impl From<ApiError> for ScrapeError {
    fn from(err: ApiError) -> Self {
        ScrapeError::Api(err)
    }
}

impl From<csv::Error> for ScrapeError {
    fn from(err: csv::Error) -> Self {
        ScrapeError::Csv(err)
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::Io(err)
    }
}

impl From<StorageError> for ScrapeError {
    fn from(err: StorageError) -> Self {
        ScrapeError::Storage(err)
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        ProcessorError::Json(err)
    }
}

impl From<PolarsError> for ProcessorError {
    fn from(err: PolarsError) -> Self {
        ProcessorError::Polars(err)
    }
}

impl From<StorageError> for ProcessorError {
    fn from(err: StorageError) -> Self {
        ProcessorError::Storage(err)
    }
}

impl From<CatalogError> for ProcessorError {
    fn from(err: CatalogError) -> Self {
        ProcessorError::Catalog(err)
    }
}

impl From<ConfigError> for ProcessorError {
    fn from(err: ConfigError) -> Self {
        ProcessorError::Config(err)
    }
}
