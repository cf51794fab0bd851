//! # Definição de Erros do Pipeline
//!
//! Este módulo centraliza as falhas possíveis em cada estágio (scraper,
//! conversor, job de limpeza) e nas camadas de apoio (storage, catálogo).
//!
//! # Error Handling Strategy
//! - **Tipagem:** Enums para tratamento exaustivo.
//! - **Separação:** As implementações de `Display`, `Error` e `From` vivem em `impl_errors.rs`.
//! - **Propagação:** Nenhum estágio tenta retry; o erro sobe até quem invocou o processo.

use std::path::PathBuf;

/// Falhas na carga ou validação da configuração.
#[derive(Debug)]
pub enum ConfigError {
    /// Arquivo de configuração inexistente ou ilegível.
    Io { path: PathBuf, source: std::io::Error },

    /// TOML com sintaxe ou tipos inválidos.
    Toml(toml::de::Error),

    /// Valor presente mas fora das regras de negócio (ex: região vazia).
    Invalid(String),

    /// Configuração obrigatória ausente tanto no TOML quanto no ambiente.
    MissingSetting(&'static str),

    /// Modo de escrita desconhecido (`append`, `overwrite`, `overwrite_partitions`, `error`).
    UnsupportedWriteMode(String),

    /// Tipo de coluna desconhecido num mapeamento.
    UnsupportedType(String),
}

/// Define erros específicos da camada de API/Rede.
#[derive(Debug)]
pub enum ApiError {
    /// Falha na conexão, DNS ou handshake TLS.
    NetworkError(reqwest::Error),

    /// HTTP 429: a cota da API acabou. Interrompe o scraping inteiro.
    RateLimited { region: String, page: usize },

    /// O corpo da resposta não é um JSON de página válido.
    InvalidPayload {
        region: String,
        page: usize,
        source: serde_json::Error,
    },

    /// O limite de segurança de páginas foi atingido sem o fim da paginação.
    PageLimitExceeded { region: String, max_pages: usize },

    /// A URL base configurada não pôde ser montada.
    InvalidUrl(String),
}

/// Falhas do armazenamento de objetos.
#[derive(Debug)]
pub enum StorageError {
    /// Erro de sistema de arquivos por trás do store local.
    Io { path: PathBuf, source: std::io::Error },

    /// Objeto inexistente.
    NotFound { bucket: String, key: String },

    /// Localização que não segue o formato `s3://bucket/prefixo`.
    InvalidLocation(String),

    /// Chave com segmentos vazios ou `..`.
    InvalidKey(String),

    /// Destino já possui dados e o modo de escrita é `error`.
    AlreadyExists(String),
}

/// Falhas do catálogo de metadados.
#[derive(Debug)]
pub enum CatalogError {
    Io(std::io::Error),
    Json(serde_json::Error),
    TableNotFound { database: String, table: String },
}

/// Falhas do estágio de scraping.
#[derive(Debug)]
pub enum ScrapeError {
    Api(ApiError),
    Csv(csv::Error),
    Io(std::io::Error),
    Storage(StorageError),
}

/// Enumeração central de falhas do Processador (conversor, crawler e job de limpeza).
///
/// O atributo `#[non_exhaustive]` garante compatibilidade futura,
/// instruindo o compilador a exigir tratamento de variantes desconhecidas.
#[derive(Debug)]
#[non_exhaustive]
pub enum ProcessorError {
    /// Encapsula `serde_json::Error`.
    Json(serde_json::Error),

    /// Erros originados na engine (leitura/escrita Parquet, CSV, casts).
    Polars(polars::prelude::PolarsError),

    /// Violações de regras de negócio ou inconsistência de formato nos dados.
    Schema(String),

    /// Evento de notificação sem uma chave obrigatória (caminho da chave ausente).
    MalformedEvent(String),

    Storage(StorageError),

    Catalog(CatalogError),

    Config(ConfigError),
}
