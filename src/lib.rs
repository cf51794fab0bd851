//! # YouTube ETL
//!
//! ## Visão Geral
//! Pipeline em três estágios sobre um object store:
//! 1. **Scraper**: pagina a API de vídeos em alta por região e envia um CSV
//!    bruto por região para `region=<código>/`.
//! 2. **Conversor**: reage a uma notificação de objeto novo, achata o JSON
//!    (`items`) e grava Parquet, registrando a tabela no catálogo.
//! 3. **Limpeza**: lê a tabela bruta pelo catálogo com push-down do predicado
//!    de região, normaliza tipos e grava o dataset limpo particionado.
//!
//! O `crawler` registra no catálogo a zona bruta produzida pelo scraper.

pub mod api;
pub mod catalog;
pub mod cleansing;
pub mod crawler;
pub mod dataset;
pub mod errors;
pub mod impl_errors;
pub mod models;
pub mod processor;
pub mod scraper;
pub mod storage;
pub mod video;
