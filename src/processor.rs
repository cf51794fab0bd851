//! # Conversor JSON -> Parquet
//!
//! ## Engenharia de Dados
//! Invocado uma vez por objeto novo na camada bruta. Lê o documento JSON,
//! achata a lista `items` (campos aninhados viram colunas `pai.filho`),
//! grava o resultado como dataset Parquet e atualiza a entrada do catálogo.
//! Qualquer falha é registrada com bucket e chave e devolvida a quem invocou.

use std::io::Cursor;

use percent_encoding::percent_decode_str;
use polars::prelude::*;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::catalog::{Catalog, DataFormat, TableUpdate};
use crate::dataset::{WriteResult, columns_of, write_dataset};
use crate::errors::ProcessorError;
use crate::models::ConverterConfig;
use crate::storage::ObjectStore;

/// Separador das colunas achatadas.
pub const FLATTEN_SEPARATOR: &str = ".";

/// Objeto apontado por uma notificação.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

/// Extrai bucket e chave (decodificada) do primeiro registro da notificação.
pub fn parse_event(event: &Value) -> Result<ObjectRef, ProcessorError> {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .ok_or_else(|| ProcessorError::MalformedEvent("Records".to_string()))?;

    if records.len() > 1 {
        warn!(records = records.len(), "evento com vários registros; apenas o primeiro é processado");
    }

    let s3 = records
        .first()
        .and_then(|record| record.get("s3"))
        .ok_or_else(|| ProcessorError::MalformedEvent("Records[0].s3".to_string()))?;

    let bucket = s3
        .get("bucket")
        .and_then(|b| b.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProcessorError::MalformedEvent("Records[0].s3.bucket.name".to_string()))?;

    let raw_key = s3
        .get("object")
        .and_then(|o| o.get("key"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProcessorError::MalformedEvent("Records[0].s3.object.key".to_string()))?;

    Ok(ObjectRef {
        bucket: bucket.to_string(),
        key: decode_key(raw_key)?,
    })
}

/// Decodificação de chave no estilo formulário: `+` vira espaço, `%XX` vira byte.
pub fn decode_key(raw: &str) -> Result<String, ProcessorError> {
    let plus_decoded = raw.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| ProcessorError::MalformedEvent(format!("chave não UTF-8 '{}': {}", raw, e)))
}

/// Achata cada item em uma linha; objetos aninhados viram colunas qualificadas.
/// Listas permanecem como valores.
pub fn json_normalize(items: &[Value]) -> Result<Vec<Map<String, Value>>, ProcessorError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(fields) => {
                let mut row = Map::new();
                for (name, value) in fields {
                    flatten_into(name, value, &mut row);
                }
                Ok(row)
            }
            _ => Err(ProcessorError::Schema(format!(
                "item {} de 'items' não é um objeto",
                index
            ))),
        })
        .collect()
}

fn flatten_into(prefix: &str, value: &Value, row: &mut Map<String, Value>) {
    match value {
        Value::Object(fields) => {
            for (name, nested) in fields {
                flatten_into(&format!("{}{}{}", prefix, FLATTEN_SEPARATOR, name), nested, row);
            }
        }
        other => {
            row.insert(prefix.to_string(), other.clone());
        }
    }
}

/// Monta o DataFrame a partir das linhas achatadas, inferindo o schema com todas elas.
pub fn frame_from_rows(rows: &[Map<String, Value>]) -> Result<DataFrame, ProcessorError> {
    if rows.is_empty() {
        return Err(ProcessorError::Schema(
            "Arquivo JSON sem registros ou vazio".to_string(),
        ));
    }

    let json_bytes = serde_json::to_vec(rows)?;
    let frame = JsonReader::new(Cursor::new(json_bytes))
        .infer_schema_len(None)
        .finish()?;
    Ok(frame)
}

/// Handler de notificações da camada bruta.
pub struct Converter<'a> {
    store: &'a dyn ObjectStore,
    catalog: &'a mut Catalog,
    config: ConverterConfig,
}

impl<'a> Converter<'a> {
    pub fn new(store: &'a dyn ObjectStore, catalog: &'a mut Catalog, config: ConverterConfig) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    pub fn handle(&mut self, event: &Value) -> Result<WriteResult, ProcessorError> {
        let object = parse_event(event).inspect_err(|e| {
            error!(error = %e, "evento de notificação malformado");
        })?;

        self.convert_object(&object).inspect_err(|e| {
            error!(
                bucket = %object.bucket,
                key = %object.key,
                error = %e,
                "falha ao processar o objeto; verifique se o arquivo existe e está acessível"
            );
        })
    }

    fn convert_object(&mut self, object: &ObjectRef) -> Result<WriteResult, ProcessorError> {
        let bytes = self.store.get(&object.bucket, &object.key)?;
        let document: Value = serde_json::from_slice(&bytes)?;

        let items = document
            .get("items")
            .ok_or_else(|| ProcessorError::Schema("Campo 'items' ausente no JSON.".to_string()))?
            .as_array()
            .ok_or_else(|| ProcessorError::Schema("O campo 'items' não é uma lista válida.".to_string()))?;

        let rows = json_normalize(items)?;
        let frame = frame_from_rows(&rows)?;
        let (height, width) = frame.shape();

        let result = write_dataset(
            self.store,
            &self.config.output,
            &frame,
            &[],
            self.config.write_mode,
        )?;

        self.catalog.upsert(TableUpdate {
            database: self.config.database.clone(),
            table: self.config.table.clone(),
            location: self.config.output.uri(),
            format: DataFormat::Parquet,
            columns: columns_of(&frame, &[]),
            partition_keys: Vec::new(),
            partitions: Vec::new(),
            mode: self.config.write_mode,
        })?;

        info!(
            bucket = %object.bucket,
            key = %object.key,
            rows = height,
            columns = width,
            "objeto convertido para Parquet"
        );
        Ok(result)
    }
}
