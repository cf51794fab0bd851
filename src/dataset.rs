//! # Datasets Particionados
//!
//! Leitura e escrita de datasets no layout Hive
//! (`<prefixo>/<chave>=<valor>/<uuid>.snappy.parquet`) sobre o object store.
//!
//! ## Engenharia de Dados
//! - **Push-down**: o predicado de partição é avaliado sobre o caminho, antes do download.
//! - **Partições fora do arquivo**: as colunas de partição não são gravadas nos
//!   arquivos e voltam como texto na leitura.
//! - **Compressão**: Snappy, com estatísticas min/max/null por coluna.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::sync::Arc;

use polars::prelude::*;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::{ColumnDef, DataFormat, glue_type};
use crate::errors::{ConfigError, ProcessorError, StorageError};
use crate::models::WriteMode;
use crate::storage::{ObjectStore, StorageLocation, is_hidden};

/// Valor de diretório para partições nulas.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

const CSV_INFER_ROWS: usize = 1000;

/// Predicado `coluna in ('a','b')` avaliado sobre os valores de partição.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPredicate {
    column: String,
    values: BTreeSet<String>,
}

impl PartitionPredicate {
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let re = Regex::new(r"(?i)^\s*([a-z_][a-z0-9_]*)\s+in\s*\((.*)\)\s*$")
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let caps = re
            .captures(expr)
            .ok_or_else(|| ConfigError::Invalid(format!("predicado não suportado: '{}'", expr)))?;

        let values: BTreeSet<String> = caps[2]
            .split(',')
            .map(|v| v.trim().trim_matches('\'').trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
            .collect();

        if values.is_empty() {
            return Err(ConfigError::Invalid(format!("predicado sem valores: '{}'", expr)));
        }

        Ok(Self {
            column: caps[1].to_string(),
            values,
        })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Um arquivo sem a coluna de partição nunca casa.
    pub fn matches(&self, partition: &[(String, String)]) -> bool {
        partition
            .iter()
            .find(|(key, _)| *key == self.column)
            .is_some_and(|(_, value)| self.values.contains(value))
    }
}

/// Pares `chave=valor` dos diretórios de uma chave relativa ao dataset.
pub fn partition_values(relative_key: &str) -> Vec<(String, String)> {
    let mut segments: Vec<&str> = relative_key.split('/').collect();
    segments.pop();
    segments
        .into_iter()
        .filter_map(|segment| segment.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Diretório de partição de uma chave relativa (vazio quando na raiz).
pub fn partition_dir(relative_key: &str) -> &str {
    relative_key.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

pub fn partition_path(keys: &[String], values: &[String]) -> String {
    keys.iter()
        .zip(values)
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("/")
}

/// Um arquivo lido do dataset, já com as colunas de partição.
#[derive(Debug, Clone)]
pub struct DatasetFile {
    pub key: String,
    pub partition: Vec<(String, String)>,
    pub frame: DataFrame,
}

/// Chaves visíveis do dataset, opcionalmente filtradas pelo formato.
pub fn list_data_keys(
    store: &dyn ObjectStore,
    location: &StorageLocation,
    format: Option<DataFormat>,
) -> Result<Vec<String>, StorageError> {
    let keys = store.list(location.bucket(), &location.list_prefix())?;
    Ok(keys
        .into_iter()
        .filter(|key| {
            let relative = location.relative(key).unwrap_or(key);
            !is_hidden(relative)
                && format.is_none_or(|f| DataFormat::from_key(relative) == Some(f))
        })
        .collect())
}

/// Esquema forçado para as colunas do cabeçalho CSV que devem ser lidas como texto.
/// Colunas pedidas que não estão no arquivo são ignoradas.
fn csv_text_schema(bytes: &[u8], text_columns: &[String]) -> Result<Option<SchemaRef>, ProcessorError> {
    if text_columns.is_empty() {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| ProcessorError::Schema(format!("cabeçalho CSV ilegível: {}", e)))?;

    let mut schema = Schema::with_capacity(text_columns.len());
    for name in headers.iter().filter(|h| text_columns.iter().any(|c| c == h)) {
        schema.with_column(PlSmallStr::from(name), DataType::String);
    }

    Ok((schema.len() > 0).then(|| Arc::new(schema)))
}

/// Lê um arquivo do dataset. No CSV, `text_columns` são lidas como texto
/// (sem inferência), preservando valores como `0123`.
pub fn read_file(
    bytes: Vec<u8>,
    format: DataFormat,
    text_columns: &[String],
) -> Result<DataFrame, ProcessorError> {
    let frame = match format {
        DataFormat::Parquet => ParquetReader::new(Cursor::new(bytes)).finish()?,
        DataFormat::Csv => {
            let overwrite = csv_text_schema(&bytes, text_columns)?;
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(CSV_INFER_ROWS))
                .with_schema_overwrite(overwrite)
                .into_reader_with_file_handle(Cursor::new(bytes))
                .finish()?
        }
    };
    Ok(frame)
}

/// Lê os arquivos do dataset, aplicando o predicado antes de cada download.
pub fn read_dataset(
    store: &dyn ObjectStore,
    location: &StorageLocation,
    format: DataFormat,
    predicate: Option<&PartitionPredicate>,
    text_columns: &[String],
) -> Result<Vec<DatasetFile>, ProcessorError> {
    let mut files = Vec::new();

    for key in list_data_keys(store, location, Some(format))? {
        let relative = location.relative(&key).unwrap_or(&key);
        let partition = partition_values(relative);

        if let Some(predicate) = predicate
            && !predicate.matches(&partition)
        {
            debug!(key = %key, "partição fora do predicado, arquivo ignorado");
            continue;
        }

        let bytes = store.get(location.bucket(), &key)?;
        let mut frame = read_file(bytes, format, text_columns)?;
        attach_partitions(&mut frame, &partition)?;

        files.push(DatasetFile {
            key,
            partition,
            frame,
        });
    }

    info!(location = %location, files = files.len(), "dataset lido");
    Ok(files)
}

fn attach_partitions(
    frame: &mut DataFrame,
    partition: &[(String, String)],
) -> Result<(), ProcessorError> {
    let height = frame.height();
    for (key, value) in partition {
        if frame.column(key).is_ok() {
            continue;
        }
        let value = (value != HIVE_DEFAULT_PARTITION).then(|| value.clone());
        frame.with_column(Series::new(PlSmallStr::from(key.as_str()), vec![value; height]))?;
    }
    Ok(())
}

/// Um arquivo Parquet pronto para envio, relativo à raiz do dataset.
#[derive(Debug, Clone)]
pub struct PartitionFile {
    pub relative_key: String,
    pub values: Vec<String>,
    pub rows: usize,
    pub bytes: Vec<u8>,
}

/// Resposta de uma escrita: objetos criados e valores por diretório de partição.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteResult {
    pub paths: Vec<String>,
    pub partitions_values: BTreeMap<String, Vec<String>>,
}

impl WriteResult {
    pub fn record(&mut self, location: &StorageLocation, relative_key: &str, values: &[String]) {
        self.paths.push(location.object_uri(&location.key(relative_key)));
        if !values.is_empty() {
            let dir = location.child(partition_dir(relative_key)).uri();
            self.partitions_values.insert(dir, values.to_vec());
        }
    }
}

fn file_name() -> String {
    format!("{}.snappy.parquet", Uuid::new_v4().simple())
}

pub fn write_parquet_bytes(frame: &mut DataFrame) -> Result<Vec<u8>, ProcessorError> {
    let mut buf = Vec::new();

    let stats_options = StatisticsOptions {
        min_value: true,
        max_value: true,
        null_count: true,
        distinct_count: false,
    };

    ParquetWriter::new(&mut buf)
        .with_compression(ParquetCompression::Snappy)
        .with_statistics(stats_options)
        .finish(frame)?;

    Ok(buf)
}

/// Divide o frame por partição e codifica cada parte em Parquet.
pub fn encode_partitions(
    frame: &DataFrame,
    partition_keys: &[String],
) -> Result<Vec<PartitionFile>, ProcessorError> {
    if partition_keys.is_empty() {
        let mut whole = frame.clone();
        return Ok(vec![PartitionFile {
            relative_key: file_name(),
            values: Vec::new(),
            rows: whole.height(),
            bytes: write_parquet_bytes(&mut whole)?,
        }]);
    }

    let mut key_series = Vec::with_capacity(partition_keys.len());
    for key in partition_keys {
        let column = frame.column(key).map_err(|_| {
            ProcessorError::Schema(format!("coluna de partição ausente: '{}'", key))
        })?;
        key_series.push(column.as_materialized_series().cast(&DataType::String)?);
    }
    let key_strings = key_series
        .iter()
        .map(|s| s.str())
        .collect::<PolarsResult<Vec<_>>>()?;

    let mut combos: BTreeSet<Vec<Option<String>>> = BTreeSet::new();
    for row in 0..frame.height() {
        combos.insert(
            key_strings
                .iter()
                .map(|ca| ca.get(row).map(str::to_string))
                .collect(),
        );
    }

    let mut files = Vec::with_capacity(combos.len());
    for combo in combos {
        let filter = partition_keys
            .iter()
            .zip(&combo)
            .map(|(key, value)| match value {
                Some(v) => col(key.as_str())
                    .cast(DataType::String)
                    .eq(lit(v.clone())),
                None => col(key.as_str()).is_null(),
            })
            .reduce(|acc, cond| acc.and(cond));

        let mut part = match filter {
            Some(expr) => frame.clone().lazy().filter(expr).collect()?,
            None => frame.clone(),
        };
        for key in partition_keys {
            part = part.drop(key)?;
        }

        let values: Vec<String> = combo
            .into_iter()
            .map(|v| v.unwrap_or_else(|| HIVE_DEFAULT_PARTITION.to_string()))
            .collect();

        files.push(PartitionFile {
            relative_key: format!("{}/{}", partition_path(partition_keys, &values), file_name()),
            values,
            rows: part.height(),
            bytes: write_parquet_bytes(&mut part)?,
        });
    }

    Ok(files)
}

/// Diretórios de partição tocados por um conjunto de arquivos.
pub fn partition_dirs(files: &[PartitionFile]) -> BTreeSet<String> {
    files
        .iter()
        .map(|f| partition_dir(&f.relative_key).to_string())
        .collect()
}

/// Aplica o modo de escrita no destino antes de os novos arquivos chegarem.
pub fn prepare_destination(
    store: &dyn ObjectStore,
    location: &StorageLocation,
    mode: WriteMode,
    written_dirs: &BTreeSet<String>,
) -> Result<(), ProcessorError> {
    let existing = list_data_keys(store, location, None)?;

    match mode {
        WriteMode::Append => {}
        WriteMode::ErrorIfExists => {
            if !existing.is_empty() {
                return Err(StorageError::AlreadyExists(location.uri()).into());
            }
        }
        WriteMode::Overwrite => {
            info!(location = %location, objects = existing.len(), "sobrescrevendo dataset");
            for key in &existing {
                store.delete(location.bucket(), key)?;
            }
        }
        WriteMode::OverwritePartitions => {
            for key in &existing {
                let relative = location.relative(key).unwrap_or(key);
                if written_dirs.contains(partition_dir(relative)) {
                    store.delete(location.bucket(), key)?;
                }
            }
        }
    }

    Ok(())
}

/// Escreve o frame como dataset particionado e devolve os objetos criados.
pub fn write_dataset(
    store: &dyn ObjectStore,
    location: &StorageLocation,
    frame: &DataFrame,
    partition_keys: &[String],
    mode: WriteMode,
) -> Result<WriteResult, ProcessorError> {
    let files = encode_partitions(frame, partition_keys)?;
    prepare_destination(store, location, mode, &partition_dirs(&files))?;

    let mut result = WriteResult::default();
    for file in &files {
        store.put(location.bucket(), &location.key(&file.relative_key), &file.bytes)?;
        result.record(location, &file.relative_key, &file.values);
    }

    info!(
        location = %location,
        files = files.len(),
        rows = frame.height(),
        mode = %mode,
        "dataset gravado"
    );
    Ok(result)
}

/// Schema do frame no dialeto do catálogo, sem as colunas de partição.
pub fn columns_of(frame: &DataFrame, partition_keys: &[String]) -> Vec<ColumnDef> {
    frame
        .get_columns()
        .iter()
        .filter(|c| !partition_keys.iter().any(|k| k.as_str() == c.name().as_str()))
        .map(|c| ColumnDef::new(c.name().as_str(), &glue_type(c.dtype())))
        .collect()
}

/// Valores de partição de um resultado de escrita, para o catálogo.
pub fn written_partitions(result: &WriteResult) -> Vec<Vec<String>> {
    result.partitions_values.values().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalObjectStore;
    use tempfile::TempDir;

    fn sample() -> DataFrame {
        df!(
            "video_id" => ["a", "b", "c"],
            "views" => [10i64, 20, 30],
            "region" => ["us", "ca", "us"]
        )
        .unwrap()
    }

    fn location() -> StorageLocation {
        StorageLocation::parse("s3://cleansed/youtube/stats/").unwrap()
    }

    #[test]
    fn predicate_parsing() {
        let p = PartitionPredicate::parse("region in ('ca','gb','us')").unwrap();
        assert_eq!(p.column(), "region");
        assert!(p.matches(&[("region".to_string(), "ca".to_string())]));
        assert!(p.matches(&[("region".to_string(), "gb".to_string())]));
        assert!(!p.matches(&[("region".to_string(), "in".to_string())]));
        assert!(!p.matches(&[]));

        assert!(PartitionPredicate::parse("REGION IN ( \"us\" )").is_ok());
        assert!(PartitionPredicate::parse("region = 'us'").is_err());
        assert!(PartitionPredicate::parse("region in ()").is_err());
    }

    #[test]
    fn hive_path_helpers() {
        assert_eq!(
            partition_values("region=us/year=2024/f.parquet"),
            vec![
                ("region".to_string(), "us".to_string()),
                ("year".to_string(), "2024".to_string())
            ]
        );
        assert!(partition_values("f.parquet").is_empty());
        assert_eq!(partition_dir("region=us/f.parquet"), "region=us");
        assert_eq!(partition_dir("f.parquet"), "");
    }

    #[test]
    fn partitioned_write_then_filtered_read() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let keys = vec!["region".to_string()];

        let result = write_dataset(&store, &location(), &sample(), &keys, WriteMode::Append).unwrap();
        assert_eq!(result.paths.len(), 2);
        assert_eq!(
            result.partitions_values.get("s3://cleansed/youtube/stats/region=us/"),
            Some(&vec!["us".to_string()])
        );

        let predicate = PartitionPredicate::parse("region in ('us')").unwrap();
        let files = read_dataset(&store, &location(), DataFormat::Parquet, Some(&predicate), &[]).unwrap();
        assert_eq!(files.len(), 1);
        let frame = &files[0].frame;
        assert_eq!(frame.height(), 2);
        assert!(frame.column("region").is_ok());
        assert!(frame.column("views").is_ok());
    }

    #[test]
    fn partition_columns_are_not_stored_in_files() {
        let keys = vec!["region".to_string()];
        let files = encode_partitions(&sample(), &keys).unwrap();
        assert_eq!(files.iter().map(|f| f.rows).sum::<usize>(), 3);
        for file in files {
            assert!(file.relative_key.starts_with("region="));
            let frame = read_file(file.bytes, DataFormat::Parquet, &[]).unwrap();
            assert!(frame.column("region").is_err());
        }
    }

    #[test]
    fn text_columns_keep_leading_zeros() {
        let body = b"video_id,title,views\n0123,2024,10\n0456,7,20\n".to_vec();
        let text = vec!["video_id".to_string(), "title".to_string(), "region".to_string()];

        let frame = read_file(body.clone(), DataFormat::Csv, &text).unwrap();
        assert_eq!(frame.column("video_id").unwrap().dtype(), &DataType::String);
        let ids = frame.column("video_id").unwrap().as_materialized_series().clone();
        assert_eq!(ids.str().unwrap().get(0), Some("0123"));
        let titles = frame.column("title").unwrap().as_materialized_series().clone();
        assert_eq!(titles.str().unwrap().get(0), Some("2024"));
        assert_eq!(frame.column("views").unwrap().dtype(), &DataType::Int64);
        assert!(frame.column("region").is_err());

        let inferred = read_file(body, DataFormat::Csv, &[]).unwrap();
        assert_eq!(inferred.column("video_id").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn write_modes() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let keys = vec!["region".to_string()];
        let loc = location();

        write_dataset(&store, &loc, &sample(), &keys, WriteMode::Append).unwrap();
        write_dataset(&store, &loc, &sample(), &keys, WriteMode::Append).unwrap();
        assert_eq!(list_data_keys(&store, &loc, None).unwrap().len(), 4);

        let only_ca = df!("video_id" => ["z"], "views" => [1i64], "region" => ["ca"]).unwrap();
        write_dataset(&store, &loc, &only_ca, &keys, WriteMode::OverwritePartitions).unwrap();
        let remaining = list_data_keys(&store, &loc, None).unwrap();
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining.iter().filter(|k| k.contains("region=ca/")).count(), 1);

        assert!(matches!(
            write_dataset(&store, &loc, &sample(), &keys, WriteMode::ErrorIfExists),
            Err(ProcessorError::Storage(StorageError::AlreadyExists(_)))
        ));

        write_dataset(&store, &loc, &only_ca, &keys, WriteMode::Overwrite).unwrap();
        assert_eq!(list_data_keys(&store, &loc, None).unwrap().len(), 1);
    }

    #[test]
    fn hidden_objects_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let loc = location();
        store
            .put("cleansed", &loc.key("_temporary/run/region=us/x.parquet"), b"")
            .unwrap();
        assert!(list_data_keys(&store, &loc, None).unwrap().is_empty());
    }

    #[test]
    fn catalog_columns_exclude_partitions() {
        let columns = columns_of(&sample(), &["region".to_string()]);
        assert_eq!(
            columns,
            vec![
                ColumnDef::new("video_id", "string"),
                ColumnDef::new("views", "bigint")
            ]
        );
    }
}
