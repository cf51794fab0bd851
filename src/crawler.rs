//! # Crawler
//!
//! Registra no catálogo um dataset que já existe no object store: descobre as
//! chaves de partição pelos diretórios `chave=valor`, infere o schema lendo os
//! arquivos e faz o upsert da entrada. É assim que a zona bruta de CSVs vira a
//! tabela lida pelo job de limpeza.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogEntry, ColumnDef, DataFormat, TableUpdate};
use crate::dataset::{DatasetFile, HIVE_DEFAULT_PARTITION, columns_of, read_dataset};
use crate::errors::ProcessorError;
use crate::models::WriteMode;
use crate::storage::{ObjectStore, StorageLocation};

/// Chaves de partição na ordem em que aparecem nos caminhos.
pub fn partition_keys_of(files: &[DatasetFile]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for file in files {
        for (key, _) in &file.partition {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

/// Schema unificado. O primeiro tipo visto para cada coluna prevalece.
pub fn unify_columns(files: &[DatasetFile], partition_keys: &[String]) -> Vec<ColumnDef> {
    let mut columns: Vec<ColumnDef> = Vec::new();
    for file in files {
        for column in columns_of(&file.frame, partition_keys) {
            match columns.iter().find(|c| c.name == column.name) {
                Some(known) if known.data_type != column.data_type => {
                    warn!(
                        key = %file.key,
                        column = %column.name,
                        known = %known.data_type,
                        found = %column.data_type,
                        "tipos divergentes entre arquivos; mantendo o primeiro"
                    );
                }
                Some(_) => {}
                None => columns.push(column),
            }
        }
    }
    columns
}

fn partitions_of(files: &[DatasetFile], partition_keys: &[String]) -> Vec<Vec<String>> {
    if partition_keys.is_empty() {
        return Vec::new();
    }

    let partitions: BTreeSet<Vec<String>> = files
        .iter()
        .map(|file| {
            partition_keys
                .iter()
                .map(|key| {
                    file.partition
                        .iter()
                        .find(|(k, _)| k == key)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_else(|| HIVE_DEFAULT_PARTITION.to_string())
                })
                .collect()
        })
        .collect();

    partitions.into_iter().collect()
}

/// Varre `location` e registra (ou atualiza) `database.table`.
pub fn crawl(
    store: &dyn ObjectStore,
    catalog: &mut Catalog,
    location: &StorageLocation,
    format: DataFormat,
    database: &str,
    table: &str,
) -> Result<CatalogEntry, ProcessorError> {
    let files = read_dataset(store, location, format, None, &[])?;
    if files.is_empty() {
        return Err(ProcessorError::Schema(format!(
            "nenhum arquivo de dados em {}",
            location.uri()
        )));
    }

    let partition_keys = partition_keys_of(&files);
    let columns = unify_columns(&files, &partition_keys);
    let partitions = partitions_of(&files, &partition_keys);

    let entry = catalog.upsert(TableUpdate {
        database: database.to_string(),
        table: table.to_string(),
        location: location.uri(),
        format,
        columns,
        partition_keys,
        partitions,
        mode: WriteMode::Append,
    })?;

    info!(
        database,
        table,
        files = files.len(),
        partitions = entry.partitions.len(),
        version = entry.version,
        "tabela registrada pelo crawler"
    );
    Ok(entry)
}
