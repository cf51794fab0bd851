//! # Catálogo de Metadados
//!
//! Registro persistente (JSON) que liga um nome lógico `database.tabela` à
//! localização física, ao formato, ao schema e às partições de um dataset.
//! O conversor e o job de limpeza *atualizam* as entradas; nunca as recriam.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use polars::prelude::DataType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{CatalogError, ConfigError};
use crate::models::WriteMode;

/// Formato físico dos arquivos de um dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Parquet,
}

impl DataFormat {
    /// Reconhece o formato pela extensão da chave.
    pub fn from_key(key: &str) -> Option<Self> {
        let lower = key.to_ascii_lowercase();
        if lower.ends_with(".csv") {
            Some(DataFormat::Csv)
        } else if lower.ends_with(".parquet") {
            Some(DataFormat::Parquet)
        } else {
            None
        }
    }
}

impl FromStr for DataFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            "parquet" => Ok(DataFormat::Parquet),
            other => Err(ConfigError::Invalid(format!("formato desconhecido: '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
        }
    }
}

/// Metadados de uma tabela registrada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub database: String,
    pub name: String,
    pub location: String,
    pub format: DataFormat,
    pub columns: Vec<ColumnDef>,
    pub partition_keys: Vec<ColumnDef>,
    /// Valores de partição conhecidos, na ordem de `partition_keys`.
    pub partitions: BTreeSet<Vec<String>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Alteração a aplicar numa entrada (criação ou atualização).
#[derive(Debug, Clone)]
pub struct TableUpdate {
    pub database: String,
    pub table: String,
    pub location: String,
    pub format: DataFormat,
    pub columns: Vec<ColumnDef>,
    pub partition_keys: Vec<String>,
    pub partitions: Vec<Vec<String>>,
    pub mode: WriteMode,
}

impl CatalogEntry {
    fn create(update: &TableUpdate, now: DateTime<Utc>) -> Self {
        Self {
            database: update.database.clone(),
            name: update.table.clone(),
            location: update.location.clone(),
            format: update.format,
            columns: update.columns.clone(),
            partition_keys: partition_defs(&update.partition_keys),
            partitions: update.partitions.iter().cloned().collect(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, update: &TableUpdate, now: DateTime<Utc>) {
        self.location = update.location.clone();
        self.format = update.format;

        if update.mode == WriteMode::Overwrite {
            self.columns = update.columns.clone();
            self.partition_keys = partition_defs(&update.partition_keys);
            self.partitions = update.partitions.iter().cloned().collect();
        } else {
            for column in &update.columns {
                match self.columns.iter_mut().find(|c| c.name == column.name) {
                    Some(existing) if existing.data_type != column.data_type => {
                        warn!(
                            table = %self.name,
                            column = %column.name,
                            from = %existing.data_type,
                            to = %column.data_type,
                            "tipo de coluna alterado no catálogo"
                        );
                        existing.data_type = column.data_type.clone();
                    }
                    Some(_) => {}
                    None => self.columns.push(column.clone()),
                }
            }
            if !update.partition_keys.is_empty() {
                self.partition_keys = partition_defs(&update.partition_keys);
            }
            self.partitions.extend(update.partitions.iter().cloned());
        }

        self.version += 1;
        self.updated_at = now;
    }

    pub fn partition_key_names(&self) -> Vec<String> {
        self.partition_keys.iter().map(|c| c.name.clone()).collect()
    }
}

fn partition_defs(keys: &[String]) -> Vec<ColumnDef> {
    keys.iter().map(|k| ColumnDef::new(k, "string")).collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogState {
    databases: BTreeMap<String, BTreeMap<String, CatalogEntry>>,
}

/// Catálogo persistido num único arquivo JSON.
#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    state: CatalogState,
}

impl Catalog {
    /// Abre o catálogo; um arquivo inexistente equivale a um catálogo vazio.
    ///
    /// Supõe um único escritor por arquivo: o estado é lido aqui e cada
    /// `upsert` regrava o arquivo inteiro a partir dele.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let content = fs::read(&path)?;
            serde_json::from_slice(&content)?
        } else {
            debug!(path = %path.display(), "catálogo inexistente, iniciando vazio");
            CatalogState::default()
        };
        Ok(Self { path, state })
    }

    pub fn table(&self, database: &str, table: &str) -> Result<&CatalogEntry, CatalogError> {
        self.state
            .databases
            .get(database)
            .and_then(|tables| tables.get(table))
            .ok_or_else(|| CatalogError::TableNotFound {
                database: database.to_string(),
                table: table.to_string(),
            })
    }

    /// Cria ou atualiza a entrada e persiste o catálogo.
    ///
    /// A alteração é feita numa cópia do estado; a memória só muda depois que
    /// o arquivo foi gravado.
    pub fn upsert(&mut self, update: TableUpdate) -> Result<CatalogEntry, CatalogError> {
        let now = Utc::now();
        let mut next = self.state.clone();
        let tables = next
            .databases
            .entry(update.database.clone())
            .or_default();

        let entry = match tables.get_mut(&update.table) {
            Some(existing) => {
                existing.apply(&update, now);
                existing.clone()
            }
            None => {
                info!(database = %update.database, table = %update.table, "registrando nova tabela");
                let created = CatalogEntry::create(&update, now);
                tables.insert(update.table.clone(), created.clone());
                created
            }
        };

        self.save(&next)?;
        self.state = next;
        Ok(entry)
    }

    fn save(&self, state: &CatalogState) -> Result<(), CatalogError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Nome do tipo no dialeto do catálogo (Hive/Glue).
pub fn glue_type(dtype: &DataType) -> String {
    match dtype {
        DataType::Boolean => "boolean".to_string(),
        DataType::Int32 => "int".to_string(),
        DataType::Float32 => "float".to_string(),
        DataType::String | DataType::Null => "string".to_string(),
        DataType::List(inner) => format!("array<{}>", glue_type(inner)),
        DataType::Array(inner, _) => format!("array<{}>", glue_type(inner)),
        DataType::Struct(fields) => {
            let inner = fields
                .iter()
                .map(|f| format!("{}:{}", f.name(), glue_type(f.dtype())))
                .collect::<Vec<_>>()
                .join(",");
            format!("struct<{}>", inner)
        }
        other if other.is_integer() => "bigint".to_string(),
        other if other.is_float() => "double".to_string(),
        other => other.to_string(),
    }
}

/// Converte um nome de tipo de mapeamento para o tipo do Polars.
pub fn parse_type(name: &str) -> Result<DataType, ConfigError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "string" | "varchar" => Ok(DataType::String),
        "long" | "bigint" => Ok(DataType::Int64),
        "int" | "integer" => Ok(DataType::Int32),
        "double" => Ok(DataType::Float64),
        "float" => Ok(DataType::Float32),
        "boolean" | "bool" => Ok(DataType::Boolean),
        _ => Err(ConfigError::UnsupportedType(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::{Field, PlSmallStr};
    use tempfile::TempDir;

    fn update(mode: WriteMode, columns: &[(&str, &str)], partitions: &[&str]) -> TableUpdate {
        TableUpdate {
            database: "db_youtube_raw".to_string(),
            table: "raw_statistics".to_string(),
            location: "s3://raw/youtube/raw_statistics/".to_string(),
            format: DataFormat::Csv,
            columns: columns.iter().map(|(n, t)| ColumnDef::new(n, t)).collect(),
            partition_keys: vec!["region".to_string()],
            partitions: partitions.iter().map(|p| vec![p.to_string()]).collect(),
            mode,
        }
    }

    #[test]
    fn upsert_creates_then_merges() {
        let dir = TempDir::new().unwrap();
        let mut catalog = Catalog::open(dir.path().join("catalog.json")).unwrap();

        let first = catalog
            .upsert(update(WriteMode::Append, &[("video_id", "string")], &["us"]))
            .unwrap();
        assert_eq!(first.version, 1);

        let second = catalog
            .upsert(update(
                WriteMode::Append,
                &[("video_id", "string"), ("views", "bigint")],
                &["ca"],
            ))
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.columns.len(), 2);
        assert_eq!(second.partitions.len(), 2);
    }

    #[test]
    fn overwrite_replaces_schema_and_partitions() {
        let dir = TempDir::new().unwrap();
        let mut catalog = Catalog::open(dir.path().join("catalog.json")).unwrap();
        catalog
            .upsert(update(WriteMode::Append, &[("a", "string"), ("b", "bigint")], &["us", "ca"]))
            .unwrap();
        let entry = catalog
            .upsert(update(WriteMode::Overwrite, &[("c", "double")], &["gb"]))
            .unwrap();
        assert_eq!(entry.columns, vec![ColumnDef::new("c", "double")]);
        assert_eq!(entry.partitions.len(), 1);
        assert_eq!(entry.version, 2);
    }

    #[test]
    fn catalog_is_persisted_and_reloaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta").join("catalog.json");
        {
            let mut catalog = Catalog::open(&path).unwrap();
            catalog
                .upsert(update(WriteMode::Append, &[("video_id", "string")], &["us"]))
                .unwrap();
        }
        let reopened = Catalog::open(&path).unwrap();
        let entry = reopened.table("db_youtube_raw", "raw_statistics").unwrap();
        assert_eq!(entry.format, DataFormat::Csv);
        assert_eq!(entry.partition_key_names(), vec!["region"]);
        assert!(reopened.table("db_youtube_raw", "other").is_err());
    }

    #[test]
    fn failed_save_leaves_memory_untouched() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let mut catalog = Catalog::open(blocker.join("catalog.json")).unwrap();

        assert!(matches!(
            catalog.upsert(update(WriteMode::Append, &[("video_id", "string")], &["us"])),
            Err(CatalogError::Io(_))
        ));
        assert!(matches!(
            catalog.table("db_youtube_raw", "raw_statistics"),
            Err(CatalogError::TableNotFound { .. })
        ));
    }

    #[test]
    fn failed_save_keeps_previous_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        let mut catalog = Catalog::open(&path).unwrap();
        catalog
            .upsert(update(WriteMode::Append, &[("video_id", "string")], &["us"]))
            .unwrap();

        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), b"").unwrap();

        assert!(catalog
            .upsert(update(WriteMode::Overwrite, &[("views", "bigint")], &["ca"]))
            .is_err());
        let entry = catalog.table("db_youtube_raw", "raw_statistics").unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.columns, vec![ColumnDef::new("video_id", "string")]);
    }

    #[test]
    fn missing_table_is_reported() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.json")).unwrap();
        assert!(matches!(
            catalog.table("db", "t"),
            Err(CatalogError::TableNotFound { .. })
        ));
    }

    #[test]
    fn glue_type_names() {
        assert_eq!(glue_type(&DataType::Int64), "bigint");
        assert_eq!(glue_type(&DataType::List(Box::new(DataType::String))), "array<string>");
        let st = DataType::Struct(vec![
            Field::new(PlSmallStr::from("long"), DataType::Int64),
            Field::new(PlSmallStr::from("string"), DataType::String),
        ]);
        assert_eq!(glue_type(&st), "struct<long:bigint,string:string>");
        assert_eq!(parse_type("LONG").unwrap(), DataType::Int64);
        assert!(parse_type("decimal(10,2)").is_err());
    }
}
