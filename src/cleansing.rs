//! # Job de Limpeza (bruto -> limpo)
//!
//! ## Visão Geral
//! Lê a tabela bruta pelo catálogo (com o predicado de partição aplicado antes
//! da leitura), aplica o mapeamento de colunas, resolve colunas ambíguas em
//! structs, poda campos e linhas nulos, consolida tudo num único frame e grava o
//! dataset particionado no destino.
//!
//! ## Boas Práticas
//! - **Commit único**: os arquivos são preparados em `_temporary/<run_id>/` e só
//!   chegam ao destino no `commit`. Em qualquer falha o staging é descartado.
//! - **Histórico**: cada execução confirmada grava um registro em
//!   `_job_runs/<job>/<run_id>.json` no bucket de destino.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, DataFormat, TableUpdate, glue_type, parse_type};
use crate::dataset::{
    DatasetFile, PartitionPredicate, WriteResult, columns_of, encode_partitions, partition_dir,
    prepare_destination, read_dataset, written_partitions,
};
use crate::errors::ProcessorError;
use crate::models::{CleansingConfig, ColumnMapping, WriteMode};
use crate::storage::{ObjectStore, StorageLocation};

/// Área de staging, relativa à raiz do bucket de destino.
pub const STAGING_DIR: &str = "_temporary";

/// Histórico de execuções, relativo à raiz do bucket de destino.
pub const RUNS_DIR: &str = "_job_runs";

// ---
// Transformações
// ---

/// Colunas de origem declaradas como `string`. São lidas como texto para que
/// valores como `0123` não percam os zeros à esquerda na inferência.
pub fn text_columns(mappings: &[ColumnMapping]) -> Result<Vec<String>, ProcessorError> {
    let mut names = Vec::new();
    for mapping in mappings {
        if parse_type(&mapping.source_type)? == DataType::String && !names.contains(&mapping.source) {
            names.push(mapping.source.clone());
        }
    }
    Ok(names)
}

/// Aplica as regras de mapeamento. Colunas sem regra são descartadas.
///
/// O cast é estrito: se algum valor não converte, a coluna mantém o tipo de
/// origem neste arquivo e vira uma coluna ambígua na união.
pub fn apply_mapping(frame: &DataFrame, mappings: &[ColumnMapping]) -> Result<DataFrame, ProcessorError> {
    let mut columns = Vec::with_capacity(mappings.len());

    for mapping in mappings {
        let Ok(column) = frame.column(&mapping.source) else {
            debug!(column = %mapping.source, "coluna de origem ausente, regra ignorada");
            continue;
        };
        let target_type = parse_type(&mapping.target_type)?;
        let series = column.as_materialized_series();

        let mapped = match series.strict_cast(&target_type) {
            Ok(cast) => cast,
            Err(e) => {
                debug!(
                    column = %mapping.source,
                    target = %mapping.target_type,
                    error = %e,
                    "cast estrito falhou, mantendo o tipo de origem"
                );
                series.clone()
            }
        };
        columns.push(Column::from(mapped.with_name(PlSmallStr::from(mapping.target.as_str()))));
    }

    Ok(DataFrame::new(columns)?)
}

/// Nome do campo do struct que guarda os valores de um tipo.
pub fn choice_name(dtype: &DataType) -> String {
    match dtype {
        DataType::Int64 => "long".to_string(),
        DataType::Int32 => "int".to_string(),
        DataType::Float64 => "double".to_string(),
        DataType::Float32 => "float".to_string(),
        DataType::Boolean => "boolean".to_string(),
        DataType::String => "string".to_string(),
        other => glue_type(other),
    }
}

/// Um struct conta como nulo quando todos os seus campos são nulos.
pub fn is_all_null(series: &Series) -> bool {
    if series.null_count() == series.len() {
        return true;
    }
    match series.struct_() {
        Ok(fields) => fields.fields_as_series().iter().all(is_all_null),
        Err(_) => false,
    }
}

fn not_null_mask(series: &Series) -> BooleanChunked {
    if let Ok(fields) = series.struct_() {
        let fields = fields.fields_as_series();
        if !fields.is_empty() {
            return fields
                .iter()
                .map(not_null_mask)
                .fold(BooleanChunked::full(PlSmallStr::from("mask"), false, series.len()), |acc, m| &acc | &m);
        }
    }
    series.is_not_null()
}

fn null_series(name: &str, len: usize, dtype: &DataType) -> Result<Series, ProcessorError> {
    let name = PlSmallStr::from(name);
    match dtype {
        DataType::Struct(fields) => {
            let children = fields
                .iter()
                .map(|f| null_series(f.name().as_str(), len, f.dtype()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StructChunked::from_series(name, len, children.iter())?.into_series())
        }
        other => Ok(Series::full_null(name, len, other)),
    }
}

/// Tipo final de cada coluna na união dos arquivos.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedType {
    Single(DataType),
    /// Tipos observados, indexados pelo nome do campo no struct.
    Choice(BTreeMap<String, DataType>),
}

impl ResolvedType {
    fn dtype(&self) -> DataType {
        match self {
            ResolvedType::Single(dtype) => dtype.clone(),
            ResolvedType::Choice(choices) => DataType::Struct(
                choices
                    .iter()
                    .map(|(name, dtype)| Field::new(PlSmallStr::from(name.as_str()), dtype.clone()))
                    .collect(),
            ),
        }
    }
}

/// Colunas da união, na ordem de primeira aparição, com o tipo resolvido.
/// Arquivos em que a coluna é toda nula não contam como evidência de tipo.
pub fn resolve_types(frames: &[DataFrame]) -> Vec<(String, ResolvedType)> {
    let mut order: Vec<String> = Vec::new();
    let mut observed: BTreeMap<String, BTreeMap<String, DataType>> = BTreeMap::new();
    let mut fallback: BTreeMap<String, DataType> = BTreeMap::new();

    for frame in frames {
        for column in frame.get_columns() {
            let name = column.name().to_string();
            if !order.contains(&name) {
                order.push(name.clone());
                fallback.insert(name.clone(), column.dtype().clone());
            }
            let types = observed.entry(name).or_default();
            if !is_all_null(column.as_materialized_series()) {
                types.insert(choice_name(column.dtype()), column.dtype().clone());
            }
        }
    }

    order
        .into_iter()
        .map(|name| {
            let types = observed.remove(&name).unwrap_or_default();
            let resolved = match types.len() {
                0 => ResolvedType::Single(fallback.remove(&name).unwrap_or(DataType::String)),
                1 => ResolvedType::Single(types.into_values().next().unwrap_or(DataType::String)),
                _ => ResolvedType::Choice(types),
            };
            (name, resolved)
        })
        .collect()
}

/// Ajusta uma coluna de um arquivo ao tipo resolvido.
fn conform(series: &Series, name: &str, resolved: &ResolvedType) -> Result<Series, ProcessorError> {
    let len = series.len();
    if is_all_null(series) {
        return null_series(name, len, &resolved.dtype());
    }

    match resolved {
        ResolvedType::Single(dtype) if series.dtype() == dtype => Ok(series.clone()),
        ResolvedType::Single(dtype) => Ok(series.cast(dtype)?),
        ResolvedType::Choice(choices) => {
            let own = choice_name(series.dtype());
            let fields = choices
                .iter()
                .map(|(field, dtype)| {
                    if *field == own {
                        Ok(series.clone().with_name(PlSmallStr::from(field.as_str())))
                    } else {
                        null_series(field, len, dtype)
                    }
                })
                .collect::<Result<Vec<_>, ProcessorError>>()?;
            Ok(StructChunked::from_series(PlSmallStr::from(name), len, fields.iter())?.into_series())
        }
    }
}

/// Une os arquivos num único frame, resolvendo colunas ambíguas com struct.
pub fn union_frames(frames: &[DataFrame]) -> Result<Option<DataFrame>, ProcessorError> {
    let schema = resolve_types(frames);
    for (name, resolved) in &schema {
        if let ResolvedType::Choice(choices) = resolved {
            warn!(
                column = %name,
                types = ?choices.keys().collect::<Vec<_>>(),
                "coluna ambígua resolvida como struct"
            );
        }
    }

    let mut union: Option<DataFrame> = None;
    for frame in frames {
        let height = frame.height();
        let columns = schema
            .iter()
            .map(|(name, resolved)| {
                let series = match frame.column(name) {
                    Ok(column) => conform(column.as_materialized_series(), name, resolved)?,
                    Err(_) => null_series(name, height, &resolved.dtype())?,
                };
                Ok(Column::from(series))
            })
            .collect::<Result<Vec<_>, ProcessorError>>()?;
        let aligned = DataFrame::new(columns)?;

        match union.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&aligned)?;
            }
            None => union = Some(aligned),
        }
    }

    Ok(union)
}

/// Remove colunas nulas em todo o dataset.
pub fn drop_null_fields(frame: &DataFrame) -> Result<DataFrame, ProcessorError> {
    let mut pruned = frame.clone();
    for column in frame.get_columns() {
        if is_all_null(column.as_materialized_series()) {
            debug!(column = %column.name(), "coluna totalmente nula removida");
            pruned = pruned.drop(column.name().as_str())?;
        }
    }
    Ok(pruned)
}

/// Remove linhas em que todas as colunas de dados (fora as de partição) são nulas.
pub fn drop_null_rows(frame: &DataFrame, partition_keys: &[String]) -> Result<DataFrame, ProcessorError> {
    let data_columns: Vec<&Column> = frame
        .get_columns()
        .iter()
        .filter(|c| !partition_keys.iter().any(|k| k.as_str() == c.name().as_str()))
        .collect();

    if data_columns.is_empty() {
        return Ok(frame.clone());
    }

    let keep = data_columns.iter().fold(
        BooleanChunked::full(PlSmallStr::from("keep"), false, frame.height()),
        |acc, column| &acc | &not_null_mask(column.as_materialized_series()),
    );
    Ok(frame.filter(&keep)?)
}

// ---
// Execução (staging + commit)
// ---

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StagedFile {
    relative_key: String,
    values: Vec<String>,
}

/// Destino de uma execução.
#[derive(Debug, Clone)]
pub struct JobTarget {
    pub location: StorageLocation,
    pub database: String,
    pub table: String,
    pub partition_keys: Vec<String>,
    pub mode: WriteMode,
}

/// Registro persistido ao fim de uma execução confirmada.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub job: String,
    pub run_id: String,
    pub status: String,
    pub source: String,
    pub target: String,
    pub write_mode: WriteMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows: usize,
    pub files: Vec<String>,
    pub steps: Vec<StepRecord>,
}

/// Resumo devolvido por `run_job`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub run_id: String,
    pub rows: usize,
    pub result: WriteResult,
    pub record_key: String,
}

/// Estado de uma execução do job.
pub struct JobRun<'a> {
    store: &'a dyn ObjectStore,
    job_name: String,
    run_id: String,
    started_at: DateTime<Utc>,
    staging: StorageLocation,
    staged: Vec<StagedFile>,
    steps: Vec<StepRecord>,
    rows: usize,
}

impl<'a> JobRun<'a> {
    /// Abre uma execução com staging no bucket do destino.
    pub fn start(
        store: &'a dyn ObjectStore,
        job_name: &str,
        target: &StorageLocation,
    ) -> Result<Self, ProcessorError> {
        let run_id = Uuid::new_v4().to_string();
        let staging = StorageLocation::parse(&format!(
            "s3://{}/{}/{}",
            target.bucket(),
            STAGING_DIR,
            run_id
        ))?;

        Ok(Self {
            store,
            job_name: job_name.to_string(),
            run_id,
            started_at: Utc::now(),
            staging,
            staged: Vec::new(),
            steps: Vec::new(),
            rows: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record_step(&mut self, name: &str, frame: &DataFrame) {
        debug!(job = %self.job_name, step = name, rows = frame.height(), "etapa concluída");
        self.steps.push(StepRecord {
            name: name.to_string(),
            rows: frame.height(),
            columns: frame.width(),
            at: Utc::now(),
        });
    }

    /// Codifica o frame por partição e envia os arquivos para o staging.
    pub fn stage(&mut self, frame: &DataFrame, partition_keys: &[String]) -> Result<(), ProcessorError> {
        for file in encode_partitions(frame, partition_keys)? {
            self.store
                .put(self.staging.bucket(), &self.staging.key(&file.relative_key), &file.bytes)?;
            self.rows += file.rows;
            self.staged.push(StagedFile {
                relative_key: file.relative_key,
                values: file.values,
            });
        }
        Ok(())
    }

    /// Publica o staging no destino, atualiza o catálogo e grava o registro da execução.
    pub fn commit(
        &mut self,
        catalog: &mut Catalog,
        target: &JobTarget,
        frame: &DataFrame,
        source: &str,
    ) -> Result<JobSummary, ProcessorError> {
        if target.location.bucket() != self.staging.bucket() {
            return Err(ProcessorError::Schema(format!(
                "staging em '{}' não pertence ao bucket do destino {}",
                self.staging.bucket(),
                target.location
            )));
        }

        let mut result = WriteResult::default();

        if self.staged.is_empty() {
            warn!(job = %self.job_name, run_id = %self.run_id, "nenhum dado para gravar; destino mantido");
        } else {
            let dirs: BTreeSet<String> = self
                .staged
                .iter()
                .map(|f| partition_dir(&f.relative_key).to_string())
                .collect();
            prepare_destination(self.store, &target.location, target.mode, &dirs)?;

            for file in &self.staged {
                self.store.rename(
                    target.location.bucket(),
                    &self.staging.key(&file.relative_key),
                    &target.location.key(&file.relative_key),
                )?;
                result.record(&target.location, &file.relative_key, &file.values);
            }
            self.staged.clear();

            catalog.upsert(TableUpdate {
                database: target.database.clone(),
                table: target.table.clone(),
                location: target.location.uri(),
                format: DataFormat::Parquet,
                columns: columns_of(frame, &target.partition_keys),
                partition_keys: target.partition_keys.clone(),
                partitions: written_partitions(&result),
                mode: target.mode,
            })?;
        }

        let record = RunRecord {
            job: self.job_name.clone(),
            run_id: self.run_id.clone(),
            status: "SUCCEEDED".to_string(),
            source: source.to_string(),
            target: target.location.uri(),
            write_mode: target.mode,
            started_at: self.started_at,
            finished_at: Utc::now(),
            rows: self.rows,
            files: result.paths.clone(),
            steps: self.steps.clone(),
        };
        let record_key = format!("{}/{}/{}.json", RUNS_DIR, self.job_name, self.run_id);
        self.store.put(
            target.location.bucket(),
            &record_key,
            &serde_json::to_vec_pretty(&record)?,
        )?;

        info!(
            job = %self.job_name,
            run_id = %self.run_id,
            rows = self.rows,
            files = result.paths.len(),
            "job confirmado"
        );

        Ok(JobSummary {
            run_id: self.run_id.clone(),
            rows: self.rows,
            result,
            record_key,
        })
    }

    /// Descarta o que ainda estiver no staging.
    pub fn abort(&mut self) {
        for file in self.staged.drain(..) {
            let key = self.staging.key(&file.relative_key);
            if let Err(e) = self.store.delete(self.staging.bucket(), &key) {
                warn!(key = %key, error = %e, "falha ao remover arquivo do staging");
            }
        }
        warn!(job = %self.job_name, run_id = %self.run_id, "execução abortada");
    }
}

/// Leitura + transformações até o frame final, registrando cada etapa.
fn transform(
    run: &mut JobRun<'_>,
    files: Vec<DatasetFile>,
    config: &CleansingConfig,
) -> Result<Option<DataFrame>, ProcessorError> {
    let mapped = files
        .iter()
        .map(|file| apply_mapping(&file.frame, &config.mappings))
        .collect::<Result<Vec<_>, _>>()?;

    let Some(frame) = union_frames(&mapped)? else {
        return Ok(None);
    };
    run.record_step("apply_mapping", &frame);

    let frame = drop_null_fields(&frame)?;
    run.record_step("drop_null_fields", &frame);

    let mut frame = drop_null_rows(&frame, &config.partition_keys)?;
    run.record_step("drop_null_rows", &frame);

    frame.as_single_chunk_par();
    run.record_step("coalesce", &frame);

    run.stage(&frame, &config.partition_keys)?;
    Ok(Some(frame))
}

/// Executa o job completo: leitura pelo catálogo, transformações e commit.
pub fn run_job(
    store: &dyn ObjectStore,
    catalog: &mut Catalog,
    config: &CleansingConfig,
) -> Result<JobSummary, ProcessorError> {
    let source = catalog
        .table(&config.source_database, &config.source_table)?
        .clone();
    let source_name = format!("{}.{}", source.database, source.name);
    let source_location = StorageLocation::parse(&source.location)?;
    let predicate = PartitionPredicate::parse(&config.push_down_predicate)?;
    let as_text = text_columns(&config.mappings)?;

    let target = JobTarget {
        location: StorageLocation::parse(&config.target_location)?,
        database: config.target_database.clone(),
        table: config.target_table.clone(),
        partition_keys: config.partition_keys.clone(),
        mode: config.write_mode,
    };

    let mut run = JobRun::start(store, &config.job_name, &target.location)?;
    info!(job = %config.job_name, run_id = %run.run_id(), source = %source_name, "iniciando job");

    let outcome = read_dataset(store, &source_location, source.format, Some(&predicate), &as_text)
        .and_then(|files| {
            if files.is_empty() {
                warn!(
                    job = %config.job_name,
                    predicate = %config.push_down_predicate,
                    "nenhuma partição casa com o predicado"
                );
            }
            transform(&mut run, files, config)
        })
        .and_then(|frame| {
            let frame = frame.unwrap_or_else(DataFrame::empty);
            run.commit(catalog, &target, &frame, &source_name)
        });

    outcome.inspect_err(|e| {
        error!(job = %config.job_name, run_id = %run.run_id(), error = %e, "job falhou");
        run.abort();
    })
}
