//! # Armazenamento de Objetos
//!
//! Abstração mínima de um object store (buckets + chaves), usada por todos os
//! estágios para a troca de dados. A implementação local grava cada objeto em
//! `<root>/<bucket>/<key>`, o que permite rodar o pipeline inteiro em disco.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::errors::StorageError;

const SCHEME: &str = "s3://";

/// Operações bloqueantes sobre um object store.
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Grava (ou substitui) um objeto.
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Todas as chaves do bucket que começam com `prefix`, em ordem lexicográfica.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Remove um objeto. Remover uma chave inexistente não é erro.
    fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Move um objeto dentro do mesmo bucket.
    fn rename(&self, bucket: &str, from: &str, to: &str) -> Result<(), StorageError>;
}

/// Sistema de arquivos local como object store.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
            return Err(StorageError::InvalidLocation(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        let mut path = self.bucket_path(bucket)?;
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key.is_empty()
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        fs::write(&path, data).map_err(|e| io_error(&path, e))
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => io_error(&path, e),
        })
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let bucket_root = self.bucket_path(bucket)?;
        let mut keys = Vec::new();
        if bucket_root.is_dir() {
            collect_keys(&bucket_root, &bucket_root, &mut keys)?;
        }
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn rename(&self, bucket: &str, from: &str, to: &str) -> Result<(), StorageError> {
        let source = self.object_path(bucket, from)?;
        let target = self.object_path(bucket, to)?;
        if !source.is_file() {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: from.to_string(),
            });
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        fs::rename(&source, &target).map_err(|e| io_error(&source, e))
    }
}

fn collect_keys(dir: &Path, bucket_root: &Path, out: &mut Vec<String>) -> Result<(), StorageError> {
    let entries = fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(&path, bucket_root, out)?;
        } else if let Ok(relative) = path.strip_prefix(bucket_root) {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push(key);
        }
    }
    Ok(())
}

/// Localização `s3://bucket/prefixo` de um dataset ou área de dados.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    bucket: String,
    prefix: String,
}

impl StorageLocation {
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        let rest = uri
            .trim()
            .strip_prefix(SCHEME)
            .ok_or_else(|| StorageError::InvalidLocation(uri.to_string()))?;

        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(StorageError::InvalidLocation(uri.to_string()));
        }

        let prefix = prefix.trim_matches('/');
        if !prefix.is_empty() {
            validate_key(prefix).map_err(|_| StorageError::InvalidLocation(uri.to_string()))?;
        }

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Chave completa de um caminho relativo a esta localização.
    pub fn key(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        if self.prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.prefix, relative)
        }
    }

    pub fn child(&self, relative: &str) -> StorageLocation {
        StorageLocation {
            bucket: self.bucket.clone(),
            prefix: self.key(relative.trim_end_matches('/')),
        }
    }

    /// Prefixo de listagem: termina em `/` para não casar com diretórios vizinhos.
    pub fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    /// Parte da chave abaixo desta localização, se a chave pertencer a ela.
    pub fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.list_prefix())
    }

    pub fn uri(&self) -> String {
        format!("{}{}/{}", SCHEME, self.bucket, self.list_prefix())
    }

    pub fn object_uri(&self, key: &str) -> String {
        format!("{}{}/{}", SCHEME, self.bucket, key)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Caminhos com segmento iniciado por `_` ou `.` são áreas técnicas (staging, histórico).
pub fn is_hidden(relative_key: &str) -> bool {
    relative_key
        .split('/')
        .any(|segment| segment.starts_with('_') || segment.starts_with('.'))
}
