use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use super::loader::{load_file, TABLE_EXTENSIONS};
use crate::cache::{is_http_url, Credential};
use crate::error::ExplorerError;

/// Column added to tables loaded from several sources.
pub const SOURCE_COLUMN: &str = "source_name";

// ---------------------------------------------------------------------------
// DataSource – an opened resource handle
// ---------------------------------------------------------------------------

/// An opened data source and the tables it offers.
///
/// Handles are cheap to keep around and are shared through the resource
/// cache, one per `(url, credential)`.
#[derive(Debug, Clone)]
pub struct DataSource {
    /// Canonical URL the handle was opened from.
    pub url: String,
    /// Display name, the last URL segment.
    pub name: String,
    tables: BTreeMap<String, PathBuf>,
}

impl DataSource {
    /// Scan a local directory (and its `tables/` subdirectory) or a single
    /// table file.
    pub fn scan(url: &str, path: &Path) -> Result<Self> {
        let mut tables = BTreeMap::new();
        if path.is_file() {
            register_table(&mut tables, path);
        } else if path.is_dir() {
            for dir in [path.to_path_buf(), path.join("tables")] {
                if !dir.is_dir() {
                    continue;
                }
                let entries = std::fs::read_dir(&dir)
                    .with_context(|| format!("listing {}", dir.display()))?;
                for entry in entries {
                    let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
                    register_table(&mut tables, &entry.path());
                }
            }
        } else {
            bail!("path {} does not exist", path.display());
        }

        Ok(DataSource {
            url: url.to_string(),
            name: source_name_from_url(url).to_string(),
            tables,
        })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Read one table fully into memory.
    pub fn load_table(&self, name: &str) -> Result<RecordBatch> {
        let path = self
            .tables
            .get(name)
            .with_context(|| format!("table '{name}' not found in {}", self.url))?;
        load_file(path).with_context(|| format!("loading table '{name}' from {}", path.display()))
    }
}

fn register_table(tables: &mut BTreeMap<String, PathBuf>, path: &Path) {
    let is_table = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| TABLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    if !is_table {
        return;
    }
    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        // first one wins when the same table exists in several formats
        tables
            .entry(stem.to_string())
            .or_insert_with(|| path.to_path_buf());
    }
}

/// Last path segment of a (canonical) URL.
pub fn source_name_from_url(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

// ---------------------------------------------------------------------------
// Opening sources
// ---------------------------------------------------------------------------

/// Connector seam: turns a canonical URL plus credential into a handle.
pub trait SourceOpener: Send + Sync {
    fn open(&self, url: &str, credential: &Credential) -> Result<DataSource, ExplorerError>;
}

/// Opens local directories and `file://` URLs.
#[derive(Debug, Clone)]
pub struct LocalOpener {
    pub allow_local_paths: bool,
}

impl Default for LocalOpener {
    fn default() -> Self {
        Self {
            allow_local_paths: true,
        }
    }
}

impl SourceOpener for LocalOpener {
    fn open(&self, url: &str, _credential: &Credential) -> Result<DataSource, ExplorerError> {
        if is_http_url(url) {
            return Err(ExplorerError::resource(
                url,
                "remote sources need a network connector; only local paths can be opened",
            ));
        }
        if !self.allow_local_paths {
            return Err(ExplorerError::resource(
                url,
                "local paths are disabled by configuration",
            ));
        }
        let path = url.strip_prefix("file://").unwrap_or(url);
        DataSource::scan(url, Path::new(path)).map_err(|e| ExplorerError::resource(url, e))
    }
}

// ---------------------------------------------------------------------------
// Multi-source tables
// ---------------------------------------------------------------------------

/// Stack the same table loaded from several sources, tagging each row with
/// its source name.
pub fn concat_sources(parts: Vec<(String, RecordBatch)>) -> Result<RecordBatch> {
    let Some((_, first)) = parts.first() else {
        bail!("no sources to concatenate");
    };
    let base_schema = first.schema();
    if base_schema.index_of(SOURCE_COLUMN).is_ok() {
        bail!("tables already carry a '{SOURCE_COLUMN}' column");
    }

    let mut fields: Vec<Field> = base_schema
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(Field::new(SOURCE_COLUMN, DataType::Utf8, false));
    let schema = Arc::new(Schema::new(fields));

    let mut tagged = Vec::with_capacity(parts.len());
    for (source, batch) in &parts {
        if batch.schema().fields() != base_schema.fields() {
            bail!("table from {source} has a different schema than the first source");
        }
        let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
        columns.push(Arc::new(StringArray::from(vec![
            source.as_str();
            batch.num_rows()
        ])));
        tagged.push(
            RecordBatch::try_new(schema.clone(), columns)
                .with_context(|| format!("tagging rows from {source}"))?,
        );
    }

    concat_batches(&schema, &tagged).context("concatenating source tables")
}
