/// Data layer: table types, loading, sampling and export.
///
/// Architecture:
/// ```text
///  source dir (tables/*.parquet, *.csv)
///        │
///        ▼
///   ┌──────────┐
///   │  source   │  scan a directory, list its tables
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → RecordBatch
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │ FeatureFrame  │  table + features / categorical / others
///   └──────────────┘
///        │
///        ├──► sampling  (drawn subset only)
///        └──► export    (CSV / Parquet)
/// ```

pub mod export;
pub mod loader;
pub mod model;
pub mod sampling;
pub mod source;
