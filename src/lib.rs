//! Session-scoped filtering and selection over feature tables.
//!
//! ```text
//!   sources ──► ResourceCaches ──► FeatureFrame ──► engine::rerun ──► SessionView
//!                                                     │
//!                         ScopedStore (per session) ◄─┘
//! ```

pub mod cache;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod explore;
pub mod filters;
pub mod invalidator;
pub mod naming;
pub mod setup;
pub mod state;

pub use error::{ExplorerError, Result};
