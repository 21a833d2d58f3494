//! Streaming data transfer
//!
//! - [`value`]: cell values and per-column type transforms
//! - [`wkb`]: geometry decoding
//! - [`sql`]: batch select / insert / count statements
//! - [`mover`]: the batch transfer protocol
//! - [`reconcile`]: source/target row-count comparison

pub mod mover;
pub mod reconcile;
pub mod sql;
pub mod value;
pub mod wkb;

pub use mover::{
    DataMigrationResult, DataMover, MoverOptions, TableMigrationResult, TableStatus, TypeWarning,
};
pub use reconcile::{reconcile, reconciliation_csv, RowCountCheck};
pub use value::{ColumnTransform, SqlValue};
