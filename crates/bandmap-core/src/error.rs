//! Structural (fatal) errors
//!
//! Anything that makes the bundle unusable is reported before a single
//! backing resource is acquired.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::header::HeaderError;
use crate::table::TableError;

/// The bundle is malformed
#[derive(Debug, Error)]
pub enum StructuralError {
    /// Header document could not be read or is invalid
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// Band files could not be enumerated or are inconsistent
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Band layout does not fit the image
    #[error(transparent)]
    Table(#[from] TableError),
}
