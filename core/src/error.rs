//! Ambient error types shared across component boundaries.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::backup::BackupError;
use crate::cache::CacheError;
use crate::providers::ProviderError;
use crate::registry::RegistryError;
use crate::transform::TransformError;

/// The outermost error type. Only the job runner's fatal-failure boundary
/// catches into this; every other component keeps its failures local per
/// the propagation rules in SPEC_FULL §7.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("config error: {0}")]
    Config(String),
}
