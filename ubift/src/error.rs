//! Error types for ubift operations.

/// Alias for `Result<T, ubift::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the analysis and recovery layers.
///
/// Only failures that stop an operation surface here. Everything the engine
/// can work around (a corrupt header, an unparsable node, an unmapped
/// branch) degrades to a logged warning and a local skip instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The flash geometry was neither given nor inferable.
    #[error("geometry unknown: {0}")]
    GeometryUnknown(&'static str),

    /// The volume has no parsable superblock node at LEB 0.
    #[error("no superblock node in UBI volume '{volume}'")]
    MissingSuperblock {
        /// Name of the affected volume.
        volume: String,
    },

    /// Neither master LEB contains a parsable master node.
    #[error("no master node in UBI volume '{volume}'")]
    MissingMaster {
        /// Name of the affected volume.
        volume: String,
    },

    /// The configured master-node index exceeds the candidate list.
    #[error("master node index {index} out of range ({available} candidates)")]
    InvalidMasterIndex {
        /// Requested index.
        index: usize,
        /// Candidates actually found.
        available: usize,
    },

    /// Recovery was cancelled through the cooperative token.
    #[error("recovery cancelled")]
    Cancelled,

    /// A structural decode failed at a point with no skip path.
    #[error(transparent)]
    Media(#[from] ubift_media::ParseError),

    /// An I/O error while writing recovered output.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
