use thiserror::Error;

/// Errors from `CellRing` construction and configuration.
///
/// Never returned from the packet hot path (`push`/`pull`/`pull_ready`):
/// a full ring or an empty ring is ordinary control flow, not an error.
#[derive(Debug, Error)]
pub enum RingError {
    #[error("cell_size must be in 1..={max}, got {got}")]
    InvalidCellSize { got: usize, max: usize },

    #[error("nof_cells must be in 1..={max}, got {got}")]
    InvalidCellCount { got: usize, max: usize },

    #[error("failed to map {bytes}-byte payload storage region: {source}")]
    PayloadMapFailed {
        bytes: usize,
        #[source]
        source: std::io::Error,
    },
}
