use thiserror::Error;

/// Errors raised by the isosurface library.
#[derive(Debug, Error)]
pub enum Error {
    #[error("grid data holds {found} values but the grid size requires {expected}")]
    GridDataSize { expected: usize, found: usize },

    #[error("invalid shell data: {0}")]
    ShellData(String),

    #[error("{0}")]
    Decimation(String),

    #[error("invalid mesh archive: {0}")]
    MeshFormat(String),

    #[error("cannot evaluate grids: {0}")]
    Evaluation(String),

    #[error("computation cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Obj(#[from] tobj::LoadError),
}

pub type Result<T> = std::result::Result<T, Error>;
