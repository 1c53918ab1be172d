//! Isosurfaces of molecular orbitals, electron densities and cube data.
//!
//! The pipeline provides:
//! - Gaussian basis sets built from formatted-checkpoint arrays ([`shell`])
//! - Scalar fields sampled on regular grids ([`grid`], [`evaluator`], [`orbital`])
//! - Triangle meshes extracted with marching cubes ([`marching_cubes`], [`mesh`])
//! - Mesh simplification by edge collapse ([`decimator`])
//! - Signed surfaces with colours and mapped properties ([`surface`])
//! - Cancellable background tasks with progress reporting ([`task`])

pub mod config;
pub mod cube;
pub mod decimator;
pub mod error;
pub mod evaluator;
pub mod grid;
pub mod marching_cubes;
pub mod mesh;
pub mod orbital;
pub mod output;
pub mod settings;
pub mod shell;
pub mod surface;
pub mod surface_type;
pub mod task;
