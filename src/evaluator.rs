//! Filling grids by sampling functions of position.
//!
//! The evaluators take ownership of the grids they fill and hand them back
//! when done. Work is spread over x-slices with rayon, and cancellation is
//! checked once per slice.
//!
//! The evaluation system provides:
//! - [`GridEvaluator`] for a single grid and a scalar closure
//! - [`MultiGridEvaluator`] for several grids sharing one vector-valued call per point
//! - A coarse-grain mode that only refines cells where the field is significant

use std::time::Instant;

use itertools::iproduct;
use nalgebra::Point3;
use rayon::prelude::*;
use tracing::debug;

use crate::config::{COARSE_GRAIN_FACTOR, DEFAULT_EVALUATION_THRESHOLD};
use crate::error::{Error, Result};
use crate::grid::{GridData, GridSize};
use crate::task::TaskContext;


/// A vector-valued function of position.
///
/// `Scratch` is working storage owned by a single thread, created once per
/// rayon worker.
pub trait FieldFunction: Sync {
    type Scratch: Send;

    /// Number of values produced per point.
    fn width(&self) -> usize;

    fn scratch(&self) -> Self::Scratch;

    /// Writes `width()` values at `point` into `values`.
    fn evaluate(&self, point: &Point3<f64>, scratch: &mut Self::Scratch, values: &mut [f64]);
}

/// Adapts a closure that writes a fixed number of values per point.
pub struct VectorField<F> {
    width: usize,
    function: F,
}

impl<F> VectorField<F>
where
    F: Fn(&Point3<f64>, &mut [f64]) + Sync,
{
    pub fn new(width: usize, function: F) -> Self {
        Self { width, function }
    }
}

impl<F> FieldFunction for VectorField<F>
where
    F: Fn(&Point3<f64>, &mut [f64]) + Sync,
{
    type Scratch = ();

    fn width(&self) -> usize {
        self.width
    }

    fn scratch(&self) -> Self::Scratch {}

    fn evaluate(&self, point: &Point3<f64>, _: &mut (), values: &mut [f64]) {
        (self.function)(point, values);
    }
}

/// Fills one grid from a scalar function.
pub struct GridEvaluator<F> {
    grid: GridData,
    function: F,
}

impl<F> GridEvaluator<F>
where
    F: Fn(&Point3<f64>) -> f64 + Sync,
{
    pub fn new(grid: GridData, function: F) -> Self {
        Self { grid, function }
    }

    /// Progress units reported by [`GridEvaluator::evaluate`], one per x-slice.
    pub fn work_units(&self) -> usize {
        self.grid.size().nx
    }

    pub fn evaluate(mut self, ctx: &TaskContext) -> Result<GridData> {
        let size = *self.grid.size();
        let (nx, ny, nz) = size.dims();
        let function = &self.function;

        let slices = (0..nx)
            .into_par_iter()
            .map(|i| {
                if ctx.is_cancelled() {
                    return None;
                }
                let slice: Vec<f64> = iproduct!(0..ny, 0..nz)
                    .map(|(j, k)| function(&size.point(i, j, k)))
                    .collect();
                ctx.advance(1);
                Some(slice)
            })
            .collect::<Option<Vec<_>>>()
            .ok_or(Error::Cancelled)?;

        for (v, x) in self.grid.data_mut().iter_mut().zip(slices.concat()) {
            *v = x;
        }
        Ok(self.grid)
    }
}

/// Sampling strategy for [`MultiGridEvaluator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvaluationMode {
    /// Evaluate every lattice point.
    Direct,
    /// Evaluate every second point first, then refine only the cells whose
    /// largest corner magnitude exceeds `COARSE_GRAIN_FACTOR * threshold`.
    CoarseGrain { threshold: f64 },
}

impl EvaluationMode {
    /// Progress units for a grid with `nx` x-slices.
    pub fn work_units(&self, nx: usize) -> usize {
        match self {
            EvaluationMode::Direct => nx,
            EvaluationMode::CoarseGrain { .. } => nx.div_ceil(2) + nx,
        }
    }
}

impl Default for EvaluationMode {
    fn default() -> Self {
        EvaluationMode::CoarseGrain {
            threshold: DEFAULT_EVALUATION_THRESHOLD,
        }
    }
}

/// Fills several grids of the same size from one vector-valued function.
///
/// **Context**: Orbitals and densities share the expensive part of their
/// evaluation, the basis-function values at each point. Filling all grids of
/// one size in a single sweep computes those values once per point.
///
/// **How it Works**: Value `m` of the function goes to grid `m`. In
/// coarse-grain mode a sparse pass evaluates the even lattice points. Each
/// cell of eight even points is then screened by its largest magnitude over
/// all fields. The seven remaining points of a significant cell are
/// evaluated; those of a quiet cell are averaged from the cell corners.
/// Points outside any complete cell are always evaluated.
pub struct MultiGridEvaluator<'a, F> {
    grids: Vec<GridData>,
    function: &'a F,
    mode: EvaluationMode,
}

impl<'a, F: FieldFunction> MultiGridEvaluator<'a, F> {
    pub fn new(grids: Vec<GridData>, function: &'a F, mode: EvaluationMode) -> Result<Self> {
        if !grids.is_empty() && grids.len() != function.width() {
            return Err(Error::Evaluation(format!(
                "{} grids for a function with {} values",
                grids.len(),
                function.width()
            )));
        }
        if let Some(first) = grids.first() {
            if grids.iter().any(|g| g.size() != first.size()) {
                return Err(Error::Evaluation("grids differ in size".to_string()));
            }
        }
        Ok(Self {
            grids,
            function,
            mode,
        })
    }

    /// Progress units reported by [`MultiGridEvaluator::evaluate`].
    pub fn work_units(&self) -> usize {
        self.mode
            .work_units(self.grids.first().map_or(0, |g| g.size().nx))
    }

    pub fn evaluate(mut self, ctx: &TaskContext) -> Result<Vec<GridData>> {
        if self.grids.is_empty() {
            return Ok(self.grids);
        }
        let size = *self.grids[0].size();
        if size.n_points() == 0 {
            return Ok(self.grids);
        }

        let start = Instant::now();
        let values = match self.mode {
            EvaluationMode::Direct => self.direct(&size, ctx)?,
            EvaluationMode::CoarseGrain { threshold } => self.coarse(&size, threshold, ctx)?,
        };
        debug!(
            "evaluated {} grids of {} points in {:.2?}",
            self.grids.len(),
            size.n_points(),
            start.elapsed()
        );

        let w = self.function.width();
        for (m, grid) in self.grids.iter_mut().enumerate() {
            for (n, v) in grid.data_mut().iter_mut().enumerate() {
                *v = values[n * w + m];
            }
        }
        Ok(self.grids)
    }

    /// All values, point-major with the `w` fields of a point adjacent.
    fn direct(&self, size: &GridSize, ctx: &TaskContext) -> Result<Vec<f64>> {
        let (nx, ny, nz) = size.dims();
        let w = self.function.width();

        let slices = (0..nx)
            .into_par_iter()
            .map_init(
                || (self.function.scratch(), vec![0.0; w]),
                |(scratch, values), i| {
                    if ctx.is_cancelled() {
                        return None;
                    }
                    let mut slice = Vec::with_capacity(ny * nz * w);
                    for (j, k) in iproduct!(0..ny, 0..nz) {
                        self.function.evaluate(&size.point(i, j, k), scratch, values);
                        slice.extend_from_slice(values);
                    }
                    ctx.advance(1);
                    Some(slice)
                },
            )
            .collect::<Option<Vec<_>>>()
            .ok_or(Error::Cancelled)?;

        Ok(slices.concat())
    }

    fn coarse(&self, size: &GridSize, threshold: f64, ctx: &TaskContext) -> Result<Vec<f64>> {
        let (nx, ny, nz) = size.dims();
        let w = self.function.width();
        let index = |i: usize, j: usize, k: usize| ((i * ny + j) * nz + k) * w;

        // sparse pass
        let even = (0..nx.div_ceil(2))
            .into_par_iter()
            .map_init(
                || (self.function.scratch(), vec![0.0; w]),
                |(scratch, values), half| {
                    if ctx.is_cancelled() {
                        return None;
                    }
                    let i = 2 * half;
                    let mut slice = Vec::with_capacity(ny.div_ceil(2) * nz.div_ceil(2) * w);
                    for (j, k) in iproduct!((0..ny).step_by(2), (0..nz).step_by(2)) {
                        self.function.evaluate(&size.point(i, j, k), scratch, values);
                        slice.extend_from_slice(values);
                    }
                    ctx.advance(1);
                    Some((i, slice))
                },
            )
            .collect::<Option<Vec<_>>>()
            .ok_or(Error::Cancelled)?;

        let mut sparse = vec![0.0; nx * ny * nz * w];
        for (i, slice) in even {
            let points = iproduct!((0..ny).step_by(2), (0..nz).step_by(2));
            for ((j, k), v) in points.zip(slice.chunks_exact(w)) {
                let at = index(i, j, k);
                sparse[at..at + w].copy_from_slice(v);
            }
        }

        // screen complete cells; cell (ci, cj, ck) spans lattice points 2ci..=2ci+2
        let (cx, cy, cz) = ((nx - 1) / 2, (ny - 1) / 2, (nz - 1) / 2);
        let bound = COARSE_GRAIN_FACTOR * threshold;
        let significant: Vec<bool> = iproduct!(0..cx, 0..cy, 0..cz)
            .map(|(ci, cj, ck)| {
                iproduct!(0..2, 0..2, 0..2).any(|(a, b, c)| {
                    let at = index(2 * (ci + a), 2 * (cj + b), 2 * (ck + c));
                    sparse[at..at + w].iter().any(|v| v.abs() > bound)
                })
            })
            .collect();

        // refine pass
        let slices = (0..nx)
            .into_par_iter()
            .map_init(
                || (self.function.scratch(), vec![0.0; w]),
                |(scratch, values), i| {
                    if ctx.is_cancelled() {
                        return None;
                    }
                    let mut slice = vec![0.0; ny * nz * w];
                    for (j, k) in iproduct!(0..ny, 0..nz) {
                        let out = &mut slice[(j * nz + k) * w..(j * nz + k + 1) * w];
                        if i % 2 == 0 && j % 2 == 0 && k % 2 == 0 {
                            let at = index(i, j, k);
                            out.copy_from_slice(&sparse[at..at + w]);
                            continue;
                        }

                        let (ci, cj, ck) = (i / 2, j / 2, k / 2);
                        let quiet = ci < cx
                            && cj < cy
                            && ck < cz
                            && !significant[(ci * cy + cj) * cz + ck];
                        if quiet {
                            let (xs, ys, zs) = (span(i), span(j), span(k));
                            let corners: Vec<usize> = iproduct!(xs.iter(), ys.iter(), zs.iter())
                                .map(|(&a, &b, &c)| index(a, b, c))
                                .collect();
                            let weight = 1.0 / corners.len() as f64;
                            for (m, v) in out.iter_mut().enumerate() {
                                *v = weight * corners.iter().map(|at| sparse[at + m]).sum::<f64>();
                            }
                        } else {
                            self.function.evaluate(&size.point(i, j, k), scratch, values);
                            out.copy_from_slice(values);
                        }
                    }
                    ctx.advance(1);
                    Some(slice)
                },
            )
            .collect::<Option<Vec<_>>>()
            .ok_or(Error::Cancelled)?;

        Ok(slices.concat())
    }
}

/// Even lattice indices bracketing `n` along one axis.
fn span(n: usize) -> Vec<usize> {
    if n % 2 == 1 {
        vec![n - 1, n + 1]
    } else {
        vec![n]
    }
}
