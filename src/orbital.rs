//! Orbital and density fields of a molecule.
//!
//! [`OrbitalEvaluator`] and [`DensityEvaluator`] bind a [`ShellList`] to
//! coefficient data and act as [`FieldFunction`]s for the grid evaluators.
//! [`MolecularGridEvaluator`] sorts a batch of requested grids by size and
//! field kind and fills each batch with a single sweep.

use nalgebra::Point3;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::evaluator::{EvaluationMode, FieldFunction, MultiGridEvaluator};
use crate::grid::{GridData, GridSize};
use crate::shell::ShellList;
use crate::surface_type::SurfaceType;
use crate::task::TaskContext;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::{AngularMomentum, Shell};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use ndarray::array;

    fn h2_basis() -> ShellList {
        ShellList::new(vec![
            Shell::new(
                AngularMomentum::S,
                Point3::new(0.0, 0.0, -0.37),
                vec![3.0, 0.5],
                vec![0.3, 0.7],
            ),
            Shell::new(
                AngularMomentum::S,
                Point3::new(0.0, 0.0, 0.37),
                vec![3.0, 0.5],
                vec![0.3, 0.7],
            ),
        ])
    }

    fn small_size() -> GridSize {
        GridSize::new(Point3::new(-1.0, -1.0, -1.0), Vector3::repeat(0.25), 9, 9, 9)
    }

    #[test]
    fn orbital_is_coefficient_dot_basis() {
        let basis = h2_basis();
        let c = array![[0.5, 0.5], [1.2, -1.2]];
        let evaluator = OrbitalEvaluator::new(&basis, &c, &[1, 0]);
        assert_eq!(evaluator.width(), 2);

        let p = Point3::new(0.1, -0.2, 0.3);
        let mut scratch = evaluator.scratch();
        let mut values = [0.0; 2];
        evaluator.evaluate(&p, &mut scratch, &mut values);

        let phi0 = basis.shells()[0].evaluate(&p)[0];
        let phi1 = basis.shells()[1].evaluate(&p)[0];
        assert_relative_eq!(values[0], 1.2 * (phi0 - phi1), epsilon = 1e-14);
        assert_relative_eq!(values[1], 0.5 * (phi0 + phi1), epsilon = 1e-14);
    }

    #[test]
    fn missing_orbitals_evaluate_to_zero() {
        let basis = h2_basis();
        let empty = Array2::<f64>::zeros((0, 0));
        let evaluator = OrbitalEvaluator::new(&basis, &empty, &[0]);
        let mut values = [1.0];
        evaluator.evaluate(&Point3::origin(), &mut evaluator.scratch(), &mut values);
        assert_eq!(values[0], 0.0);
    }

    #[test]
    fn density_of_one_orbital_is_its_square() {
        let basis = h2_basis();
        let c = array![0.6, 0.6];
        let outer = Array2::from_shape_fn((2, 2), |(i, j)| c[i] * c[j]);
        let density = vectorize_density(&outer);
        assert_eq!(density.len(), 3);

        let orbitals = Array2::from_shape_vec((1, 2), c.to_vec()).unwrap();
        let orbital = OrbitalEvaluator::new(&basis, &orbitals, &[0]);
        let rho = DensityEvaluator::new(&basis, vec![density]);

        let p = Point3::new(0.2, 0.1, -0.4);
        let (mut psi, mut d) = ([0.0], [0.0]);
        orbital.evaluate(&p, &mut orbital.scratch(), &mut psi);
        rho.evaluate(&p, &mut rho.scratch(), &mut d);
        assert_relative_eq!(d[0], psi[0] * psi[0], epsilon = 1e-14);
    }

    #[test]
    fn molecular_evaluator_matches_grids_to_data() {
        let basis = h2_basis();
        let alpha = array![[0.55, 0.55], [1.2, -1.2]];
        let density = vectorize_density(&array![[0.6, 0.6], [0.6, 0.6]]);
        let densities = vec![
            DensityVector::new(SurfaceType::TotalDensity, density.clone()),
            DensityVector::new(SurfaceType::Custom("half".into()), vec![0.3, 0.3, 0.3]),
        ];
        let coarse = GridSize::new(Point3::new(-1.0, -1.0, -1.0), Vector3::repeat(0.5), 5, 5, 5);
        let grids = vec![
            GridData::new(small_size(), SurfaceType::AlphaOrbital(1)),
            GridData::new(small_size(), SurfaceType::TotalDensity),
            GridData::new(coarse, SurfaceType::Custom("half".into())),
            GridData::new(small_size(), SurfaceType::BetaOrbital(7)),
            GridData::new(coarse, SurfaceType::VanDerWaals),
        ];

        let evaluator = MolecularGridEvaluator::new(
            &basis,
            &alpha,
            &alpha,
            &densities,
            grids,
            EvaluationMode::Direct,
        );
        assert_eq!(evaluator.unmatched(), &[3, 4]);
        assert_eq!(evaluator.work_units(), 9 + 9 + 5);

        let ctx = TaskContext::detached(evaluator.work_units());
        let grids = evaluator.evaluate(&ctx).unwrap();
        assert_eq!(grids.len(), 5);
        assert_eq!(ctx.done(), 9 + 9 + 5);

        let p = grids[0].lattice_point(5, 4, 6);
        let phi0 = basis.shells()[0].evaluate(&p)[0];
        let phi1 = basis.shells()[1].evaluate(&p)[0];
        assert_relative_eq!(grids[0].value(5, 4, 6), 1.2 * (phi0 - phi1), epsilon = 1e-12);
        assert_relative_eq!(
            grids[1].value(5, 4, 6),
            0.6 * (phi0 + phi1).powi(2),
            epsilon = 1e-12
        );

        let q = grids[2].lattice_point(2, 2, 3);
        let phi0 = basis.shells()[0].evaluate(&q)[0];
        let phi1 = basis.shells()[1].evaluate(&q)[0];
        assert_relative_eq!(
            grids[2].value(2, 2, 3),
            0.3 * (phi0 + phi1).powi(2),
            epsilon = 1e-12
        );

        assert!(grids[3].data().iter().all(|&v| v == 0.0));
        assert_eq!(grids[4].surface_type(), &SurfaceType::VanDerWaals);
    }
}

/// Packs a symmetric matrix into the lower-triangular order used by
/// [`ShellList::shell_pair_values`].
pub fn vectorize_density(matrix: &Array2<f64>) -> Vec<f64> {
    let n = matrix.nrows().min(matrix.ncols());
    (0..n)
        .flat_map(|i| (0..=i).map(move |j| matrix[[i, j]]))
        .collect()
}

fn dot(a: ArrayView1<f64>, b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Molecular orbitals as a [`FieldFunction`], one value per selected orbital.
pub struct OrbitalEvaluator<'a> {
    shells: &'a ShellList,
    coefficients: Array2<f64>,
}

impl<'a> OrbitalEvaluator<'a> {
    /// Selects the rows `orbitals` of `coefficients` (orbital × basis function).
    ///
    /// Rows that do not exist, or a matrix whose width differs from the basis
    /// dimension, give orbitals that are zero everywhere.
    pub fn new(shells: &'a ShellList, coefficients: &Array2<f64>, orbitals: &[usize]) -> Self {
        let n_basis = shells.n_basis();
        let usable = coefficients.ncols() == n_basis;
        if !usable {
            warn!(
                "coefficient matrix has {} columns for {} basis functions",
                coefficients.ncols(),
                n_basis
            );
        }

        let mut selected = Array2::zeros((orbitals.len(), n_basis));
        for (mut row, &orbital) in selected.rows_mut().into_iter().zip(orbitals) {
            if usable && orbital < coefficients.nrows() {
                row.assign(&coefficients.row(orbital));
            }
        }
        Self {
            shells,
            coefficients: selected,
        }
    }
}

impl FieldFunction for OrbitalEvaluator<'_> {
    type Scratch = Vec<f64>;

    fn width(&self) -> usize {
        self.coefficients.nrows()
    }

    fn scratch(&self) -> Vec<f64> {
        vec![0.0; self.shells.n_basis()]
    }

    fn evaluate(&self, point: &Point3<f64>, basis: &mut Vec<f64>, values: &mut [f64]) {
        self.shells.basis_values(point, basis);
        for (v, row) in values.iter_mut().zip(self.coefficients.rows()) {
            *v = dot(row, basis);
        }
    }
}

/// Densities as a [`FieldFunction`], one value per vectorized density matrix.
pub struct DensityEvaluator<'a> {
    shells: &'a ShellList,
    densities: Array2<f64>,
}

impl<'a> DensityEvaluator<'a> {
    /// Densities must hold `n(n+1)/2` values in the order of
    /// [`vectorize_density`]; any other length gives a zero density.
    pub fn new(shells: &'a ShellList, densities: Vec<Vec<f64>>) -> Self {
        let n = shells.n_basis();
        let n_pairs = n * (n + 1) / 2;
        let mut packed = Array2::zeros((densities.len(), n_pairs));
        for (mut row, density) in packed.rows_mut().into_iter().zip(&densities) {
            if density.len() == n_pairs {
                row.assign(&ArrayView1::from(density.as_slice()));
            } else {
                warn!(
                    "density vector has {} values, expected {}",
                    density.len(),
                    n_pairs
                );
            }
        }
        Self {
            shells,
            densities: packed,
        }
    }
}

impl FieldFunction for DensityEvaluator<'_> {
    type Scratch = (Vec<f64>, Vec<f64>);

    fn width(&self) -> usize {
        self.densities.nrows()
    }

    fn scratch(&self) -> Self::Scratch {
        (
            vec![0.0; self.shells.n_basis()],
            vec![0.0; self.densities.ncols()],
        )
    }

    fn evaluate(&self, point: &Point3<f64>, scratch: &mut Self::Scratch, values: &mut [f64]) {
        let (basis, pairs) = scratch;
        self.shells.shell_pair_values(point, basis, pairs);
        for (v, row) in values.iter_mut().zip(self.densities.rows()) {
            *v = dot(row, pairs);
        }
    }
}

/// A vectorized density matrix and the field kind it provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityVector {
    pub surface_type: SurfaceType,
    pub values: Vec<f64>,
}

impl DensityVector {
    pub fn new(surface_type: SurfaceType, values: Vec<f64>) -> Self {
        Self {
            surface_type,
            values,
        }
    }
}

#[derive(Debug)]
enum Source {
    Alpha(Vec<usize>),
    Beta(Vec<usize>),
    Density(Vec<usize>),
}

/// One sweep: grids of a single size filled from one source.
#[derive(Debug)]
struct Job {
    source: Source,
    grids: Vec<usize>,
    nx: usize,
}

/// Fills a batch of molecular grids.
///
/// **Context**: A request for several surfaces typically mixes orbitals,
/// densities and grid resolutions. Grids of equal size and source share one
/// pass over the lattice.
///
/// **How it Works**: Grids are grouped by [`GridSize`]. Within a group,
/// orbital grids are matched to rows of the alpha or beta coefficient matrix
/// by index. Density grids are matched to a [`DensityVector`] of the same
/// kind, and custom grids by label. Each source then runs through a
/// [`MultiGridEvaluator`]. Grids with no matching data are logged and
/// returned unchanged.
pub struct MolecularGridEvaluator<'a> {
    shells: &'a ShellList,
    alpha: &'a Array2<f64>,
    beta: &'a Array2<f64>,
    densities: &'a [DensityVector],
    grids: Vec<GridData>,
    mode: EvaluationMode,
    jobs: Vec<Job>,
    unmatched: Vec<usize>,
}

impl<'a> MolecularGridEvaluator<'a> {
    pub fn new(
        shells: &'a ShellList,
        alpha: &'a Array2<f64>,
        beta: &'a Array2<f64>,
        densities: &'a [DensityVector],
        grids: Vec<GridData>,
        mode: EvaluationMode,
    ) -> Self {
        let mut sizes: Vec<(GridSize, Vec<usize>)> = Vec::new();
        for (i, grid) in grids.iter().enumerate() {
            match sizes.iter_mut().find(|(size, _)| size == grid.size()) {
                Some((_, members)) => members.push(i),
                None => sizes.push((*grid.size(), vec![i])),
            }
        }

        let mut jobs = Vec::new();
        let mut unmatched = Vec::new();
        for (size, members) in sizes {
            let mut alpha_job = (Vec::new(), Vec::new());
            let mut beta_job = (Vec::new(), Vec::new());
            let mut density_job = (Vec::new(), Vec::new());

            for i in members {
                let kind = grids[i].surface_type();
                match kind {
                    SurfaceType::AlphaOrbital(n) if *n < alpha.nrows() => {
                        alpha_job.0.push(*n);
                        alpha_job.1.push(i);
                    }
                    SurfaceType::BetaOrbital(n) if *n < beta.nrows() => {
                        beta_job.0.push(*n);
                        beta_job.1.push(i);
                    }
                    _ => match densities.iter().position(|d| &d.surface_type == kind) {
                        Some(d) if kind.is_density() || matches!(kind, SurfaceType::Custom(_)) => {
                            density_job.0.push(d);
                            density_job.1.push(i);
                        }
                        _ => {
                            warn!("no data available for grid {}", kind);
                            unmatched.push(i);
                        }
                    },
                }
            }

            for (source, grids) in [
                (Source::Alpha(alpha_job.0), alpha_job.1),
                (Source::Beta(beta_job.0), beta_job.1),
                (Source::Density(density_job.0), density_job.1),
            ] {
                if !grids.is_empty() {
                    jobs.push(Job {
                        source,
                        grids,
                        nx: size.nx,
                    });
                }
            }
        }
        unmatched.sort_unstable();

        Self {
            shells,
            alpha,
            beta,
            densities,
            grids,
            mode,
            jobs,
            unmatched,
        }
    }

    /// Positions of the grids that no data could be found for.
    pub fn unmatched(&self) -> &[usize] {
        &self.unmatched
    }

    pub fn work_units(&self) -> usize {
        self.jobs.iter().map(|job| self.mode.work_units(job.nx)).sum()
    }

    /// Fills every matched grid and returns all grids in their original order.
    pub fn evaluate(self, ctx: &TaskContext) -> Result<Vec<GridData>> {
        let mut slots: Vec<Option<GridData>> = self.grids.into_iter().map(Some).collect();

        for job in &self.jobs {
            ctx.check()?;
            let batch: Vec<GridData> = job.grids.iter().filter_map(|&i| slots[i].take()).collect();
            info!("evaluating {} grids ({:?})", batch.len(), job.source);

            let filled = match &job.source {
                Source::Alpha(orbitals) => {
                    let f = OrbitalEvaluator::new(self.shells, self.alpha, orbitals);
                    MultiGridEvaluator::new(batch, &f, self.mode)?.evaluate(ctx)?
                }
                Source::Beta(orbitals) => {
                    let f = OrbitalEvaluator::new(self.shells, self.beta, orbitals);
                    MultiGridEvaluator::new(batch, &f, self.mode)?.evaluate(ctx)?
                }
                Source::Density(indices) => {
                    let densities = indices
                        .iter()
                        .map(|&d| self.densities[d].values.clone())
                        .collect();
                    let f = DensityEvaluator::new(self.shells, densities);
                    MultiGridEvaluator::new(batch, &f, self.mode)?.evaluate(ctx)?
                }
            };

            for (&i, grid) in job.grids.iter().zip(filled) {
                slots[i] = Some(grid);
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}
