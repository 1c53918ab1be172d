//! Regular 3-D grids of scalar values.
//!
//! [`GridSize`] describes the lattice (origin, spacing and point counts) and
//! [`GridData`] holds the values sampled on it together with the
//! [`SurfaceType`] describing what they represent.
//!
//! The grid system provides:
//! - Quality levels mapped to fixed grid spacings
//! - Trilinear interpolation and gradient-based surface normals
//! - Point-wise linear combination, resampling grids that do not match

use std::cmp::Ordering;
use std::ops::{AddAssign, MulAssign, SubAssign};

use nalgebra::{Point3, Vector3};
use ndarray::{Array3, Zip};
use ndarray_stats::QuantileExt;
use tracing::warn;

use crate::config::{DEFAULT_STEP_SIZE, GRID_TOLERANCE};
use crate::error::{Error, Result};
use crate::surface_type::SurfaceType;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn size(n: usize, delta: f64) -> GridSize {
        GridSize::new(
            Point3::new(-1.0, -0.5, 0.25),
            Vector3::new(delta, delta, delta),
            n,
            n + 1,
            n + 2,
        )
    }

    fn random_grid(rng: &mut StdRng, size: GridSize) -> GridData {
        let values = (0..size.n_points())
            .map(|_| rng.random_range(-1.0..1.0))
            .collect();
        GridData::from_values(size, SurfaceType::CubeData, values).unwrap()
    }

    fn linear_grid(size: GridSize) -> GridData {
        let mut grid = GridData::new(size, SurfaceType::CubeData);
        grid.fill_with(|p| 2.0 * p.x - 3.0 * p.y + 0.5 * p.z + 1.0);
        grid
    }

    #[test]
    fn step_sizes() {
        assert_eq!(GridSize::step_size(3), 0.25);
        assert_eq!(GridSize::step_size(0), 1.0);
        assert_eq!(GridSize::step_size(7), 0.039373);
        assert_eq!(GridSize::step_size(42), 0.25);
    }

    #[test]
    fn size_from_bounds() {
        let size = GridSize::from_bounds(
            &Point3::new(-3.0, -3.0, -2.0),
            &Point3::new(3.0, 3.0, 2.1),
            3,
        );
        assert_eq!(size.dims(), (24, 24, 17));
        assert_relative_eq!(size.max().x, 2.75);
        assert_relative_eq!(size.step(), 0.25);
    }

    #[test]
    fn size_equality_uses_tolerance() {
        let a = size(4, 0.25);
        let mut b = a;
        b.origin.x += 1e-7;
        assert_eq!(a, b);
        b.origin.x += 1e-3;
        assert_ne!(a, b);
        assert_ne!(a, size(5, 0.25));
        assert!(size(4, 0.1) < size(4, 0.25));
    }

    #[test]
    fn short_data_is_rejected() {
        let s = size(3, 0.5);
        let result = GridData::from_values(s, SurfaceType::CubeData, vec![0.0; 10]);
        assert!(matches!(result, Err(Error::GridDataSize { .. })));
    }

    #[test]
    fn values_are_x_major() {
        let s = GridSize::new(Point3::origin(), Vector3::repeat(1.0), 2, 3, 4);
        let grid =
            GridData::from_values(s, SurfaceType::CubeData, (0..24).map(f64::from).collect())
                .unwrap();
        assert_eq!(grid.value(0, 0, 1), 1.0);
        assert_eq!(grid.value(0, 1, 0), 4.0);
        assert_eq!(grid.value(1, 0, 0), 12.0);
        assert_eq!(grid.range(), (0.0, 23.0));
    }

    #[test]
    fn interpolation_is_exact_at_lattice_points() {
        let mut rng = StdRng::seed_from_u64(7);
        let grid = random_grid(&mut rng, size(5, 0.3));
        let (nx, ny, nz) = grid.size().dims();
        for i in 0..nx - 1 {
            for j in 0..ny - 1 {
                for k in 0..nz - 1 {
                    let p = grid.lattice_point(i, j, k);
                    assert_abs_diff_eq!(grid.interpolate(&p), grid.value(i, j, k), epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn interpolation_reproduces_linear_fields() {
        let grid = linear_grid(size(6, 0.2));
        let p = Point3::new(-0.63, -0.17, 0.71);
        assert_relative_eq!(
            grid.interpolate(&p),
            2.0 * p.x - 3.0 * p.y + 0.5 * p.z + 1.0,
            epsilon = 1e-12
        );
        assert_eq!(grid.interpolate(&Point3::new(-2.0, 0.0, 0.5)), 0.0);
        assert_eq!(grid.interpolate(&Point3::new(5.0, 0.0, 0.5)), 0.0);
    }

    #[test]
    fn normal_points_down_the_gradient() {
        let grid = linear_grid(size(8, 0.2));
        let n = grid.normal(&Point3::new(-0.3, 0.2, 0.9));
        let expected = -Vector3::new(2.0, -3.0, 0.5).normalize();
        assert_relative_eq!(n, expected, epsilon = 1e-9);

        let edge = grid.normal(&grid.lattice_point(0, 3, 3));
        assert_eq!(edge, Vector3::zeros());
    }

    #[test]
    fn far_and_non_finite_points_are_outside() {
        let grid = linear_grid(size(4, 1.0));
        let far = [
            Point3::new(1e30, 1.0, 1.0),
            Point3::new(1.0, -1e30, 1.0),
            Point3::new(f64::INFINITY, 1.0, 1.0),
            Point3::new(1.0, 1.0, f64::NEG_INFINITY),
            Point3::new(f64::NAN, 1.0, 1.0),
        ];
        for p in far {
            assert_abs_diff_eq!(grid.interpolate(&p), 0.0);
            assert_eq!(grid.normal(&p), Vector3::zeros());
        }
        // the last lattice plane has no cell above it
        assert_abs_diff_eq!(grid.interpolate(&grid.lattice_point(3, 1, 1)), 0.0);
        assert!(grid.interpolate(&grid.lattice_point(2, 1, 1)).abs() > 0.0);
    }

    #[test]
    fn combine_is_pointwise_linear() {
        let mut rng = StdRng::seed_from_u64(11);
        let s = size(4, 0.5);
        let a = random_grid(&mut rng, s);
        let b = random_grid(&mut rng, s);

        let mut c = a.clone();
        c.combine(0.7, -1.3, &b);
        for ((i, j, k), &v) in c.data().indexed_iter() {
            assert_relative_eq!(
                v,
                0.7 * a.value(i, j, k) - 1.3 * b.value(i, j, k),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn add_then_subtract_round_trips() {
        let mut rng = StdRng::seed_from_u64(3);
        let s = size(5, 0.25);
        let a = random_grid(&mut rng, s);
        let b = random_grid(&mut rng, s);

        let mut c = a.clone();
        c += &b;
        c -= &b;
        for (x, y) in c.data().iter().zip(a.data().iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }

        c *= 2.0;
        assert_relative_eq!(c.value(1, 2, 3), 2.0 * a.value(1, 2, 3));
    }

    #[test]
    fn combine_resamples_mismatched_grids() {
        let coarse = linear_grid(size(6, 0.3));
        let fine_size = GridSize::new(
            Point3::new(-0.8, -0.3, 0.4),
            Vector3::repeat(0.1),
            6,
            6,
            6,
        );
        let mut fine = GridData::new(fine_size, SurfaceType::CubeData);
        fine.combine(0.0, 1.0, &coarse);
        let p = fine.lattice_point(2, 3, 4);
        assert_relative_eq!(
            fine.value(2, 3, 4),
            2.0 * p.x - 3.0 * p.y + 0.5 * p.z + 1.0,
            epsilon = 1e-9
        );
    }
}

/// Lattice geometry of a grid.
#[derive(Debug, Clone, Copy)]
pub struct GridSize {
    pub origin: Point3<f64>,
    pub delta: Vector3<f64>,
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl GridSize {
    pub fn new(origin: Point3<f64>, delta: Vector3<f64>, nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            origin,
            delta,
            nx,
            ny,
            nz,
        }
    }

    /// Isotropic grid starting at `min` that covers `max` at the given quality.
    pub fn from_bounds(min: &Point3<f64>, max: &Point3<f64>, quality: u8) -> Self {
        let d = Self::step_size(quality);
        let extent = (max - min) / d;
        Self {
            origin: *min,
            delta: Vector3::repeat(d),
            nx: extent.x.ceil().max(0.0) as usize,
            ny: extent.y.ceil().max(0.0) as usize,
            nz: extent.z.ceil().max(0.0) as usize,
        }
    }

    /// Grid spacing in angstroms for a quality level. Each level holds roughly
    /// four times as many points as the one before.
    pub fn step_size(quality: u8) -> f64 {
        match quality {
            0 => 1.000000,
            1 => 0.629961,
            2 => 0.396850,
            3 => 0.250000,
            4 => 0.157490,
            5 => 0.099213,
            6 => 0.062500,
            7 => 0.039373,
            _ => DEFAULT_STEP_SIZE,
        }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    pub fn n_points(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Mean spacing over the three axes.
    pub fn step(&self) -> f64 {
        self.delta.mean()
    }

    /// Position of the last lattice point.
    pub fn max(&self) -> Point3<f64> {
        let n = Vector3::new(self.nx, self.ny, self.nz).map(|n| n.saturating_sub(1) as f64);
        self.origin + n.component_mul(&self.delta)
    }

    pub fn point(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        self.origin
            + Vector3::new(
                i as f64 * self.delta.x,
                j as f64 * self.delta.y,
                k as f64 * self.delta.z,
            )
    }
}

impl PartialEq for GridSize {
    fn eq(&self, other: &Self) -> bool {
        self.dims() == other.dims()
            && (self.delta - other.delta).norm() < GRID_TOLERANCE
            && (self.origin - other.origin).norm() < GRID_TOLERANCE
    }
}

/// Grids order by spacing, finest first.
impl PartialOrd for GridSize {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        self.delta.norm().partial_cmp(&other.delta.norm())
    }
}

/// Scalar values sampled on a [`GridSize`].
///
/// **Context**: Every field that is turned into a surface (orbitals,
/// densities, imported cube data) lives on one of these grids. Marching
/// cubes reads the lattice values directly and uses [`GridData::normal`]
/// for vertex normals.
///
/// **How it Works**: Values are held in an `nx × ny × nz` array indexed
/// `[i, j, k]` with `k` fastest. Off-lattice values come from trilinear
/// interpolation of the eight surrounding points.
#[derive(Debug, Clone)]
pub struct GridData {
    size: GridSize,
    surface_type: SurfaceType,
    data: Array3<f64>,
}

impl GridData {
    /// Zero-filled grid.
    pub fn new(size: GridSize, surface_type: SurfaceType) -> Self {
        Self {
            data: Array3::zeros(size.dims()),
            size,
            surface_type,
        }
    }

    /// Grid filled from a flat list with `x` slowest and `z` fastest.
    pub fn from_values(
        size: GridSize,
        surface_type: SurfaceType,
        mut values: Vec<f64>,
    ) -> Result<Self> {
        let expected = size.n_points();
        if values.len() < expected {
            return Err(Error::GridDataSize {
                expected,
                found: values.len(),
            });
        }
        values.truncate(expected);
        let data = Array3::from_shape_vec(size.dims(), values).map_err(|_| {
            Error::GridDataSize {
                expected,
                found: expected,
            }
        })?;
        Ok(Self {
            size,
            surface_type,
            data,
        })
    }

    pub fn size(&self) -> &GridSize {
        &self.size
    }

    pub fn surface_type(&self) -> &SurfaceType {
        &self.surface_type
    }

    pub fn set_surface_type(&mut self, surface_type: SurfaceType) {
        self.surface_type = surface_type;
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    pub fn value(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[[i, j, k]]
    }

    pub fn set_value(&mut self, i: usize, j: usize, k: usize, value: f64) {
        self.data[[i, j, k]] = value;
    }

    pub fn lattice_point(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        self.size.point(i, j, k)
    }

    /// Sets every lattice value from a function of position.
    pub fn fill_with<F: Fn(&Point3<f64>) -> f64>(&mut self, f: F) {
        let size = self.size;
        for ((i, j, k), v) in self.data.indexed_iter_mut() {
            *v = f(&size.point(i, j, k));
        }
    }

    /// Smallest and largest values, or zeros for an empty or NaN-tainted grid.
    pub fn range(&self) -> (f64, f64) {
        match (self.data.min(), self.data.max()) {
            (Ok(min), Ok(max)) => (*min, *max),
            _ => (0.0, 0.0),
        }
    }

    pub fn data_size_kb(&self) -> f64 {
        (self.size.n_points() * std::mem::size_of::<f64>()) as f64 / 1024.0
    }

    /// Cell containing `p` and the fractional position inside it, if the
    /// cell lies within the grid shrunk by `margin` cells on every side.
    fn locate(&self, p: &Point3<f64>, margin: usize) -> Option<([usize; 3], Vector3<f64>)> {
        let rel = (p - self.size.origin).component_div(&self.size.delta);
        let dims = [self.size.nx, self.size.ny, self.size.nz];
        let mut cell = [0usize; 3];
        let mut frac = Vector3::zeros();
        for axis in 0..3 {
            let r = rel[axis];
            // rejects NaN and infinities before the cast
            if !(r >= 0.0 && r < (dims[axis].saturating_sub(1 + margin)) as f64) {
                return None;
            }
            let i = r.floor() as usize;
            if i < margin {
                return None;
            }
            cell[axis] = i;
            frac[axis] = r - i as f64;
        }
        Some((cell, frac))
    }

    /// Trilinear interpolation at `p`. Zero outside the grid.
    pub fn interpolate(&self, p: &Point3<f64>) -> f64 {
        let Some(([i, j, k], f)) = self.locate(p, 0) else {
            return 0.0;
        };
        trilinear(&f, |a, b, c| self.data[[i + a, j + b, k + c]])
    }

    /// Unit surface normal at `p`, pointing towards lower values.
    ///
    /// Central-difference gradients at the eight surrounding lattice points
    /// are blended trilinearly. Points within a cell of the boundary give a
    /// zero vector.
    pub fn normal(&self, p: &Point3<f64>) -> Vector3<f64> {
        let Some(([i, j, k], f)) = self.locate(p, 1) else {
            return Vector3::zeros();
        };
        let gradient = trilinear(&f, |a, b, c| self.gradient(i + a, j + b, k + c));
        (-gradient)
            .try_normalize(f64::EPSILON)
            .unwrap_or_else(Vector3::zeros)
    }

    fn gradient(&self, i: usize, j: usize, k: usize) -> Vector3<f64> {
        let d = &self.data;
        let h = 2.0 * self.size.delta;
        Vector3::new(
            (d[[i + 1, j, k]] - d[[i - 1, j, k]]) / h.x,
            (d[[i, j + 1, k]] - d[[i, j - 1, k]]) / h.y,
            (d[[i, j, k + 1]] - d[[i, j, k - 1]]) / h.z,
        )
    }

    /// Replaces the values with `a * self + b * other`.
    ///
    /// Grids of a different size are resampled at this grid's lattice points.
    pub fn combine(&mut self, a: f64, b: f64, other: &GridData) {
        if self.size == other.size {
            Zip::from(&mut self.data)
                .and(&other.data)
                .for_each(|x, &y| *x = a * *x + b * y);
        } else {
            warn!("combining grids of different size, resampling");
            let size = self.size;
            for ((i, j, k), x) in self.data.indexed_iter_mut() {
                *x = a * *x + b * other.interpolate(&size.point(i, j, k));
            }
        }
    }
}

/// Blends the values at the eight corners of a unit cell.
fn trilinear<T, F>(f: &Vector3<f64>, corner: F) -> T
where
    T: std::ops::Mul<f64, Output = T> + std::ops::Add<Output = T>,
    F: Fn(usize, usize, usize) -> T,
{
    let (x, y, z) = (f.x, f.y, f.z);
    corner(0, 0, 0) * ((1.0 - x) * (1.0 - y) * (1.0 - z))
        + corner(1, 0, 0) * (x * (1.0 - y) * (1.0 - z))
        + corner(0, 1, 0) * ((1.0 - x) * y * (1.0 - z))
        + corner(1, 1, 0) * (x * y * (1.0 - z))
        + corner(0, 0, 1) * ((1.0 - x) * (1.0 - y) * z)
        + corner(1, 0, 1) * (x * (1.0 - y) * z)
        + corner(0, 1, 1) * ((1.0 - x) * y * z)
        + corner(1, 1, 1) * (x * y * z)
}

impl AddAssign<&GridData> for GridData {
    fn add_assign(&mut self, other: &GridData) {
        self.combine(1.0, 1.0, other);
    }
}

impl SubAssign<&GridData> for GridData {
    fn sub_assign(&mut self, other: &GridData) {
        self.combine(1.0, -1.0, other);
    }
}

/// Scales every value in place. A scalar has no size to check against.
impl MulAssign<f64> for GridData {
    fn mul_assign(&mut self, factor: f64) {
        self.data.mapv_inplace(|v| v * factor);
    }
}
