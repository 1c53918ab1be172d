//! Isosurface extraction with marching cubes.
//!
//! Each cube of eight neighbouring lattice points is classified by which
//! corners lie at or below the isovalue. The class selects the crossed edges
//! and the triangles joining them from the lookup tables in [`tables`].
//! Vertices on a shared edge are created once, so neighbouring cubes stitch
//! into a closed mesh.

mod tables;

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::config::MARCHING_CUBES_MARGIN;
use crate::error::Result;
use crate::grid::GridData;
use crate::mesh::Mesh;
use crate::task::TaskContext;

use tables::{CORNER_OFFSETS, EDGE_AXIS, EDGE_CORNERS, EDGE_FLAGS, TRIANGLE_TABLE};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::grid::GridSize;
    use crate::surface_type::SurfaceType;
    use nalgebra::Point3;
    use std::f64::consts::PI;

    fn sampled<F: Fn(&Point3<f64>) -> f64>(f: F) -> GridData {
        let size = GridSize::new(Point3::new(-2.0, -2.0, -2.0), Vector3::repeat(0.2), 21, 21, 21);
        let mut grid = GridData::new(size, SurfaceType::CubeData);
        grid.fill_with(f);
        grid
    }

    /// Number of faces on each undirected edge, and whether every edge is
    /// used once in each direction.
    fn edge_use(mesh: &Mesh) -> (HashMap<(usize, usize), usize>, bool) {
        let mut undirected = HashMap::new();
        let mut directed = HashMap::new();
        for face in mesh.faces() {
            for n in 0..3 {
                let (a, b) = (face[n], face[(n + 1) % 3]);
                *undirected.entry((a.min(b), a.max(b))).or_insert(0) += 1;
                *directed.entry((a, b)).or_insert(0) += 1;
            }
        }
        let oriented = directed
            .keys()
            .all(|&(a, b)| directed.get(&(b, a)) == Some(&1) && directed[&(a, b)] == 1);
        (undirected, oriented)
    }

    /// Volume enclosed by a closed mesh, positive when faces point outwards.
    fn signed_volume(mesh: &Mesh) -> f64 {
        mesh.faces()
            .iter()
            .map(|&[a, b, c]| {
                let v = mesh.vertices();
                v[a].coords.dot(&v[b].coords.cross(&v[c].coords)) / 6.0
            })
            .sum()
    }

    fn assert_closed_sphere(mesh: &Mesh) {
        let (edges, oriented) = edge_use(mesh);
        assert!(edges.values().all(|&n| n == 2));
        assert!(oriented);
        let euler = mesh.n_vertices() as i64 - edges.len() as i64 + mesh.n_faces() as i64;
        assert_eq!(euler, 2);

        assert!(signed_volume(mesh) > 0.0);
        for (p, n) in mesh.vertices().iter().zip(mesh.vertex_normals()) {
            assert!(n.dot(&p.coords) > 0.0);
        }
    }

    #[test]
    fn sphere_is_closed_with_outward_normals() {
        // radius chosen so that no lattice point lies on the surface
        let grid = sampled(|p| 0.95 - p.coords.norm_squared());
        let mesh = MarchingCubes::new(&grid).mesh(0.0);
        assert!(mesh.n_faces() > 100);
        assert_closed_sphere(&mesh);

        let radius = 0.95f64.sqrt();
        for p in mesh.vertices() {
            assert!((p.coords.norm() - radius).abs() < 0.02);
        }
        let volume = 4.0 / 3.0 * PI * radius.powi(3);
        assert!((signed_volume(&mesh) - volume).abs() < 0.1 * volume);
    }

    #[test]
    fn negative_isovalue_keeps_outward_normals() {
        let positive = sampled(|p| (-p.coords.norm_squared()).exp());
        let negative = sampled(|p| -(-p.coords.norm_squared()).exp());

        let lobe = MarchingCubes::new(&positive).mesh(0.5);
        let hole = MarchingCubes::new(&negative).mesh(-0.5);
        assert_closed_sphere(&lobe);
        assert_closed_sphere(&hole);
        // complementary cases cross the same edges
        assert_eq!(lobe.n_vertices(), hole.n_vertices());
    }

    #[test]
    fn field_without_crossing_gives_empty_mesh() {
        let grid = sampled(|p| p.x * p.x + 5.0);
        let mesh = MarchingCubes::new(&grid).mesh(1.0);
        assert!(mesh.is_empty());
        assert_eq!(mesh.n_vertices(), 0);
    }

    #[test]
    fn progress_counts_slices() {
        let grid = sampled(|p| 0.95 - p.coords.norm_squared());
        let mc = MarchingCubes::new(&grid);
        assert_eq!(mc.work_units(), 21 - 5);
        let ctx = TaskContext::detached(mc.work_units());
        mc.generate(0.0, &ctx).unwrap();
        assert_eq!(ctx.done(), 16);
    }

    #[test]
    fn cancelled_extraction_stops() {
        let grid = sampled(|p| 0.95 - p.coords.norm_squared());
        let ctx = TaskContext::detached(0);
        ctx.cancel();
        let result = MarchingCubes::new(&grid).generate(0.0, &ctx);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn small_grid_is_empty() {
        let size = GridSize::new(Point3::origin(), Vector3::repeat(1.0), 4, 4, 4);
        let grid = GridData::new(size, SurfaceType::CubeData);
        assert_eq!(MarchingCubes::new(&grid).work_units(), 0);
        assert!(MarchingCubes::new(&grid).mesh(0.0).is_empty());
    }
}

/// Key of a lattice edge: its lower end point and its axis.
type EdgeKey = (usize, usize, usize, usize);

/// Triangulates the isosurface of one grid.
///
/// **Context**: Surfaces of orbitals and densities are drawn from the grids
/// filled by the evaluators. Both lobes of a signed field come from the same
/// grid at `+isovalue` and `-isovalue`.
///
/// **How it Works**: Cubes within two cells of the grid boundary are skipped
/// so that every vertex normal can be taken from [`GridData::normal`].
/// Triangles face towards lower field values, the outside of a positive
/// lobe. For a negative isovalue the inside of the surface holds the lower
/// values, so the winding and the vertex normals are flipped to keep them
/// pointing outwards.
pub struct MarchingCubes<'a> {
    grid: &'a GridData,
}

impl<'a> MarchingCubes<'a> {
    pub fn new(grid: &'a GridData) -> Self {
        Self { grid }
    }

    /// Progress units reported by [`MarchingCubes::generate`], one per
    /// x-slice of cubes.
    pub fn work_units(&self) -> usize {
        self.cube_range(self.grid.size().nx).len()
    }

    fn cube_range(&self, n: usize) -> std::ops::Range<usize> {
        MARCHING_CUBES_MARGIN..n.saturating_sub(MARCHING_CUBES_MARGIN + 1)
    }

    /// Extracts the surface without progress reporting.
    pub fn mesh(&self, isovalue: f64) -> Mesh {
        let ctx = TaskContext::detached(self.work_units());
        // a detached context is never cancelled
        self.generate(isovalue, &ctx).unwrap_or_default()
    }

    /// Extracts the surface at `isovalue`, checking for cancellation once per
    /// x-slice.
    pub fn generate(&self, isovalue: f64, ctx: &TaskContext) -> Result<Mesh> {
        let (nx, ny, nz) = self.grid.size().dims();
        let reversed = isovalue < 0.0;
        let mut mesh = Mesh::new();
        let mut vertices: HashMap<EdgeKey, usize> = HashMap::new();

        for i in self.cube_range(nx) {
            ctx.check()?;
            for j in self.cube_range(ny) {
                for k in self.cube_range(nz) {
                    self.march_cube(isovalue, reversed, [i, j, k], &mut mesh, &mut vertices);
                }
            }
            ctx.advance(1);
        }
        Ok(mesh)
    }

    fn march_cube(
        &self,
        isovalue: f64,
        reversed: bool,
        [i, j, k]: [usize; 3],
        mesh: &mut Mesh,
        vertices: &mut HashMap<EdgeKey, usize>,
    ) {
        let corner = CORNER_OFFSETS.map(|[a, b, c]| [i + a, j + b, k + c]);
        let values = corner.map(|[a, b, c]| self.grid.value(a, b, c));

        let case = values
            .iter()
            .enumerate()
            .filter(|&(_, v)| *v <= isovalue)
            .fold(0usize, |case, (bit, _)| case | (1 << bit));
        let crossed = EDGE_FLAGS[case];
        if crossed == 0 {
            return;
        }

        let mut edge_vertex = [usize::MAX; 12];
        for (edge, &[c0, c1]) in EDGE_CORNERS.iter().enumerate() {
            if crossed & (1 << edge) == 0 {
                continue;
            }
            // the two ends differ along one axis only
            let [a, b, c] = corner[c0].min(corner[c1]);
            let key = (a, b, c, EDGE_AXIS[edge]);

            edge_vertex[edge] = *vertices.entry(key).or_insert_with(|| {
                let (v0, v1) = (values[c0], values[c1]);
                let t = if v0 == v1 { 0.5 } else { (isovalue - v0) / (v1 - v0) };
                let p0 = self.grid.lattice_point(corner[c0][0], corner[c0][1], corner[c0][2]);
                let p1 = self.grid.lattice_point(corner[c1][0], corner[c1][1], corner[c1][2]);
                let point = p0 + (p1 - p0) * t;
                let normal: Vector3<f64> = self.grid.normal(&point);
                mesh.add_vertex(point, if reversed { -normal } else { normal })
            });
        }

        for triangle in TRIANGLE_TABLE[case].chunks_exact(3) {
            if triangle[0] < 0 {
                break;
            }
            let [a, b, c] = [0, 1, 2].map(|n| edge_vertex[triangle[n] as usize]);
            if reversed {
                mesh.add_face([a, c, b]);
            } else {
                mesh.add_face([a, b, c]);
            }
        }
    }
}
