use approx::assert_relative_eq;
use nalgebra::{Point3, Vector3};
use ndarray::{array, Array2};

use isosurf::evaluator::{EvaluationMode, MultiGridEvaluator};
use isosurf::grid::{GridData, GridSize};
use isosurf::marching_cubes::MarchingCubes;
use isosurf::mesh::Mesh;
use isosurf::orbital::{DensityEvaluator, DensityVector, MolecularGridEvaluator};
use isosurf::shell::{AngularMomentum, Shell, ShellList};
use isosurf::surface::{SurfaceGenerator, SurfaceInfo};
use isosurf::surface_type::SurfaceType;
use isosurf::task::{self, Outcome, TaskContext};

/// Normalized s function with unit exponent at the origin.
fn single_s() -> ShellList {
    ShellList::new(vec![Shell::new(
        AngularMomentum::S,
        Point3::origin(),
        vec![1.0],
        vec![1.0],
    )])
}

fn grid_size() -> GridSize {
    GridSize::new(Point3::new(-3.0, -3.0, -3.0), Vector3::repeat(0.25), 25, 25, 25)
}

/// Radius at which the density (2/pi)^(3/2) exp(-2r^2) equals `isovalue`.
fn density_radius(isovalue: f64) -> f64 {
    let peak = (2.0 / std::f64::consts::PI).powf(1.5);
    ((peak / isovalue).ln() / 2.0).sqrt()
}

fn density_grid(mode: EvaluationMode) -> GridData {
    let shells = single_s();
    let density = DensityEvaluator::new(&shells, vec![vec![1.0]]);
    let grid = GridData::new(grid_size(), SurfaceType::TotalDensity);
    let evaluator = MultiGridEvaluator::new(vec![grid], &density, mode).unwrap();
    let ctx = TaskContext::detached(evaluator.work_units());
    let mut grids = evaluator.evaluate(&ctx).unwrap();
    assert_eq!(ctx.done(), ctx.total());
    grids.remove(0)
}

fn euler_characteristic(mesh: &Mesh) -> i64 {
    let edges = mesh.n_faces() * 3 / 2;
    mesh.n_vertices() as i64 - edges as i64 + mesh.n_faces() as i64
}

#[test]
fn density_of_s_function_gives_sphere() {
    let grid = density_grid(EvaluationMode::Direct);
    let peak = (2.0 / std::f64::consts::PI).powf(1.5);
    assert_relative_eq!(grid.value(12, 12, 12), peak, max_relative = 1e-6);

    let mesh = MarchingCubes::new(&grid).mesh(0.01);
    assert!(mesh.n_faces() > 100);
    assert_eq!(euler_characteristic(&mesh), 2);

    let radius = density_radius(0.01);
    assert_relative_eq!(radius, 1.4015, epsilon = 1e-3);
    for p in mesh.vertices() {
        assert!((p.coords.norm() - radius).abs() < 0.05);
    }
    for (p, n) in mesh.vertices().iter().zip(mesh.vertex_normals()) {
        assert!(n.dot(&p.coords) > 0.0);
    }
}

#[test]
fn coarse_grain_matches_direct_where_significant() {
    let direct = density_grid(EvaluationMode::Direct);
    let coarse = density_grid(EvaluationMode::CoarseGrain { threshold: 0.001 });
    let mut compared = 0;
    for (d, c) in direct.data().iter().zip(coarse.data()) {
        if *d > 0.01 {
            assert_relative_eq!(*d, *c, max_relative = 1e-12);
            compared += 1;
        }
    }
    assert!(compared > 100);

    let a = MarchingCubes::new(&direct).mesh(0.01);
    let b = MarchingCubes::new(&coarse).mesh(0.01);
    assert_eq!(a.n_vertices(), b.n_vertices());
}

#[test]
fn background_pipeline_builds_orbital_and_density_surfaces() {
    let grids = vec![
        GridData::new(grid_size(), SurfaceType::TotalDensity),
        GridData::new(grid_size(), SurfaceType::AlphaOrbital(0)),
        GridData::new(grid_size(), SurfaceType::BetaOrbital(3)),
    ];

    let handle = task::spawn(0, move |ctx| {
        let shells = single_s();
        let alpha: Array2<f64> = array![[1.0]];
        let beta = alpha.clone();
        let densities = vec![DensityVector::new(SurfaceType::TotalDensity, vec![1.0])];
        let evaluator = MolecularGridEvaluator::new(
            &shells,
            &alpha,
            &beta,
            &densities,
            grids,
            EvaluationMode::default(),
        );
        assert_eq!(evaluator.unmatched(), &[2]);
        ctx.set_total(evaluator.work_units());
        evaluator.evaluate(ctx)
    });
    let grids = match handle.wait().unwrap() {
        Outcome::Completed(grids) => grids,
        Outcome::Cancelled => panic!("grid evaluation was cancelled"),
    };
    assert_eq!(grids.len(), 3);

    // the orbital squared is the density
    let (density, orbital) = (&grids[0], &grids[1]);
    for (i, j, k) in [(12, 12, 12), (10, 12, 14), (8, 9, 12)] {
        assert_relative_eq!(
            orbital.value(i, j, k).powi(2),
            density.value(i, j, k),
            max_relative = 1e-10
        );
    }
    // unmatched grids come back unchanged
    assert!(grids[2].data().iter().all(|&v| v == 0.0));

    let ctx = TaskContext::detached(0);
    let density_surface = SurfaceGenerator::new(
        SurfaceInfo::new(SurfaceType::TotalDensity).with_isovalue(0.01),
    )
    .generate(&grids, &ctx)
    .unwrap()
    .unwrap();
    let orbital_surface = SurfaceGenerator::new(
        SurfaceInfo::new(SurfaceType::AlphaOrbital(0)).with_isovalue(0.1),
    )
    .generate(&grids, &ctx)
    .unwrap()
    .unwrap();

    assert!(orbital_surface.is_signed());
    assert!(orbital_surface.negative_mesh().is_empty());
    assert!(density_surface.negative_mesh().is_empty());
    // both enclose the same sphere
    assert_relative_eq!(
        orbital_surface.area(),
        density_surface.area(),
        max_relative = 0.05
    );
    let radius = density_radius(0.01);
    let sphere = 2.0 * 4.0 * std::f64::consts::PI * radius * radius;
    assert_relative_eq!(density_surface.area(), sphere, max_relative = 0.1);
}

#[test]
fn simplified_surface_stays_closed() {
    let grid = density_grid(EvaluationMode::Direct);
    let info = SurfaceInfo {
        simplify_mesh: true,
        ..SurfaceInfo::new(SurfaceType::TotalDensity).with_isovalue(0.01)
    };
    let surface = SurfaceGenerator::new(info)
        .surface(&grid, &TaskContext::detached(0))
        .unwrap();
    let full = MarchingCubes::new(&grid).mesh(0.01);
    let mesh = surface.positive_mesh();
    assert!(mesh.n_vertices() <= full.n_vertices());
    assert_eq!(euler_characteristic(mesh), 2);
}
