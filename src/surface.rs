//! Surfaces: the positive and negative meshes of one field plus the
//! attributes a viewer needs to draw them.
//!
//! The surface system provides:
//! - [`SurfaceInfo`], the request describing which field and isovalue to use
//! - [`Surface`], the generated meshes with colours, opacity and an optional property
//! - [`SurfaceGenerator`], which runs marching cubes and decimation for a request
//! - A JSON archive of a surface through [`SurfaceRecord`]

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DEFAULT_QUALITY;
use crate::decimator::MeshDecimator;
use crate::error::Result;
use crate::grid::GridData;
use crate::marching_cubes::MarchingCubes;
use crate::mesh::{Mesh, MeshRecord};
use crate::surface_type::SurfaceType;
use crate::task::TaskContext;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::grid::GridSize;
    use approx::assert_relative_eq;

    fn dumbbell() -> GridData {
        let size = GridSize::new(Point3::new(-3.0, -2.0, -2.0), Vector3::repeat(0.2), 31, 21, 21);
        let mut grid = GridData::new(size, SurfaceType::AlphaOrbital(0));
        grid.fill_with(|p| {
            let left = (p - Point3::new(-1.0, 0.0, 0.0)).norm_squared();
            let right = (p - Point3::new(1.0, 0.0, 0.0)).norm_squared();
            (-2.0 * right).exp() - (-2.0 * left).exp()
        });
        grid
    }

    #[test]
    fn info_defaults() {
        let info = SurfaceInfo::default();
        assert_eq!(info.quality, 3);
        assert_eq!(info.isovalue, 0.02);
        assert_eq!(info.opacity, 0.999);
        assert!(!info.is_signed);
        assert!(!info.simplify_mesh);
        assert_eq!(info.positive_color, Color::BLUE);
        assert_eq!(info.negative_color, Color::RED);

        let orbital = SurfaceInfo::new(SurfaceType::AlphaOrbital(2));
        assert!(orbital.is_signed);
        assert_eq!(orbital.to_string(), "Alpha 3 (0.02)");
    }

    #[test]
    fn info_reads_from_partial_json() {
        let info: SurfaceInfo =
            serde_json::from_str(r#"{"surface_type": "TotalDensity", "isovalue": 0.05}"#).unwrap();
        assert_eq!(info.surface_type, SurfaceType::TotalDensity);
        assert_eq!(info.isovalue, 0.05);
        assert_eq!(info.quality, 3);
    }

    #[test]
    fn signed_surface_has_both_lobes() {
        let grid = dumbbell();
        let info = SurfaceInfo::new(SurfaceType::AlphaOrbital(0)).with_isovalue(0.1);
        let generator = SurfaceGenerator::new(info);
        let ctx = TaskContext::detached(generator.work_units(&grid));
        let surface = generator.surface(&grid, &ctx).unwrap();
        assert_eq!(ctx.done(), generator.work_units(&grid));

        let positive = surface.positive_mesh();
        let negative = surface.negative_mesh();
        assert!(!positive.is_empty());
        assert_eq!(positive.n_vertices(), negative.n_vertices());
        assert!(positive.vertices().iter().all(|p| p.x > 0.0));
        assert!(negative.vertices().iter().all(|p| p.x < 0.0));
        assert_eq!(
            surface.n_vertices(),
            positive.n_vertices() + negative.n_vertices()
        );
        assert_relative_eq!(
            surface.area(),
            positive.area() + negative.area(),
            epsilon = 1e-12
        );
        assert!(!surface.is_visible());
    }

    #[test]
    fn unsigned_surface_skips_negative_lobe() {
        let grid = dumbbell();
        let mut info = SurfaceInfo::new(SurfaceType::AlphaOrbital(0)).with_isovalue(0.1);
        info.is_signed = false;
        let surface = SurfaceGenerator::new(info)
            .surface(&grid, &TaskContext::detached(0))
            .unwrap();
        assert!(surface.negative_mesh().is_empty());
        assert!(!surface.positive_mesh().is_empty());
    }

    #[test]
    fn simplified_surface_has_fewer_vertices() {
        let grid = dumbbell();
        let info = SurfaceInfo::new(SurfaceType::AlphaOrbital(0)).with_isovalue(0.1);
        let plain = SurfaceGenerator::new(info.clone())
            .surface(&grid, &TaskContext::detached(0))
            .unwrap();
        let simplified = SurfaceGenerator::new(SurfaceInfo {
            simplify_mesh: true,
            ..info
        })
        .surface(&grid, &TaskContext::detached(0))
        .unwrap();
        assert!(simplified.n_vertices() < plain.n_vertices());
    }

    #[test]
    fn missing_grid_gives_no_surface() {
        let grids = vec![dumbbell()];
        let generator = SurfaceGenerator::new(SurfaceInfo::new(SurfaceType::BetaOrbital(0)));
        let result = generator.generate(&grids, &TaskContext::detached(0)).unwrap();
        assert!(result.is_none());

        let generator = SurfaceGenerator::new(SurfaceInfo::new(SurfaceType::AlphaOrbital(0)));
        let result = generator.generate(&grids, &TaskContext::detached(0)).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn cancelled_generation_returns_error() {
        let ctx = TaskContext::detached(0);
        ctx.cancel();
        let generator = SurfaceGenerator::new(SurfaceInfo::new(SurfaceType::AlphaOrbital(0)));
        assert!(matches!(
            generator.surface(&dumbbell(), &ctx),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn property_range_spans_both_meshes() {
        let grid = dumbbell();
        let info = SurfaceInfo::new(SurfaceType::AlphaOrbital(0)).with_isovalue(0.1);
        let mut surface = SurfaceGenerator::new(info)
            .surface(&grid, &TaskContext::detached(0))
            .unwrap();
        assert!(!surface.has_property());
        assert_eq!(surface.property_range(), (0.0, 0.0));

        surface.compute_property(|p| p.x);
        let (min, max) = surface.property_range();
        assert!(min < -0.5 && max > 0.5);
        assert!(surface.property_is_signed());

        surface.clear_property();
        assert!(!surface.has_property());
        assert!(!surface.property_is_signed());
    }

    #[test]
    fn index_property_uses_mesh_index() {
        let grid = dumbbell();
        let info = SurfaceInfo::new(SurfaceType::AlphaOrbital(0)).with_isovalue(0.1);
        let mut surface = SurfaceGenerator::new(info)
            .surface(&grid, &TaskContext::detached(0))
            .unwrap();
        surface.compute_index_property();
        let (min, max) = surface.property_range();
        assert_relative_eq!(min, 0.0001, epsilon = 1e-12);
        assert_relative_eq!(max, 1.0001, epsilon = 1e-12);
    }

    #[test]
    fn clipping_applies_to_both_meshes() {
        let grid = dumbbell();
        let info = SurfaceInfo::new(SurfaceType::AlphaOrbital(0)).with_isovalue(0.1);
        let mut surface = SurfaceGenerator::new(info)
            .surface(&grid, &TaskContext::detached(0))
            .unwrap();
        let before = surface.area();
        surface.clip(&Vector3::y(), &Point3::origin());
        assert!(surface.area() < 0.6 * before);
        for mesh in [surface.positive_mesh(), surface.negative_mesh()] {
            assert!(!mesh.is_empty());
            assert!(mesh.vertices().iter().all(|p| p.y > -1e-9));
        }
    }

    #[test]
    fn archive_restores_surface() {
        let grid = dumbbell();
        let info = SurfaceInfo::new(SurfaceType::AlphaOrbital(0)).with_isovalue(0.1);
        let mut surface = SurfaceGenerator::new(info)
            .surface(&grid, &TaskContext::detached(0))
            .unwrap();
        surface.compute_property(|p| p.y);
        surface.set_visible(true);

        let json = serde_json::to_string(&surface.to_record().unwrap()).unwrap();
        let restored = Surface::from_record(&serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored.description(), surface.description());
        assert_eq!(restored.colors(), surface.colors());
        assert!(restored.is_visible());
        assert!(restored.is_signed());
        assert_eq!(restored.n_faces(), surface.n_faces());
        assert!(restored.has_property());
        assert_relative_eq!(restored.area(), surface.area(), max_relative = 1e-4);
    }

    #[test]
    fn surface_from_external_mesh() {
        let mut mesh = Mesh::new();
        let a = mesh.add_vertex(Point3::origin(), Vector3::z());
        let b = mesh.add_vertex(Point3::new(1.0, 0.0, 0.0), Vector3::z());
        let c = mesh.add_vertex(Point3::new(0.0, 1.0, 0.0), Vector3::z());
        mesh.add_face([a, b, c]);
        let surface = Surface::from_mesh(mesh);
        assert_eq!(surface.description(), "Mesh");
        assert!(!surface.is_signed());
        assert_eq!(surface.opacity(), 0.999);
        assert_eq!(surface.n_faces(), 1);
    }
}

/// An RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

fn default_isovalue() -> f64 {
    0.02
}

fn default_opacity() -> f64 {
    0.999
}

fn default_positive_color() -> Color {
    Color::BLUE
}

fn default_negative_color() -> Color {
    Color::RED
}

/// A request for one surface.
///
/// `quality` selects the grid spacing through
/// [`GridSize::step_size`](crate::grid::GridSize::step_size). The opacity
/// default sits just below one so that surfaces sort after opaque objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceInfo {
    #[serde(default)]
    pub surface_type: SurfaceType,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_isovalue")]
    pub isovalue: f64,
    #[serde(default = "default_positive_color")]
    pub positive_color: Color,
    #[serde(default = "default_negative_color")]
    pub negative_color: Color,
    #[serde(default)]
    pub is_signed: bool,
    #[serde(default)]
    pub simplify_mesh: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

impl Default for SurfaceInfo {
    fn default() -> Self {
        Self {
            surface_type: SurfaceType::default(),
            quality: default_quality(),
            isovalue: default_isovalue(),
            positive_color: default_positive_color(),
            negative_color: default_negative_color(),
            is_signed: false,
            simplify_mesh: false,
            opacity: default_opacity(),
        }
    }
}

impl SurfaceInfo {
    /// Default request for `surface_type`, signed if the field takes both signs.
    pub fn new(surface_type: SurfaceType) -> Self {
        Self {
            is_signed: surface_type.is_signed(),
            surface_type,
            ..Self::default()
        }
    }

    pub fn with_isovalue(mut self, isovalue: f64) -> Self {
        self.isovalue = isovalue;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }
}

impl fmt::Display for SurfaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.surface_type, self.isovalue)
    }
}

/// A generated surface.
///
/// **Context**: Signed fields give two surfaces, one around the positive
/// lobes and one around the negative lobes, which are drawn in different
/// colours. Either mesh may carry a scalar property (for example an
/// electrostatic potential) mapped onto the surface.
///
/// **How it Works**: The surface owns both meshes outright. The property
/// range is cached and refreshed whenever the property or the meshes change.
/// Colours are stored as `[negative, positive]`.
#[derive(Debug, Clone)]
pub struct Surface {
    description: String,
    opacity: f64,
    is_signed: bool,
    colors: [Color; 2],
    visible: bool,
    positive: Mesh,
    negative: Mesh,
    property_range: (f64, f64),
}

impl Surface {
    /// Empty surface carrying the attributes of `info`.
    pub fn new(info: &SurfaceInfo) -> Self {
        Self {
            description: info.to_string(),
            opacity: info.opacity,
            is_signed: info.is_signed,
            colors: [info.negative_color, info.positive_color],
            visible: false,
            positive: Mesh::new(),
            negative: Mesh::new(),
            property_range: (0.0, 0.0),
        }
    }

    /// Wraps an externally supplied mesh as an unsigned surface.
    pub fn from_mesh(mesh: Mesh) -> Self {
        let mut surface = Self::new(&SurfaceInfo::default());
        surface.description = "Mesh".to_string();
        surface.positive = mesh;
        surface.update_property_range();
        surface
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity;
    }

    pub fn is_signed(&self) -> bool {
        self.is_signed
    }

    /// `[negative, positive]`.
    pub fn colors(&self) -> [Color; 2] {
        self.colors
    }

    pub fn set_colors(&mut self, colors: [Color; 2]) {
        self.colors = colors;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn positive_mesh(&self) -> &Mesh {
        &self.positive
    }

    pub fn negative_mesh(&self) -> &Mesh {
        &self.negative
    }

    pub fn set_positive_mesh(&mut self, mesh: Mesh) {
        self.positive = mesh;
        self.update_property_range();
    }

    pub fn set_negative_mesh(&mut self, mesh: Mesh) {
        self.negative = mesh;
        self.update_property_range();
    }

    fn meshes(&self) -> impl Iterator<Item = &Mesh> {
        std::iter::once(&self.positive).chain(self.is_signed.then_some(&self.negative))
    }

    fn meshes_mut(&mut self) -> impl Iterator<Item = &mut Mesh> {
        let negative = self.is_signed.then_some(&mut self.negative);
        std::iter::once(&mut self.positive).chain(negative)
    }

    /// Maps a function of position onto the surface.
    pub fn compute_property<F: Fn(&Point3<f64>) -> f64>(&mut self, f: F) {
        for mesh in self.meshes_mut() {
            mesh.compute_scalar_field(&f);
        }
        self.update_property_range();
    }

    /// Uses the mesh index of each face as the property.
    pub fn compute_index_property(&mut self) {
        if self.positive.mesh_index().is_none() {
            self.positive.set_mesh_index(0);
        }
        if self.is_signed && self.negative.mesh_index().is_none() {
            self.negative.set_mesh_index(1);
        }
        for mesh in self.meshes_mut() {
            mesh.compute_index_field();
        }
        self.update_property_range();
    }

    pub fn has_property(&self) -> bool {
        self.meshes().any(|mesh| mesh.scalar_field().is_some())
    }

    pub fn clear_property(&mut self) {
        for mesh in self.meshes_mut() {
            mesh.clear_scalar_field();
        }
        self.update_property_range();
    }

    pub fn property_range(&self) -> (f64, f64) {
        self.property_range
    }

    /// True when the property takes both signs.
    pub fn property_is_signed(&self) -> bool {
        let (min, max) = self.property_range;
        self.has_property() && min < 0.0 && max > 0.0
    }

    fn update_property_range(&mut self) {
        let ranges: Vec<(f64, f64)> = self
            .meshes()
            .filter(|mesh| mesh.scalar_field().is_some())
            .map(Mesh::scalar_field_range)
            .collect();
        self.property_range = ranges
            .into_iter()
            .reduce(|(a, b), (c, d)| (a.min(c), b.max(d)))
            .unwrap_or((0.0, 0.0));
    }

    /// Sum of [`Mesh::area`] over both meshes.
    pub fn area(&self) -> f64 {
        self.positive.area() + self.negative.area()
    }

    pub fn n_vertices(&self) -> usize {
        self.positive.n_vertices() + self.negative.n_vertices()
    }

    pub fn n_faces(&self) -> usize {
        self.positive.n_faces() + self.negative.n_faces()
    }

    /// Clips both meshes against a plane, keeping the side `normal` points to.
    pub fn clip(&mut self, normal: &Vector3<f64>, point: &Point3<f64>) {
        self.positive.clip(normal, point);
        self.negative.clip(normal, point);
        self.update_property_range();
    }

    pub fn to_record(&self) -> Result<SurfaceRecord> {
        Ok(SurfaceRecord {
            description: self.description.clone(),
            opacity: self.opacity,
            is_signed: self.is_signed,
            colors: self.colors,
            visible: self.visible,
            positive: self.positive.to_record()?,
            negative: self.negative.to_record()?,
        })
    }

    pub fn from_record(record: &SurfaceRecord) -> Result<Self> {
        let mut surface = Self {
            description: record.description.clone(),
            opacity: record.opacity,
            is_signed: record.is_signed,
            colors: record.colors,
            visible: record.visible,
            positive: Mesh::from_record(&record.positive)?,
            negative: Mesh::from_record(&record.negative)?,
            property_range: (0.0, 0.0),
        };
        surface.update_property_range();
        Ok(surface)
    }

    /// Writes the surface archive as JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.to_record()?)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let record: SurfaceRecord = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        Self::from_record(&record)
    }
}

/// Archive form of a [`Surface`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceRecord {
    pub description: String,
    pub opacity: f64,
    pub is_signed: bool,
    pub colors: [Color; 2],
    pub visible: bool,
    pub positive: MeshRecord,
    pub negative: MeshRecord,
}

/// Builds the surface for one [`SurfaceInfo`].
///
/// **Context**: This is the last stage of a surface request, after the grid
/// for the field has been filled.
///
/// **How it Works**: Marching cubes runs at `+isovalue` for the positive mesh
/// and, for signed requests, at `-isovalue` for the negative mesh. With
/// `simplify_mesh` set, each mesh is then decimated with the mean grid
/// spacing as the edge-length threshold. A decimation failure is logged and
/// the undecimated mesh is kept.
pub struct SurfaceGenerator {
    info: SurfaceInfo,
}

impl SurfaceGenerator {
    pub fn new(info: SurfaceInfo) -> Self {
        Self { info }
    }

    pub fn info(&self) -> &SurfaceInfo {
        &self.info
    }

    /// Progress units reported by [`SurfaceGenerator::surface`].
    pub fn work_units(&self, grid: &GridData) -> usize {
        let lobes = if self.info.is_signed { 2 } else { 1 };
        lobes * MarchingCubes::new(grid).work_units()
    }

    /// Finds the grid for the requested field among `grids` and builds the
    /// surface. `None` when no grid holds that field.
    pub fn generate(&self, grids: &[GridData], ctx: &TaskContext) -> Result<Option<Surface>> {
        let Some(grid) = grids
            .iter()
            .find(|grid| grid.surface_type() == &self.info.surface_type)
        else {
            warn!("no grid data found for {}", self.info.surface_type);
            return Ok(None);
        };
        self.surface(grid, ctx).map(Some)
    }

    /// Builds the surface from `grid`.
    pub fn surface(&self, grid: &GridData, ctx: &TaskContext) -> Result<Surface> {
        let mut surface = Surface::new(&self.info);
        let marching_cubes = MarchingCubes::new(grid);
        let isovalue = self.info.isovalue;

        let positive = marching_cubes.generate(isovalue, ctx)?;
        surface.set_positive_mesh(self.simplify(positive, grid));

        if self.info.is_signed {
            let negative = marching_cubes.generate(-isovalue, ctx)?;
            surface.set_negative_mesh(self.simplify(negative, grid));
        }

        info!(
            "surface {}: {} vertices, {} faces",
            surface.description(),
            surface.n_vertices(),
            surface.n_faces()
        );
        Ok(surface)
    }

    fn simplify(&self, mut mesh: Mesh, grid: &GridData) -> Mesh {
        if !self.info.simplify_mesh || mesh.is_empty() {
            return mesh;
        }
        let mut decimator = MeshDecimator::new(grid.size().step());
        if let Err(e) = decimator.decimate(&mut mesh) {
            warn!("{}", e);
        }
        mesh
    }
}
