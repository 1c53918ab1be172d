use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Serialize;

use crate::cube::{save_cube, CubeAtom};
use crate::grid::GridData;
use crate::surface::{Surface, SurfaceInfo};
use crate::surface_type::SurfaceType;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSize;
    use crate::surface::SurfaceGenerator;
    use crate::task::TaskContext;
    use nalgebra::{Point3, Vector3};

    #[test]
    fn stems_are_file_safe() {
        assert_eq!(file_stem(&SurfaceType::AlphaOrbital(0)), "alpha_1");
        assert_eq!(file_stem(&SurfaceType::DysonLeft(1)), "dyson_left_2");
        assert_eq!(file_stem(&SurfaceType::TotalDensity), "total_density");
        assert_eq!(file_stem(&SurfaceType::Custom(String::new())), "surface");
    }

    #[test]
    fn repeated_stems_are_numbered() {
        let infos = vec![
            SurfaceInfo::new(SurfaceType::AlphaOrbital(0)),
            SurfaceInfo::new(SurfaceType::TotalDensity),
            SurfaceInfo::new(SurfaceType::AlphaOrbital(0)).with_quality(5),
        ];
        assert_eq!(
            unique_stems(&infos),
            vec!["alpha_1_1", "total_density", "alpha_1_2"]
        );
    }

    fn sphere_surface() -> (Surface, GridData) {
        let size = GridSize::new(Point3::new(-2.0, -2.0, -2.0), Vector3::repeat(0.25), 17, 17, 17);
        let mut grid = GridData::new(size, SurfaceType::TotalDensity);
        grid.fill_with(|p| (-p.coords.norm_squared()).exp());
        let surface = SurfaceGenerator::new(SurfaceInfo::new(SurfaceType::TotalDensity).with_isovalue(0.3))
            .surface(&grid, &TaskContext::detached(0))
            .unwrap();
        (surface, grid)
    }

    #[test]
    fn summary_serializes_to_toml() {
        let (mut surface, _) = sphere_surface();
        let plain = SurfaceSummary::new("total_density", &surface);
        assert!(plain.property_range.is_none());
        surface.compute_property(|p| p.z);
        let summary = SurfaceSummary::new("total_density", &surface);
        assert_eq!(summary.vertices, surface.n_vertices());

        let text = summary_toml(&[plain, summary]).unwrap();
        assert!(text.contains("label = \"total_density\""));
        assert_eq!(text.matches("[[surfaces]]").count(), 2);
        assert_eq!(text.matches("property_range").count(), 1);
    }

    #[test]
    fn surface_files_are_written() {
        let (surface, grid) = sphere_surface();
        let dir = std::env::temp_dir().join(format!("isosurf-output-{}", std::process::id()));
        write_surface(&dir, "density", &surface, &grid, &[]).unwrap();
        for ext in ["obj", "json", "cube"] {
            assert!(dir.join(format!("density.{ext}")).is_file());
        }
        let restored = Surface::load_json(dir.join("density.json")).unwrap();
        assert_eq!(restored.n_faces(), surface.n_faces());
        fs::remove_dir_all(&dir).unwrap();
    }
}

/// File name stem for a field, e.g. `alpha_1` or `dyson_left_2`.
pub fn file_stem(surface_type: &SurfaceType) -> String {
    let stem = surface_type
        .to_string()
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .join("_");
    if stem.is_empty() {
        "surface".to_string()
    } else {
        stem
    }
}

/// One stem per request. Stems shared by several requests are numbered in order.
pub fn unique_stems(infos: &[SurfaceInfo]) -> Vec<String> {
    let stems: Vec<String> = infos.iter().map(|info| file_stem(&info.surface_type)).collect();
    let counts = stems.iter().counts();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    stems
        .iter()
        .map(|stem| {
            if counts[stem] == 1 {
                return stem.clone();
            }
            let n = seen.entry(stem.as_str()).or_insert(0);
            *n += 1;
            format!("{}_{}", stem, n)
        })
        .collect()
}

/// Writes `<stem>.obj`, `<stem>.json` and `<stem>.cube` into `dir`.
pub fn write_surface(
    dir: &Path,
    stem: &str,
    surface: &Surface,
    grid: &GridData,
    atoms: &[CubeAtom],
) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;

    let mut mesh = surface.positive_mesh().clone();
    mesh += surface.negative_mesh();
    mesh.save_obj(dir.join(format!("{stem}.obj")))?;
    surface.save_json(dir.join(format!("{stem}.json")))?;
    save_cube(grid, atoms, dir.join(format!("{stem}.cube")), false)?;
    Ok(())
}

/// Figures reported for each generated surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceSummary {
    pub label: String,
    pub description: String,
    pub vertices: usize,
    pub faces: usize,
    pub area: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_range: Option<[f64; 2]>,
}

impl SurfaceSummary {
    pub fn new(label: &str, surface: &Surface) -> Self {
        let (min, max) = surface.property_range();
        Self {
            label: label.to_string(),
            description: surface.description().to_string(),
            vertices: surface.n_vertices(),
            faces: surface.n_faces(),
            area: surface.area(),
            property_range: surface.has_property().then_some([min, max]),
        }
    }
}

impl fmt::Display for SurfaceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} {:>10} {:>10} {:>12.4}",
            self.label, self.vertices, self.faces, self.area
        )?;
        if let Some([min, max]) = self.property_range {
            write!(f, "  [{:.4}, {:.4}]", min, max)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SummaryFile<'a> {
    surfaces: &'a [SurfaceSummary],
}

pub fn summary_toml(summaries: &[SurfaceSummary]) -> Result<String> {
    Ok(toml::to_string_pretty(&SummaryFile {
        surfaces: summaries,
    })?)
}

/// Writes `summary.toml` into `dir`.
pub fn write_summary(dir: &Path, summaries: &[SurfaceSummary]) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join("summary.toml"), summary_toml(summaries)?)?;
    Ok(())
}

pub fn print_summary(summaries: &[SurfaceSummary]) {
    println!(
        "{:<20} {:>10} {:>10} {:>12}  {}",
        "Surface", "Vertices", "Faces", "Area", "Property range"
    );
    for summary in summaries {
        println!("{}", summary);
    }
}
