use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use nalgebra::Point3;
use ndarray::Array2;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::config::DEFAULT_EVALUATION_THRESHOLD;
use crate::cube::CubeAtom;
use crate::evaluator::EvaluationMode;
use crate::orbital::DensityVector;
use crate::shell::{ShellData, ShellList};
use crate::surface::SurfaceInfo;
use crate::surface_type::SurfaceType;

#[cfg(test)]
mod tests {
    use super::*;

    fn default_settings() -> Settings {
        toml::from_str(include_str!("../config/default.toml")).unwrap()
    }

    #[test]
    fn default_config_is_valid() {
        let settings = default_settings();
        validate_config(&settings).unwrap();
        assert_eq!(settings.atoms.len(), 2);
        assert_eq!(settings.shells().unwrap().n_basis(), 2);
        assert_eq!(settings.alpha_matrix().unwrap().dim(), (2, 2));
        // restricted wavefunction
        assert_eq!(settings.beta_matrix().unwrap(), settings.alpha_matrix().unwrap());
        assert!(settings.surfaces.len() >= 2);
        assert_eq!(settings.surfaces[0].surface_type, SurfaceType::AlphaOrbital(0));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut settings = default_settings();
        settings.surfaces[0].quality = 9;
        assert!(validate_config(&settings).is_err());

        let mut settings = default_settings();
        settings.surfaces[0].isovalue = -0.1;
        assert!(validate_config(&settings).is_err());

        let mut settings = default_settings();
        settings.alpha_coefficients[1].push(0.0);
        assert!(validate_config(&settings).is_err());

        let mut settings = default_settings();
        settings.basis = ShellData::default();
        assert!(validate_config(&settings).is_err());
    }

    #[test]
    fn evaluation_mode_follows_flags() {
        let mut settings = default_settings();
        settings.coarse_grain = true;
        settings.threshold = 0.01;
        assert_eq!(
            settings.evaluation_mode(),
            EvaluationMode::CoarseGrain { threshold: 0.01 }
        );
        settings.coarse_grain = false;
        assert_eq!(settings.evaluation_mode(), EvaluationMode::Direct);
    }

    #[test]
    fn surface_labels_parse() {
        assert_eq!(parse_surface_type("alpha:1"), Ok(SurfaceType::AlphaOrbital(0)));
        assert_eq!(parse_surface_type("Beta:3"), Ok(SurfaceType::BetaOrbital(2)));
        assert_eq!(parse_surface_type("total"), Ok(SurfaceType::TotalDensity));
        assert_eq!(parse_surface_type("spin"), Ok(SurfaceType::SpinDensity));
        assert!(parse_surface_type("alpha:0").is_err());
        assert!(parse_surface_type("alpha").is_err());
        assert!(parse_surface_type("gamma:1").is_err());
    }
}

/// An atom of the molecule, positioned in angstroms.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Atom {
    pub atomic_number: u32,
    pub position: [f64; 3],
}

/// Runtime configuration for the application.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub atoms: Vec<Atom>,
    pub basis: ShellData,
    pub alpha_coefficients: Vec<Vec<f64>>,
    /// Empty for a restricted wavefunction.
    #[serde(default)]
    pub beta_coefficients: Vec<Vec<f64>>,
    #[serde(default)]
    pub densities: Vec<DensityVector>,
    pub surfaces: Vec<SurfaceInfo>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_padding")]
    pub padding: f64,
    #[serde(default = "default_coarse_grain")]
    pub coarse_grain: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_padding() -> f64 {
    0.5
}

fn default_coarse_grain() -> bool {
    true
}

fn default_threshold() -> f64 {
    DEFAULT_EVALUATION_THRESHOLD
}

impl Settings {
    pub fn atom_positions(&self) -> Vec<Point3<f64>> {
        self.atoms.iter().map(|atom| Point3::from(atom.position)).collect()
    }

    pub fn cube_atoms(&self) -> Vec<CubeAtom> {
        self.atoms
            .iter()
            .map(|atom| CubeAtom {
                atomic_number: atom.atomic_number,
                position: Point3::from(atom.position),
            })
            .collect()
    }

    pub fn shells(&self) -> Result<ShellList> {
        Ok(ShellList::from_shell_data(&self.basis, &self.atom_positions())?)
    }

    pub fn alpha_matrix(&self) -> Result<Array2<f64>> {
        coefficient_matrix(&self.alpha_coefficients).context("alpha coefficients")
    }

    /// Beta coefficients, or the alpha ones when none are given.
    pub fn beta_matrix(&self) -> Result<Array2<f64>> {
        if self.beta_coefficients.is_empty() {
            self.alpha_matrix()
        } else {
            coefficient_matrix(&self.beta_coefficients).context("beta coefficients")
        }
    }

    pub fn evaluation_mode(&self) -> EvaluationMode {
        if self.coarse_grain {
            EvaluationMode::CoarseGrain {
                threshold: self.threshold,
            }
        } else {
            EvaluationMode::Direct
        }
    }
}

/// One orbital per row.
fn coefficient_matrix(rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let width = rows.first().map_or(0, Vec::len);
    if let Some(row) = rows.iter().position(|row| row.len() != width) {
        bail!("row {} has {} coefficients, expected {}", row + 1, rows[row].len(), width);
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((rows.len(), width), flat)?)
}

pub fn load_config() -> Result<Settings> {
    let root = retrieve_project_root()?;
    let args = CliArgs::parse();

    let default_config_file = root.join("config/default.toml");
    let local_config = root.join("config/local.toml");

    let config_file = if let Some(path) = &args.config {
        path.clone()
    } else if local_config.exists() {
        println!("Using local configuration: {:?}", local_config);
        local_config
    } else {
        println!("Using default configuration: {:?}", default_config_file);
        default_config_file
    };

    let settings = Config::builder()
        .add_source(File::from(config_file.as_path()).required(true))
        .add_source(Environment::with_prefix("isosurf"))
        .build()
        .with_context(|| format!("cannot load configuration from {:?}", config_file))?;

    let mut config: Settings = settings
        .try_deserialize()
        .context("cannot deserialize configuration")?;

    if let Some(surfaces) = args.surfaces {
        config.surfaces = surfaces.into_iter().map(SurfaceInfo::new).collect();
    }
    for surface in &mut config.surfaces {
        if let Some(quality) = args.quality {
            surface.quality = quality;
        }
        if let Some(isovalue) = args.isovalue {
            surface.isovalue = isovalue;
        }
        if args.simplify {
            surface.simplify_mesh = true;
        }
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(padding) = args.padding {
        config.padding = padding;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if args.no_coarse_grain {
        config.coarse_grain = false;
    }

    validate_config(&config)?;

    Ok(config)
}

/// Retrieve the project root directory.
/// This function tries to find the project root directory in different ways:
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the ISOSURF_ROOT_DIR environment variable is set, use it.
/// 3. If the "config" subdirectory is found in the executable directory or any of its parents, use it.
fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("ISOSURF_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }

    let exe_path = env::current_exe().context("failed to get current executable path")?;
    exe_path
        .ancestors()
        .skip(1)
        .find(|dir| dir.join("config").is_dir())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("could not find project root directory"))
}

pub fn validate_config(config: &Settings) -> Result<()> {
    for surface in &config.surfaces {
        if surface.quality > 7 {
            bail!("quality of {} must be between 0 and 7", surface);
        }
        if surface.isovalue <= 0.0 {
            bail!("isovalue of {} must be greater than 0", surface);
        }
    }
    if config.basis.shell_types.is_empty() {
        bail!("basis must contain at least one shell");
    }
    if config.padding < 0.0 {
        bail!("padding must not be negative");
    }

    let n_basis = config.shells()?.n_basis();
    for (name, rows) in [
        ("alpha", &config.alpha_coefficients),
        ("beta", &config.beta_coefficients),
    ] {
        if let Some(row) = rows.iter().position(|row| row.len() != n_basis) {
            bail!(
                "{} orbital {} has {} coefficients but the basis has {} functions",
                name,
                row + 1,
                rows[row].len(),
                n_basis
            );
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(version, about = "isosurf - isosurfaces of molecular orbitals and densities")]
pub struct CliArgs {
    /// Configuration file to use instead of config/local.toml or config/default.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Surfaces to generate, replacing those in the configuration, separated by spaces.
    /// Format: alpha:N, beta:N (1-based orbital numbers), total, spin, alpha-density, beta-density
    #[arg(short, long, value_parser = parse_surface_type, num_args = 1.., value_delimiter = ' ')]
    surfaces: Option<Vec<SurfaceType>>,

    /// Grid quality from 0 (coarse) to 7 (fine), applied to every surface.
    #[arg(short, long)]
    quality: Option<u8>,

    /// Isovalue applied to every surface.
    #[arg(short, long)]
    isovalue: Option<f64>,

    /// Simplify every surface mesh after extraction.
    #[arg(long)]
    simplify: bool,

    /// Directory for the generated files.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Padding in angstroms added around the bounding box of the basis.
    #[arg(long)]
    padding: Option<f64>,

    /// Evaluate every grid point instead of refining a coarse pass.
    #[arg(long)]
    no_coarse_grain: bool,

    /// Magnitude below which a coarse cell is not refined.
    #[arg(long)]
    threshold: Option<f64>,
}

/// Parse a surface label such as "alpha:2" or "total".
fn parse_surface_type(s: &str) -> Result<SurfaceType, String> {
    let lower = s.to_lowercase();
    let (kind, number) = match lower.split_once(':') {
        Some((kind, number)) => {
            let n = number
                .parse::<usize>()
                .map_err(|_| format!("Failed to parse orbital number: {}", number))?;
            if n == 0 {
                return Err(format!("Orbital numbers start at 1: '{}'", s));
            }
            (kind, Some(n - 1))
        }
        None => (lower.as_str(), None),
    };

    match (kind, number) {
        ("alpha", Some(i)) => Ok(SurfaceType::AlphaOrbital(i)),
        ("beta", Some(i)) => Ok(SurfaceType::BetaOrbital(i)),
        ("total", None) => Ok(SurfaceType::TotalDensity),
        ("spin", None) => Ok(SurfaceType::SpinDensity),
        ("alpha-density", None) => Ok(SurfaceType::AlphaDensity),
        ("beta-density", None) => Ok(SurfaceType::BetaDensity),
        _ => Err(format!(
            "Invalid surface: '{}'. Expected alpha:N, beta:N, total, spin, alpha-density or beta-density",
            s
        )),
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Settings:")?;
        writeln!(f, "  - Atoms: {}", self.atoms.len())?;
        writeln!(f, "  - Shells: {}", self.basis.shell_types.len())?;
        writeln!(f, "  - Alpha Orbitals: {}", self.alpha_coefficients.len())?;
        writeln!(f, "  - Beta Orbitals: {}", self.beta_coefficients.len())?;
        writeln!(f, "  - Densities: {}", self.densities.len())?;
        writeln!(f, "  - Output Directory: {}", self.output_dir.display())?;
        writeln!(f, "  - Padding: {:.3}", self.padding)?;
        match self.evaluation_mode() {
            EvaluationMode::Direct => writeln!(f, "  - Evaluation: direct")?,
            EvaluationMode::CoarseGrain { threshold } => {
                writeln!(f, "  - Evaluation: coarse grain (threshold {:.2e})", threshold)?
            }
        }
        writeln!(f, "  - Surfaces:")?;
        for surface in &self.surfaces {
            writeln!(
                f,
                "      {} quality {}{}",
                surface,
                surface.quality,
                if surface.simplify_mesh { ", simplified" } else { "" }
            )?;
        }
        Ok(())
    }
}
