use std::fmt;

use serde::{Deserialize, Serialize};


/// What a scalar field represents.
///
/// Indexed kinds carry the 0-based orbital (or basis function) index and the
/// custom kind carries its label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceType {
    Custom(String),
    AlphaOrbital(usize),
    BetaOrbital(usize),
    TotalDensity,
    SpinDensity,
    AlphaDensity,
    BetaDensity,
    DensityCombo,
    CubeData,
    VanDerWaals,
    Promolecule,
    SolventExcluded,
    Sid,
    ElectrostaticPotential,
    Geminal(usize),
    Correlation(usize),
    CustomDensity,
    BasisFunction(usize),
    DysonLeft(usize),
    DysonRight(usize),
    MullikenAtomic,
    MullikenDiatomic,
    GenericOrbital(usize),
}

impl Default for SurfaceType {
    fn default() -> Self {
        SurfaceType::Custom(String::new())
    }
}

impl SurfaceType {
    pub fn index(&self) -> Option<usize> {
        match self {
            SurfaceType::AlphaOrbital(i)
            | SurfaceType::BetaOrbital(i)
            | SurfaceType::Geminal(i)
            | SurfaceType::Correlation(i)
            | SurfaceType::BasisFunction(i)
            | SurfaceType::DysonLeft(i)
            | SurfaceType::DysonRight(i)
            | SurfaceType::GenericOrbital(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.index().is_some()
    }

    pub fn is_orbital(&self) -> bool {
        matches!(
            self,
            SurfaceType::AlphaOrbital(_)
                | SurfaceType::BetaOrbital(_)
                | SurfaceType::DysonLeft(_)
                | SurfaceType::DysonRight(_)
                | SurfaceType::GenericOrbital(_)
        )
    }

    pub fn is_density(&self) -> bool {
        matches!(
            self,
            SurfaceType::AlphaDensity
                | SurfaceType::BetaDensity
                | SurfaceType::TotalDensity
                | SurfaceType::SpinDensity
                | SurfaceType::MullikenAtomic
                | SurfaceType::MullikenDiatomic
                | SurfaceType::DensityCombo
                | SurfaceType::Correlation(_)
                | SurfaceType::CustomDensity
        )
    }

    /// Densities built directly from the alpha and beta density matrices.
    pub fn is_regular_density(&self) -> bool {
        matches!(
            self,
            SurfaceType::AlphaDensity
                | SurfaceType::BetaDensity
                | SurfaceType::TotalDensity
                | SurfaceType::SpinDensity
        )
    }

    /// Fields that take both signs and need a surface at `-isovalue` as well.
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            SurfaceType::AlphaOrbital(_)
                | SurfaceType::BetaOrbital(_)
                | SurfaceType::DysonLeft(_)
                | SurfaceType::DysonRight(_)
                | SurfaceType::SpinDensity
                | SurfaceType::DensityCombo
                | SurfaceType::MullikenAtomic
                | SurfaceType::MullikenDiatomic
                | SurfaceType::Geminal(_)
                | SurfaceType::Correlation(_)
                | SurfaceType::BasisFunction(_)
                | SurfaceType::GenericOrbital(_)
                | SurfaceType::CustomDensity
        )
    }
}

impl fmt::Display for SurfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SurfaceType::Custom(label) => label.as_str(),
            SurfaceType::AlphaOrbital(_) => "Alpha",
            SurfaceType::BetaOrbital(_) => "Beta",
            SurfaceType::TotalDensity => "Total Density",
            SurfaceType::SpinDensity => "Spin Density",
            SurfaceType::AlphaDensity => "Alpha Density",
            SurfaceType::BetaDensity => "Beta Density",
            SurfaceType::DensityCombo => "User Defined Density",
            SurfaceType::CubeData => "Cube Data",
            SurfaceType::VanDerWaals => "van der Waals",
            SurfaceType::Promolecule => "Promolecule",
            SurfaceType::SolventExcluded => "Solvent Excluded",
            SurfaceType::Sid => "SID",
            SurfaceType::ElectrostaticPotential => "Electrostatic Potential",
            SurfaceType::Geminal(_) => "Geminal",
            SurfaceType::Correlation(_) => "Correlated Density",
            SurfaceType::CustomDensity => "Custom Density",
            SurfaceType::BasisFunction(_) => "Basis Function",
            SurfaceType::DysonLeft(_) => "Dyson (left)",
            SurfaceType::DysonRight(_) => "Dyson (right)",
            SurfaceType::MullikenAtomic => "Mulliken Atomic",
            SurfaceType::MullikenDiatomic => "Mulliken Diatomic",
            SurfaceType::GenericOrbital(_) => "Orbital",
        };
        match self.index() {
            Some(i) => write!(f, "{} {}", label, i + 1),
            None => write!(f, "{}", label),
        }
    }
}
