//! Contracted Gaussian basis functions.
//!
//! A [`Shell`] groups the basis functions of one angular-momentum class that
//! share a center and a set of primitive Gaussians. A [`ShellList`] is the
//! ordered basis of a molecule and fixes the basis-function ordering used by
//! every coefficient matrix.
//!
//! The shell system provides:
//! - Normalization of contraction coefficients at construction
//! - A numerically derived significant radius used as an evaluation cutoff
//! - Evaluation into a stack buffer, so shells can be evaluated from many threads
//! - Construction from the flat arrays found in formatted checkpoint files

use std::fmt;

use itertools::izip;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::config::{
    ANGSTROM_TO_BOHR, MAX_SHELL_FUNCTIONS, SHELL_MAX_RADIUS, SHELL_RADIUS_STEP, SHELL_THRESHOLD,
};
use crate::error::{Error, Result};


const SQRT_3: f64 = 1.732_050_807_568_877_2;
const SQRT_5: f64 = 2.236_067_977_499_79;
const SQRT_7: f64 = 2.645_751_311_064_590_7;
const SQRT_15: f64 = 3.872_983_346_207_417;
const SQRT_35: f64 = 5.916_079_783_099_616;
const SQRT_70: f64 = 8.366_600_265_340_756;
const SQRT_3_8: f64 = 0.612_372_435_695_794_5;
const SQRT_5_8: f64 = 0.790_569_415_042_094_9;
const SQRT_35_3: f64 = 3.415_650_255_319_866;

/// Angular-momentum class of a shell, including the pure/Cartesian variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AngularMomentum {
    S,
    P,
    D5,
    D6,
    F7,
    F10,
    G9,
    G15,
}

impl AngularMomentum {
    pub const ALL: [AngularMomentum; 8] = [
        AngularMomentum::S,
        AngularMomentum::P,
        AngularMomentum::D5,
        AngularMomentum::D6,
        AngularMomentum::F7,
        AngularMomentum::F10,
        AngularMomentum::G9,
        AngularMomentum::G15,
    ];

    /// Number of basis functions in a shell of this class.
    pub fn n_functions(self) -> usize {
        match self {
            AngularMomentum::S => 1,
            AngularMomentum::P => 3,
            AngularMomentum::D5 => 5,
            AngularMomentum::D6 => 6,
            AngularMomentum::F7 => 7,
            AngularMomentum::F10 => 10,
            AngularMomentum::G9 => 9,
            AngularMomentum::G15 => 15,
        }
    }

    /// Polynomial degree `l`.
    pub fn degree(self) -> i32 {
        match self {
            AngularMomentum::S => 0,
            AngularMomentum::P => 1,
            AngularMomentum::D5 | AngularMomentum::D6 => 2,
            AngularMomentum::F7 | AngularMomentum::F10 => 3,
            AngularMomentum::G9 | AngularMomentum::G15 => 4,
        }
    }

    /// Prefactor and exponent power of the primitive normalization.
    ///
    /// Cartesian functions use the axial prefactor, so `xx`, `xxx` and `xxxx`
    /// have self-overlap 3, 15 and 105, i.e. `(2l-1)!!`.
    fn normalization(self) -> (f64, f64) {
        let ns = (2.0 / std::f64::consts::PI).powf(0.75);
        match self.degree() {
            0 => (ns, 0.75),
            1 => (2.0 * ns, 1.25),
            2 => (4.0 * ns, 1.75),
            3 => (8.0 * ns, 2.25),
            _ => (16.0 * ns, 2.75),
        }
    }

    /// Maps a checkpoint shell type code. SP shells (-1) are not a single class.
    pub fn from_shell_type(code: i32) -> Option<Self> {
        match code {
            0 => Some(AngularMomentum::S),
            1 => Some(AngularMomentum::P),
            -2 => Some(AngularMomentum::D5),
            2 => Some(AngularMomentum::D6),
            -3 => Some(AngularMomentum::F7),
            3 => Some(AngularMomentum::F10),
            -4 => Some(AngularMomentum::G9),
            4 => Some(AngularMomentum::G15),
            _ => None,
        }
    }
}

impl fmt::Display for AngularMomentum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AngularMomentum::S => "S",
            AngularMomentum::P => "P",
            AngularMomentum::D5 => "D5",
            AngularMomentum::D6 => "D6",
            AngularMomentum::F7 => "F7",
            AngularMomentum::F10 => "F10",
            AngularMomentum::G9 => "G9",
            AngularMomentum::G15 => "G15",
        };
        write!(f, "{}", label)
    }
}

/// Values of every function in a shell. Only the first `n_functions` entries are meaningful.
pub type ShellValues = [f64; MAX_SHELL_FUNCTIONS];

/// A contracted Gaussian shell.
///
/// **Context**: Orbitals and densities are expanded in basis functions grouped
/// into shells. Evaluating them on a grid is the dominant cost of surface
/// generation, so each shell carries a cutoff radius beyond which it is
/// treated as zero.
///
/// **How it Works**: The contraction coefficients are normalized once on
/// construction. The significant radius is found by stepping outward from
/// the turning point of each primitive until its magnitude falls below
/// [`SHELL_THRESHOLD`]. Evaluation sums the primitives at the squared
/// distance and multiplies by the angular factor of each function.
#[derive(Debug, Clone, PartialEq)]
pub struct Shell {
    kind: AngularMomentum,
    center: Point3<f64>,
    atom: usize,
    exponents: Vec<f64>,
    coefficients: Vec<f64>,
    significant_radius_squared: f64,
}

impl Shell {
    /// Creates a normalized shell. Exponents are in inverse square angstroms.
    pub fn new(
        kind: AngularMomentum,
        center: Point3<f64>,
        exponents: Vec<f64>,
        mut coefficients: Vec<f64>,
    ) -> Self {
        if coefficients.len() < exponents.len() {
            coefficients.resize(exponents.len(), 0.0);
        }

        let (prefactor, power) = kind.normalization();
        for (c, alpha) in coefficients.iter_mut().zip(&exponents) {
            *c *= prefactor * alpha.powf(power);
        }

        let mut shell = Self {
            kind,
            center,
            atom: 0,
            exponents,
            coefficients,
            significant_radius_squared: 0.0,
        };
        let radius = shell.compute_significant_radius(SHELL_THRESHOLD);
        shell.significant_radius_squared = radius * radius;
        shell
    }

    /// Tags the shell with the (0-based) index of the atom it sits on.
    pub fn on_atom(mut self, atom: usize) -> Self {
        self.atom = atom;
        self
    }

    fn compute_significant_radius(&self, thresh: f64) -> f64 {
        let l = self.kind.degree();
        let magnitude = |c: f64, alpha: f64, r: f64| c * r.powi(l) * (-alpha * r * r).exp();

        self.exponents
            .iter()
            .zip(&self.coefficients)
            .map(|(&alpha, &c)| {
                let c = c.abs();
                // turning point of the primitive
                let mut r = (0.5 * l as f64 / alpha).sqrt();
                while magnitude(c, alpha, r) > thresh && r < SHELL_MAX_RADIUS {
                    r += SHELL_RADIUS_STEP;
                }
                r
            })
            .fold(0.0, f64::max)
    }

    pub fn kind(&self) -> AngularMomentum {
        self.kind
    }

    pub fn center(&self) -> Point3<f64> {
        self.center
    }

    pub fn atom(&self) -> usize {
        self.atom
    }

    pub fn exponents(&self) -> &[f64] {
        &self.exponents
    }

    /// Normalized contraction coefficients.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn n_functions(&self) -> usize {
        self.kind.n_functions()
    }

    pub fn significant_radius_squared(&self) -> f64 {
        self.significant_radius_squared
    }

    pub fn significant_radius(&self) -> f64 {
        self.significant_radius_squared.sqrt()
    }

    /// Axis-aligned box spanned by the significant radius.
    pub fn bounding_box(&self) -> (Point3<f64>, Point3<f64>) {
        let r = self.significant_radius();
        (self.center.map(|c| c - r), self.center.map(|c| c + r))
    }

    /// Evaluates every function of the shell at `point`.
    ///
    /// Points beyond the significant radius give zeros without touching the
    /// primitives.
    pub fn evaluate(&self, point: &Point3<f64>) -> ShellValues {
        let mut v = [0.0; MAX_SHELL_FUNCTIONS];

        let delta = point - self.center;
        let r2 = delta.norm_squared();
        if r2 > self.significant_radius_squared {
            return v;
        }

        let s: f64 = self
            .exponents
            .iter()
            .zip(&self.coefficients)
            .map(|(alpha, c)| c * (-alpha * r2).exp())
            .sum();
        let (x, y, z) = (delta.x, delta.y, delta.z);

        match self.kind {
            AngularMomentum::S => {
                v[0] = s;
            }
            AngularMomentum::P => {
                v[0] = s * x;
                v[1] = s * y;
                v[2] = s * z;
            }
            AngularMomentum::D5 => {
                // 3zz-rr  xz  yz  xx-yy  xy
                v[0] = s * (3.0 * z * z - r2) * 0.5;
                v[1] = s * (x * z) * SQRT_3;
                v[2] = s * (y * z) * SQRT_3;
                v[3] = s * (x * x - y * y) * 0.5 * SQRT_3;
                v[4] = s * (x * y) * SQRT_3;
            }
            AngularMomentum::D6 => {
                v[0] = s * x * x;
                v[1] = s * y * y;
                v[2] = s * z * z;
                v[3] = s * x * y * SQRT_3;
                v[4] = s * x * z * SQRT_3;
                v[5] = s * y * z * SQRT_3;
            }
            AngularMomentum::F7 => {
                v[0] = s * z * (5.0 * z * z - 3.0 * r2) * 0.5;
                v[1] = s * x * (5.0 * z * z - r2) * SQRT_3_8;
                v[2] = s * y * (5.0 * z * z - r2) * SQRT_3_8;
                v[3] = s * z * (x * x - y * y) * 0.5 * SQRT_15;
                v[4] = s * x * y * z * SQRT_15;
                v[5] = s * x * (x * x - 3.0 * y * y) * SQRT_5_8;
                v[6] = s * y * (3.0 * x * x - y * y) * SQRT_5_8;
            }
            AngularMomentum::F10 => {
                // xxx yyy zzz xyy xxy xxz xzz yzz yyz xyz
                v[0] = s * x * x * x;
                v[1] = s * y * y * y;
                v[2] = s * z * z * z;
                v[3] = s * x * y * y * SQRT_5;
                v[4] = s * x * x * y * SQRT_5;
                v[5] = s * x * x * z * SQRT_5;
                v[6] = s * x * z * z * SQRT_5;
                v[7] = s * y * z * z * SQRT_5;
                v[8] = s * y * y * z * SQRT_5;
                v[9] = s * x * y * z * SQRT_15;
            }
            AngularMomentum::G9 => {
                let (x2, y2, z2) = (x * x, y * y, z * z);
                v[0] = s * (3.0 * r2 * r2 - 30.0 * r2 * z2 + 35.0 * z2 * z2) * 0.125;
                v[1] = s * x * z * (7.0 * z2 - 3.0 * r2) * SQRT_5_8;
                v[2] = s * y * z * (7.0 * z2 - 3.0 * r2) * SQRT_5_8;
                v[3] = s * (x2 - y2) * (7.0 * z2 - r2) * SQRT_5 * 0.25;
                v[4] = s * x * y * (7.0 * z2 - r2) * SQRT_5 * 0.5;
                v[5] = s * x * z * (x2 - 3.0 * y2) * SQRT_70 * 0.25;
                v[6] = s * y * z * (3.0 * x2 - y2) * SQRT_70 * 0.25;
                v[7] = s * (x2 * x2 - 6.0 * x2 * y2 + y2 * y2) * SQRT_35 * 0.125;
                v[8] = s * x * y * (x2 - y2) * SQRT_35 * 0.5;
            }
            AngularMomentum::G15 => {
                // xxxx yyyy zzzz xxxy xxxz xyyy yyyz xzzz yzzz xxyy xxzz yyzz xxyz xyyz xyzz
                v[0] = s * x * x * x * x;
                v[1] = s * y * y * y * y;
                v[2] = s * z * z * z * z;
                v[3] = s * x * x * x * y * SQRT_7;
                v[4] = s * x * x * x * z * SQRT_7;
                v[5] = s * x * y * y * y * SQRT_7;
                v[6] = s * y * y * y * z * SQRT_7;
                v[7] = s * x * z * z * z * SQRT_7;
                v[8] = s * y * z * z * z * SQRT_7;
                v[9] = s * x * x * y * y * SQRT_35_3;
                v[10] = s * x * x * z * z * SQRT_35_3;
                v[11] = s * y * y * z * z * SQRT_35_3;
                v[12] = s * x * x * y * z * SQRT_35;
                v[13] = s * x * y * y * z * SQRT_35;
                v[14] = s * x * y * z * z * SQRT_35;
            }
        }
        v
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "L = {}  K = {}  r^2 = {:.3}  at ({}, {}, {})",
            self.kind,
            self.exponents.len(),
            self.significant_radius_squared,
            self.center.x,
            self.center.y,
            self.center.z
        )?;
        for (alpha, c) in self.exponents.iter().zip(&self.coefficients) {
            writeln!(f, "    {:>14.8} {:>14.8}", alpha, c)?;
        }
        Ok(())
    }
}

/// Basis arrays as stored in a formatted checkpoint file.
///
/// Shell type codes are 0=S, -1=SP, 1=P, -2=D5, 2=D6, -3=F7, 3=F10, -4=G9, 4=G15.
/// Atom indices are 1-based and exponents are in inverse square bohr.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellData {
    pub shell_types: Vec<i32>,
    pub shell_primitives: Vec<usize>,
    pub shell_to_atom: Vec<usize>,
    pub exponents: Vec<f64>,
    pub contraction_coefficients: Vec<f64>,
    #[serde(default)]
    pub sp_contraction_coefficients: Vec<f64>,
}

/// Ordered basis of a molecule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShellList {
    shells: Vec<Shell>,
}

impl ShellList {
    pub fn new(shells: Vec<Shell>) -> Self {
        Self { shells }
    }

    /// Builds the basis from checkpoint arrays and atom positions in angstroms.
    ///
    /// SP shells become an S shell followed by a P shell sharing the
    /// exponents, the P shell taking the SP coefficients.
    pub fn from_shell_data(data: &ShellData, atoms: &[Point3<f64>]) -> Result<Self> {
        let n_shells = data.shell_types.len();
        if data.shell_primitives.len() != n_shells || data.shell_to_atom.len() != n_shells {
            return Err(Error::ShellData(format!(
                "{} shell types, {} primitive counts and {} atom indices",
                n_shells,
                data.shell_primitives.len(),
                data.shell_to_atom.len()
            )));
        }

        let n_primitives: usize = data.shell_primitives.iter().sum();
        if data.exponents.len() < n_primitives || data.contraction_coefficients.len() < n_primitives
        {
            return Err(Error::ShellData(format!(
                "expected {} primitives, found {} exponents and {} coefficients",
                n_primitives,
                data.exponents.len(),
                data.contraction_coefficients.len()
            )));
        }

        let scale = ANGSTROM_TO_BOHR * ANGSTROM_TO_BOHR;
        let mut shells = Vec::with_capacity(n_shells);
        let mut offset = 0;

        for (&code, &n, &atom) in izip!(
            &data.shell_types,
            &data.shell_primitives,
            &data.shell_to_atom
        ) {
            let range = offset..offset + n;
            offset += n;

            if atom == 0 || atom > atoms.len() {
                return Err(Error::ShellData(format!(
                    "atom index {} out of range for {} atoms",
                    atom,
                    atoms.len()
                )));
            }
            let center = atoms[atom - 1];
            let exponents: Vec<f64> = data.exponents[range.clone()]
                .iter()
                .map(|e| e * scale)
                .collect();
            let coefficients = data.contraction_coefficients[range.clone()].to_vec();

            if code == -1 {
                let sp = data.sp_contraction_coefficients.get(range).ok_or_else(|| {
                    Error::ShellData("missing SP contraction coefficients".to_string())
                })?;
                shells.push(
                    Shell::new(AngularMomentum::S, center, exponents.clone(), coefficients)
                        .on_atom(atom - 1),
                );
                shells.push(
                    Shell::new(AngularMomentum::P, center, exponents, sp.to_vec())
                        .on_atom(atom - 1),
                );
            } else {
                let kind = AngularMomentum::from_shell_type(code)
                    .ok_or_else(|| Error::ShellData(format!("unknown shell type {}", code)))?;
                shells.push(Shell::new(kind, center, exponents, coefficients).on_atom(atom - 1));
            }
        }

        Ok(Self { shells })
    }

    pub fn push(&mut self, shell: Shell) {
        self.shells.push(shell);
    }

    pub fn shells(&self) -> &[Shell] {
        &self.shells
    }

    pub fn len(&self) -> usize {
        self.shells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shells.is_empty()
    }

    /// Total number of basis functions.
    pub fn n_basis(&self) -> usize {
        self.shells.iter().map(Shell::n_functions).sum()
    }

    /// Union of the shell boxes, or a point at the origin for an empty list.
    pub fn bounding_box(&self) -> (Point3<f64>, Point3<f64>) {
        let mut shells = self.shells.iter();
        let Some(first) = shells.next() else {
            return (Point3::origin(), Point3::origin());
        };
        shells.fold(first.bounding_box(), |(min, max), shell| {
            let (lo, hi) = shell.bounding_box();
            (min.inf(&lo), max.sup(&hi))
        })
    }

    /// Writes the value of every basis function at `point` into `values`.
    pub fn basis_values(&self, point: &Point3<f64>, values: &mut [f64]) {
        let mut k = 0;
        for shell in &self.shells {
            let n = shell.n_functions();
            let shell_values = shell.evaluate(point);
            values[k..k + n].copy_from_slice(&shell_values[..n]);
            k += n;
        }
    }

    /// Writes the basis-pair products at `point` into `pairs`.
    ///
    /// The ordering matches a vectorized lower-triangular density matrix: for
    /// each basis function `i`, the off-diagonal terms `2 φi φj` for `j < i`
    /// followed by `φi²`. `basis` receives the basis values and `pairs` must
    /// hold `n(n+1)/2` entries.
    pub fn shell_pair_values(&self, point: &Point3<f64>, basis: &mut [f64], pairs: &mut [f64]) {
        self.basis_values(point, basis);
        let mut k = 0;
        for i in 0..basis.len() {
            let xi = basis[i];
            for xj in &basis[..i] {
                pairs[k] = 2.0 * xi * xj;
                k += 1;
            }
            pairs[k] = xi * xi;
            k += 1;
        }
    }

    /// Index of the first basis function on each atom, if it has any.
    pub fn basis_atom_offsets(&self, n_atoms: usize) -> Vec<Option<usize>> {
        let mut offsets = vec![None; n_atoms];
        let mut k = 0;
        for shell in &self.shells {
            if let Some(slot) = offsets.get_mut(shell.atom()) {
                slot.get_or_insert(k);
            }
            k += shell.n_functions();
        }
        offsets
    }

    /// Index of the first shell on each atom, if it has any.
    pub fn shell_atom_offsets(&self, n_atoms: usize) -> Vec<Option<usize>> {
        let mut offsets = vec![None; n_atoms];
        for (i, shell) in self.shells.iter().enumerate() {
            if let Some(slot) = offsets.get_mut(shell.atom()) {
                slot.get_or_insert(i);
            }
        }
        offsets
    }
}
