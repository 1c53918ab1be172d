//! Gaussian cube export.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::Point3;
use ndarray::Axis;

use crate::config::ANGSTROM_TO_BOHR;
use crate::error::Result;
use crate::grid::GridData;


/// An atom line in a cube file. Positions are in angstroms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeAtom {
    pub atomic_number: u32,
    pub position: Point3<f64>,
}

/// Formats a value as `d.dddddE±xx` with a leading space for non-negative values.
fn format_value(w: f64) -> String {
    let formatted = format!("{:.5E}", w);
    let (mantissa, exponent) = formatted.split_once('E').unwrap_or((formatted.as_str(), "0"));
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    let lead = if w >= 0.0 { " " } else { "" };
    format!("{}{}E{}{:0>2}", lead, mantissa, sign, digits)
}

/// Writes `grid` in cube format, converting lengths to bohr.
///
/// Values follow the lattice with `x` slowest. Each z-column is written six
/// values to a line and starts on a fresh line.
pub fn write_cube<W: Write>(
    grid: &GridData,
    atoms: &[CubeAtom],
    writer: &mut W,
    invert_sign: bool,
) -> Result<()> {
    let size = grid.size();
    let origin = size.origin * ANGSTROM_TO_BOHR;
    let h = size.delta * ANGSTROM_TO_BOHR;

    writeln!(writer, "Cube file for {}", grid.surface_type())?;
    writeln!(writer, "Generated using isosurf")?;
    writeln!(
        writer,
        "{:5} {:13.6} {:13.6} {:13.6}",
        atoms.len(),
        origin.x,
        origin.y,
        origin.z
    )?;
    writeln!(writer, "{:5} {:13.6} {:13.6} {:13.6}", size.nx, h.x, 0.0, 0.0)?;
    writeln!(writer, "{:5} {:13.6} {:13.6} {:13.6}", size.ny, 0.0, h.y, 0.0)?;
    writeln!(writer, "{:5} {:13.6} {:13.6} {:13.6}", size.nz, 0.0, 0.0, h.z)?;

    for atom in atoms {
        let p = atom.position * ANGSTROM_TO_BOHR;
        writeln!(
            writer,
            "{:5}{:14.6}{:14.6}{:14.6}{:14.6}",
            atom.atomic_number,
            f64::from(atom.atomic_number),
            p.x,
            p.y,
            p.z
        )?;
    }

    let sign = if invert_sign { -1.0 } else { 1.0 };
    for column in grid.data().lanes(Axis(2)) {
        for (k, &w) in column.iter().enumerate() {
            let separator = if k % 6 == 5 { "\n" } else { " " };
            // adding zero turns -0.0 into 0.0
            write!(writer, "{}{}", format_value(sign * w + 0.0), separator)?;
        }
        if size.nz % 6 != 0 {
            writeln!(writer)?;
        }
    }
    Ok(())
}

/// Writes `grid` to a new cube file at `path`.
pub fn save_cube(
    grid: &GridData,
    atoms: &[CubeAtom],
    path: impl AsRef<Path>,
    invert_sign: bool,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_cube(grid, atoms, &mut writer, invert_sign)?;
    writer.flush()?;
    Ok(())
}
