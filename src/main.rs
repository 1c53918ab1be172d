use std::time::Instant;

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::Vector3;
use tracing_subscriber::EnvFilter;

use isosurf::grid::{GridData, GridSize};
use isosurf::orbital::MolecularGridEvaluator;
use isosurf::output::{self, SurfaceSummary};
use isosurf::settings::{self, Settings};
use isosurf::surface::{Surface, SurfaceGenerator};
use isosurf::task::{self, Outcome, Progress};

fn progress_bar(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.green/blue} {pos:>5}/{len:5} {msg} ETA: {eta_precise}",
        )?
        .progress_chars("█▇▆▅▄▃▂▁"),
    );
    pb.set_message(message.to_string());
    Ok(pb)
}

fn show(pb: &ProgressBar) -> impl FnMut(Progress) + '_ {
    move |p| {
        pb.set_length(p.total as u64);
        pb.set_position(p.done as u64);
    }
}

/// One grid per distinct field and grid size among the requested surfaces,
/// and the grid each request reads from.
fn request_grids(settings: &Settings) -> Result<(Vec<GridData>, Vec<usize>)> {
    let shells = settings.shells()?;
    let (min, max) = shells.bounding_box();
    let padding = Vector3::repeat(settings.padding);

    let mut grids: Vec<GridData> = Vec::new();
    let mut slots = Vec::new();
    for info in &settings.surfaces {
        let size = GridSize::from_bounds(&(min - padding), &(max + padding), info.quality);
        let existing = grids
            .iter()
            .position(|grid| grid.surface_type() == &info.surface_type && grid.size() == &size);
        let slot = existing.unwrap_or_else(|| {
            grids.push(GridData::new(size, info.surface_type.clone()));
            grids.len() - 1
        });
        slots.push(slot);
    }
    Ok((grids, slots))
}

fn evaluate(settings: &Settings, grids: Vec<GridData>) -> Result<Vec<GridData>> {
    let shells = settings.shells()?;
    let alpha = settings.alpha_matrix()?;
    let beta = settings.beta_matrix()?;
    let densities = settings.densities.clone();
    let mode = settings.evaluation_mode();

    let pb = progress_bar("grids")?;
    let handle = task::spawn(0, move |ctx| {
        let evaluator =
            MolecularGridEvaluator::new(&shells, &alpha, &beta, &densities, grids, mode);
        ctx.set_total(evaluator.work_units());
        evaluator.evaluate(ctx)
    });
    let outcome = handle.wait_with(show(&pb))?;
    pb.finish();

    match outcome {
        Outcome::Completed(grids) => Ok(grids),
        Outcome::Cancelled => bail!("grid evaluation was cancelled"),
    }
}

fn generate(
    settings: &Settings,
    grids: Vec<GridData>,
    slots: Vec<usize>,
) -> Result<(Vec<GridData>, Vec<Surface>)> {
    let generators: Vec<SurfaceGenerator> = settings
        .surfaces
        .iter()
        .cloned()
        .map(SurfaceGenerator::new)
        .collect();

    let pb = progress_bar("surfaces")?;
    let handle = task::spawn(0, move |ctx| {
        ctx.set_total(
            generators
                .iter()
                .zip(&slots)
                .map(|(generator, &slot)| generator.work_units(&grids[slot]))
                .sum(),
        );
        let surfaces = generators
            .iter()
            .zip(&slots)
            .map(|(generator, &slot)| generator.surface(&grids[slot], ctx))
            .collect::<isosurf::error::Result<Vec<Surface>>>()?;
        Ok((grids, surfaces))
    });
    let outcome = handle.wait_with(show(&pb))?;
    pb.finish();

    match outcome {
        Outcome::Completed(result) => Ok(result),
        Outcome::Cancelled => bail!("surface generation was cancelled"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = settings::load_config()?;
    println!("{}", settings);

    let start = Instant::now();
    let (grids, slots) = request_grids(&settings)?;
    let grids = evaluate(&settings, grids)?;
    let evaluated = Instant::now();
    let (grids, surfaces) = generate(&settings, grids, slots.clone())?;
    let generated = Instant::now();

    let stems = output::unique_stems(&settings.surfaces);
    let atoms = settings.cube_atoms();
    let mut summaries = Vec::new();
    for ((stem, surface), &slot) in stems.iter().zip(&surfaces).zip(&slots) {
        output::write_surface(&settings.output_dir, stem, surface, &grids[slot], &atoms)?;
        summaries.push(SurfaceSummary::new(stem, surface));
    }
    output::write_summary(&settings.output_dir, &summaries)?;

    println!("Results:");
    output::print_summary(&summaries);
    println!(
        "Time taken: {:.2?} (evaluation {:.2?}, surfaces {:.2?})",
        start.elapsed(),
        evaluated.duration_since(start),
        generated.duration_since(evaluated)
    );
    println!("Output written to {}", settings.output_dir.display());

    Ok(())
}
