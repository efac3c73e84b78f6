use anchor_drift::{AnchorConfig, AnchorRegion};
use anyhow::{anyhow, Context};
use clap::Parser;
use drift_harness::{profile_by_name, run_session, SessionConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments for the drift correction demo
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Anchor drift correction demonstration on a simulated scanner"
)]
struct Args {
    /// Drift profile (static, linear, step)
    #[arg(short, long, default_value = "linear")]
    profile: String,

    /// Drift velocity in px/s (linear) or jump in px (step), X component
    #[arg(long, default_value_t = 2.0, allow_hyphen_values = true)]
    drift_x: f64,

    /// Drift velocity in px/s (linear) or jump in px (step), Y component
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    drift_y: f64,

    /// Simulated time of the jump for the step profile, in seconds
    #[arg(long, default_value_t = 5.0)]
    step_at: f64,

    /// Number of scan/estimate checkpoints
    #[arg(short = 'n', long, default_value_t = 10)]
    checkpoints: usize,

    /// Simulated main-acquisition time between checkpoints, in seconds
    #[arg(short, long, default_value_t = 1.0)]
    interval: f64,

    /// Scan field size in pixels (square)
    #[arg(long, default_value_t = 256)]
    field: usize,

    /// Anchor region as x0,y0,x1,y1 in field fractions
    #[arg(long, value_delimiter = ',', default_values_t = [0.4, 0.4, 0.6, 0.6])]
    region: Vec<f64>,

    /// Anchor dwell time in microseconds
    #[arg(long, default_value_t = 1.0)]
    dwell_us: f64,

    /// Gaussian read noise in detector counts
    #[arg(long, default_value_t = 0.0)]
    noise: f64,

    /// Specimen and noise seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// JSON anchor configuration; overrides region and dwell time
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective anchor configuration to this JSON file
    #[arg(long)]
    save_config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let anchor = match &args.config {
        Some(path) => AnchorConfig::load_from_file(path)
            .with_context(|| format!("loading anchor config {}", path.display()))?,
        None => {
            let region = match args.region.as_slice() {
                [x0, y0, x1, y1] => AnchorRegion::new(*x0, *y0, *x1, *y1),
                other => return Err(anyhow!("region needs 4 values, got {}", other.len())),
            };
            AnchorConfig::new(region, Duration::from_secs_f64(args.dwell_us * 1e-6))
        }
    };
    if let Some(path) = &args.save_config {
        anchor
            .save_to_file(path)
            .with_context(|| format!("saving anchor config {}", path.display()))?;
    }

    let profile = profile_by_name(
        &args.profile,
        (args.drift_x, args.drift_y),
        Duration::from_secs_f64(args.step_at),
    )
    .ok_or_else(|| anyhow!("Unknown drift profile: {}", args.profile))?;

    println!("Anchor Drift Demo");
    println!("=================");
    println!("Profile: {} ({}, {})", args.profile, args.drift_x, args.drift_y);
    println!("Field: {0}x{0} px", args.field);
    println!("Anchor region: {:?}", anchor.region);
    println!("Checkpoints: {} every {} s", args.checkpoints, args.interval);
    println!();

    let results = run_session(SessionConfig {
        field_shape: (args.field, args.field),
        anchor,
        profile,
        checkpoints: args.checkpoints,
        interval: Duration::from_secs_f64(args.interval),
        seed: args.seed,
        read_noise: args.noise,
    })?;

    println!(
        "{:>4} {:>9} {:>18} {:>18} {:>16}",
        "#", "time (s)", "true (px)", "estimated (px)", "residual (px)"
    );
    for c in &results.checkpoints {
        println!(
            "{:>4} {:>9.3} {:>8.2} {:>8.2}  {:>8.2} {:>8.2}  {:>7.3} {:>7.3}",
            c.index,
            c.time.as_secs_f64(),
            c.true_drift.x,
            c.true_drift.y,
            c.estimated_drift.x,
            c.estimated_drift.y,
            c.residual.x,
            c.residual.y
        );
    }

    println!();
    println!("Max residual: {:.3} px", results.max_residual());
    println!("RMS residual: {:.3} px", results.rms_residual());
    println!("Advisories: {}", results.advisories.len());
    for advisory in &results.advisories {
        println!("  {advisory:?}");
    }
    if !results.errors.is_empty() {
        println!("Errors:");
        for error in &results.errors {
            println!("  {error}");
        }
    }

    Ok(())
}
