use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzalign::{
    AlignmentOutcome, FeatureTable, FeatureTableRow, IonAnnotation, ModelFamily, MzTolerance,
    RansacAligner, RansacAlignerSettings, RtTolerance,
};

/// Align two synthetic runs with a known retention time drift and print
/// the merged feature table.
#[derive(Parser)]
struct App {
    /// Rows per synthetic run
    #[arg(short, long, default_value_t = 25)]
    rows: usize,

    /// Multiplicative drift applied to the second run's retention times
    #[arg(short = 'd', long, default_value_t = 1.01)]
    drift: f64,

    /// Seed for the consensus sampling
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Fit a quadratic correction instead of a linear one
    #[arg(short, long)]
    quadratic: bool,
}

fn configure_log() {
    let subscriber = tracing_subscriber::registry().with(
        fmt::layer().compact().with_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        ),
    );
    subscriber.init();
}

fn synthetic_run(name: &str, rows: usize, scale: f64, offset: f64) -> FeatureTable {
    let mut table = FeatureTable::new(name);
    for i in 0..rows {
        let mz = 400.0 + i as f64 * 17.3;
        let rt = 3.0 + i as f64 * 0.45;
        let mut row = FeatureTableRow::new(i as u32, mz, (rt * scale + offset) as f32);
        if i % 5 == 0 {
            row.annotations
                .push(IonAnnotation::new(format!("analyte {i} ({name})")));
        }
        table.push_row(row);
    }
    table
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    configure_log();
    let app = App::parse();

    let reference = synthetic_run("run 1", app.rows, 1.0, 0.0);
    let drifted = synthetic_run("run 2", app.rows, app.drift, 0.05);

    let family = if app.quadratic {
        ModelFamily::Quadratic
    } else {
        ModelFamily::Linear
    };
    let settings = RansacAlignerSettings::new(
        MzTolerance::new(0.01, 10.0),
        RtTolerance::new(0.25, false),
        "aligned demo table",
        0.3,
    )
    .model_family(family)
    .seed(app.seed);

    let aligner = RansacAligner::new(settings)?;
    let handle = aligner.handle();
    match aligner.align(&[reference, drifted])? {
        AlignmentOutcome::Finished(table) => {
            info!(
                rows = table.len(),
                progress = handle.progress().unwrap_or_default(),
                "alignment finished"
            );
            for row in table.rows() {
                let labels = row
                    .annotations
                    .iter()
                    .map(|a| a.description.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                println!(
                    "{:>4}  mz={:9.4}  rt={:7.3}  {labels}",
                    row.id, row.mz, row.rt
                );
            }
        }
        AlignmentOutcome::Canceled => info!("alignment canceled"),
    }
    Ok(())
}
