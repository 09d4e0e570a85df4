//! Command-line entry point for one incremental dielectric build.
//!
//! # Responsibility
//! - Map CLI options onto `BuildConfig`.
//! - Initialize logging, open the store, run the builder, print a summary.
//!
//! Exit codes: 0 on success (even with per-material failures), 1 when the
//! run could not complete.

use clap::Parser;
use dielectric_core::db::open_db;
use dielectric_core::{
    core_version, default_log_level, init_logging, BuildConfig, BuildLogContext, BuildReport,
    DielectricBuilder, SqliteDielectricRepository, SqliteMaterialRepository,
    SqliteTaskRepository, BUILDER_NAME, DEFAULT_BAND_GAP_THRESHOLD,
};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "dielectric-build",
    version,
    about = "Derive dielectric and piezoelectric properties for materials changed since the last build"
)]
struct Args {
    /// SQLite database holding materials, tasks and derived records.
    #[arg(long)]
    db: PathBuf,

    /// Absolute directory for rolling log files. Logging is off when unset.
    #[arg(long)]
    log_dir: Option<String>,

    /// trace|debug|info|warn|error (defaults by build mode).
    #[arg(long)]
    log_level: Option<String>,

    /// Materials computed concurrently.
    #[arg(long, default_value_t = 1)]
    parallelism: usize,

    /// Materials with a band gap at or below this value (eV) are skipped.
    #[arg(long, default_value_t = DEFAULT_BAND_GAP_THRESHOLD)]
    band_gap_threshold: f64,

    /// Site-matching tolerance for symmetry analysis, in Angstrom.
    #[arg(long, default_value_t = 0.01)]
    symprec: f64,

    /// Restrict the build to this material id (repeatable).
    #[arg(long = "material")]
    materials: Vec<String>,
}

impl Args {
    fn build_config(&self) -> BuildConfig {
        BuildConfig {
            band_gap_threshold: self.band_gap_threshold,
            symprec: self.symprec,
            parallelism: self.parallelism,
            material_ids: (!self.materials.is_empty()).then(|| self.materials.clone()),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(log_dir) = args.log_dir.as_deref() {
        let level = args.log_level.as_deref().unwrap_or(default_log_level());
        if let Err(message) = init_logging(level, log_dir) {
            eprintln!("logging disabled: {message}");
        }
    }

    match run(&args) {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(message) => {
            error!("event=cli_exit module=cli status=error error={message}");
            eprintln!("dielectric-build failed: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<BuildReport, String> {
    let conn = open_db(&args.db).map_err(|err| format!("cannot open `{}`: {err}", args.db.display()))?;
    let builder = DielectricBuilder::new(
        SqliteMaterialRepository::new(&conn),
        SqliteTaskRepository::new(&conn),
        SqliteDielectricRepository::new(&conn),
        args.build_config(),
    );
    builder
        .run(BuildLogContext::start(BUILDER_NAME))
        .map_err(|err| err.to_string())
}

fn print_report(report: &BuildReport) {
    println!("dielectric_core version={}", core_version());
    println!("run_id={}", report.run_id);
    println!("candidates={}", report.candidates);
    println!("upserted={}", report.upserted.len());
    println!("skipped={}", report.skipped.len());
    println!("piezo_omitted={}", report.piezo_omitted.len());
    println!("failed={}", report.failures.len());
    for failure in &report.failures {
        println!(
            "failure material_id={} task_id={} error={}",
            failure.material_id,
            failure.task_id.as_deref().unwrap_or("-"),
            failure.message
        );
    }
}
