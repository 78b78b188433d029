use anyhow::{Context, Result};
use clap::Parser;
use cost_calibrator::cli::{Cli, OutputFormat};
use cost_calibrator::config::CalibrationConfig;
use cost_calibrator::controller::ProcessController;
use cost_calibrator::mongosh::MongoShell;
use cost_calibrator::populate::CommandPopulator;
use cost_calibrator::{interrupt, protocol, report};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber; the run log goes to stderr
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Cli) -> Result<CalibrationConfig> {
    let mut config = match &args.config {
        Some(path) => CalibrationConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CalibrationConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = load_config(&args)?;
    interrupt::install().context("Failed to install signal handlers")?;

    let client = Arc::new(MongoShell::new(
        config.engine.shell_bin.clone(),
        "127.0.0.1",
        config.engine.port,
    ));
    let mut controller = ProcessController::new(config.engine.clone(), client);

    let coefficients = protocol::run_calibration(&mut controller, &CommandPopulator, &config)?;

    match args.format {
        OutputFormat::Text => print!("{}", report::render_text(&coefficients)),
        OutputFormat::Json => println!("{}", report::render_json(&coefficients)?),
    }
    eprintln!("DONE!");
    Ok(())
}
