use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use headway_build::config::{Config, Overrides};
use headway_build::logging;
use headway_build::pipeline::Pipeline;
use headway_build::task::{Halt, Runner};
use headway_build::ui::{self, PlainSurface, TerminalSurface};

#[derive(Parser)]
#[command(name = "headway-build")]
#[command(about = "Download map data and build tiles for a Headway deployment", long_about = None)]
struct Cli {
    /// Directory downloads and build outputs are written to.
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Area to build, as named by the extract provider (e.g. Seattle).
    #[arg(short, long)]
    area: Option<String>,

    #[arg(short, long)]
    country: Option<String>,

    /// Config file to read instead of ./.headway-build.yaml.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    // Ensure terminal is restored on panic.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = ui::restore_terminal();
        original_hook(info);
    }));

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        // The runner already printed the task's summary line.
        Err(err) if err.downcast_ref::<Halt>().is_some() => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("⚠️  {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("error reading working directory")?;
    let mut config = match &cli.config {
        Some(path) => Config::load_path(path)?,
        None => Config::load(&cwd)?,
    };
    config.apply(Overrides {
        data_dir: cli.data_dir,
        area: cli.area,
        country: cli.country,
    });
    config.validate()?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("error creating data directory {}", config.data_dir.display()))?;
    logging::init(&config.log_path())?;

    let pipeline = Pipeline::new(config, cwd);
    if io::stdout().is_terminal() {
        let mut runner = Runner::new(TerminalSurface::new()?);
        pipeline.run(&mut runner)?;
    } else {
        let mut runner = Runner::new(PlainSurface::new(io::stdout()));
        pipeline.run(&mut runner)?;
    }
    Ok(())
}
