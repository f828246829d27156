use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tickwork_runtime::RuntimeConfig;
use tracing::{info, warn};

mod console;
mod host;
mod logging;
mod script;

use host::{Runtime, ScriptInstance};

const DEMO_SCRIPT: &str = include_str!("../scripts/patrol.tick");

#[derive(Parser)]
#[command(version, about = "Run tick-driven scripts with an interactive debugger", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-d for debug, -dd for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Runtime config file (default: <config dir>/tickwork/runtime.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write logs to <data dir>/tickwork/logs
    #[arg(long)]
    log_file: bool,

    /// Write the default config file and exit
    #[arg(long)]
    init_config: bool,

    /// Milliseconds between simulation steps
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    /// Stop after this many steps even if scripts are still running
    #[arg(long)]
    max_steps: Option<u64>,

    /// Pause at SCRIPT:LINE; enables the debugger console
    #[arg(short, long = "break", value_name = "SCRIPT:LINE")]
    breakpoints: Vec<String>,

    /// Script files to run; runs a built-in demo when empty
    scripts: Vec<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    if let Some(path) = path {
        return Ok(RuntimeConfig::load(path)?);
    }
    match RuntimeConfig::config_path() {
        Ok(default_path) if default_path.exists() => Ok(RuntimeConfig::load(&default_path)?),
        Ok(_) => {
            info!("No config file found, using defaults");
            Ok(RuntimeConfig::default())
        }
        Err(e) => {
            warn!("{}, using defaults", e);
            Ok(RuntimeConfig::default())
        }
    }
}

fn load_scripts(rt: &Runtime, paths: &[PathBuf]) -> Result<Vec<ScriptInstance>> {
    if paths.is_empty() {
        return Ok(vec![ScriptInstance::from_source(rt, "patrol", DEMO_SCRIPT)?]);
    }
    paths
        .iter()
        .map(|path| ScriptInstance::from_file(rt, path))
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init_logging(cli.debug, cli.log_file)?;

    if cli.init_config {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => RuntimeConfig::config_path()?,
        };
        RuntimeConfig::default().save(&path)?;
        eprintln!("Config file created at: {}", path.display());
        return Ok(());
    }

    let mut config = load_config(cli.config.as_deref())?;
    if !cli.breakpoints.is_empty() {
        config.debugger.enabled = true;
    }

    // The runtime binds this thread as the simulation thread
    let rt: Runtime = Runtime::new(config).context("failed to start runtime")?;

    for location in &cli.breakpoints {
        let (script_id, line) = console::parse_location(location)?;
        rt.debugger().add_breakpoint(script_id, line, None);
    }
    if rt.debugger().is_enabled() {
        console::spawn(rt.debugger().clone())?;
        eprintln!("Debugger enabled, type `help` at a pause for commands");
    }

    let mut scripts = load_scripts(&rt, &cli.scripts)?;
    let tick = Duration::from_millis(cli.tick_ms);
    let mut step: u64 = 0;

    info!("Running {} script(s)", scripts.len());
    loop {
        if scripts.iter().all(ScriptInstance::is_done)
            && rt.bridge().pending_count() == 0
            && rt.executor().active_count() == 0
        {
            break;
        }
        if cli.max_steps.is_some_and(|max| step >= max) {
            warn!("Stopping after {} steps with scripts still running", step);
            break;
        }

        rt.step(|| {
            for script in scripts.iter_mut() {
                script.run(&rt);
            }
        })?;
        step += 1;
        thread::sleep(tick);
    }

    for script in scripts {
        rt.contexts().release(script.into_context());
    }
    info!(
        "Finished after {} steps (cache hits: {}, misses: {})",
        step,
        rt.cache().hits(),
        rt.cache().misses()
    );
    rt.shutdown();
    Ok(())
}
