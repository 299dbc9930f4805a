// cellwork CLI - evaluate, inspect and watch reactive cell models (headless)

mod builtins;
mod exit_codes;
mod model;
mod watch;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use cellwork_config::Settings;
use cellwork_engine::{EngineError, Reactive, ReactiveOptions};
use clap::{ArgAction, Parser, Subcommand};

use exit_codes::{engine_exit_code, EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE};
use model::{parse_literal, Loaded, Model};

#[derive(Parser)]
#[command(name = "cellwork")]
#[command(about = "Reactive cell models: evaluate, inspect and watch (headless)")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Settings file (default: <config dir>/cellwork/settings.json)
    #[arg(long, global = true, env = "CELLWORK_CONFIG")]
    config: Option<PathBuf>,

    /// More logging: -v info, -vv debug, -vvv trace (overrides RUST_LOG)
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate cells of a model and print their values
    #[command(after_help = "\
Examples:
  cellwork eval model.toml
  cellwork eval model.toml total --set price=12.5 --json
  cellwork eval model.toml --eager --stats")]
    Eval {
        /// Model file (TOML)
        model: PathBuf,

        /// Cells to print (default: all, sorted by name)
        cells: Vec<String>,

        /// Override a cell before evaluating: NAME=VALUE (repeatable)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        sets: Vec<String>,

        /// Output as a JSON object
        #[arg(long)]
        json: bool,

        /// Recompute on write instead of on read
        #[arg(long)]
        eager: bool,

        /// Do not keep computed values between reads
        #[arg(long)]
        no_cache: bool,

        /// Print cache statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Show each cell's kind, precedents, dependents and depth
    Graph {
        /// Model file (TOML)
        model: PathBuf,

        /// Output as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Re-evaluate cells whenever a file source changes
    Watch {
        /// Model file (TOML)
        model: PathBuf,

        /// Cells to print after each change
        #[arg(required = true)]
        cells: Vec<String>,

        /// Polling interval in milliseconds (default: watch.intervalMs setting)
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many updates
        #[arg(long)]
        max_updates: Option<usize>,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("CELLWORK_COMMIT"), ")",
        "\nengine:  cellwork-engine ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("CELLWORK_TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = load_settings(cli.config.as_deref()).and_then(|settings| {
        init_logging(cli.verbose, &settings);
        match cli.command {
            Commands::Eval {
                model,
                cells,
                sets,
                json,
                eager,
                no_cache,
                stats,
            } => cmd_eval(&settings, model, cells, sets, json, eager, no_cache, stats),
            Commands::Graph { model, json } => cmd_graph(model, json),
            Commands::Watch {
                model,
                cells,
                interval,
                max_updates,
            } => cmd_watch(&settings, model, cells, interval, max_updates),
        }
    });

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, CliError> {
    match path {
        Some(path) if !path.exists() => Err(CliError::args(format!(
            "settings file not found: {}",
            path.display()
        ))),
        Some(path) => Ok(Settings::load_from(path)),
        None => Ok(Settings::load()),
    }
}

/// Level precedence: -v flags, then RUST_LOG, then the `log.level` setting.
fn init_logging(verbose: u8, settings: &Settings) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log_level.as_str()),
    );
    builder.format_timestamp(None);
    match verbose {
        0 => {}
        1 => {
            builder.filter_level(log::LevelFilter::Info);
        }
        2 => {
            builder.filter_level(log::LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
        }
    }
    builder.init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    /// Create error from an engine error with its registered exit code.
    pub fn engine(err: EngineError) -> Self {
        let hint = match &err {
            EngineError::UnknownCell(name) => Some(format!(
                "define '{}' in the model or pass --set {}=VALUE",
                name, name
            )),
            EngineError::CyclicDependency(_) => {
                Some("a cell cannot depend on itself, directly or through others".to_string())
            }
            _ => None,
        };
        Self { code: engine_exit_code(&err), message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

fn load_model(path: &Path, options: ReactiveOptions) -> Result<Loaded, CliError> {
    let model = Model::load(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    model.build(base_dir, options)
}

// ============================================================================
// eval
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn cmd_eval(
    settings: &Settings,
    model: PathBuf,
    cells: Vec<String>,
    sets: Vec<String>,
    json: bool,
    eager: bool,
    no_cache: bool,
    stats: bool,
) -> Result<(), CliError> {
    let mut options = settings.engine_options();
    if eager {
        options.lazy_eval = false;
    }
    if no_cache {
        options.use_cache = false;
    }

    let Loaded { mut env, .. } = load_model(&model, options)?;

    for assignment in &sets {
        let (name, value) = assignment.split_once('=').ok_or_else(|| {
            CliError::args(format!("--set expects NAME=VALUE, got '{}'", assignment))
        })?;
        let report = env
            .set(name.trim(), parse_literal(value))
            .map_err(CliError::engine)?;
        log::info!("--set {}: {}", name.trim(), report.summary());
    }

    let names = if cells.is_empty() { env.names() } else { cells };
    let mut values = Vec::with_capacity(names.len());
    for name in names {
        let value = env.get(&name).map_err(CliError::engine)?;
        values.push((name, value));
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let object: serde_json::Map<String, serde_json::Value> = values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        let text = serde_json::to_string_pretty(&object).map_err(|e| CliError::io(e.to_string()))?;
        writeln!(out, "{}", text).map_err(|e| CliError::io(e.to_string()))?;
    } else {
        for (name, value) in &values {
            writeln!(out, "{} = {}", name, value).map_err(|e| CliError::io(e.to_string()))?;
        }
    }

    if stats {
        let stats = env.stats();
        eprintln!(
            "stats: cache_hits={} recomputes={} failures={}",
            stats.cache_hits, stats.recomputes, stats.failures
        );
    }

    Ok(())
}

// ============================================================================
// graph
// ============================================================================

#[derive(serde::Serialize)]
struct GraphEntry {
    name: String,
    kind: &'static str,
    precedents: Vec<String>,
    dependents: Vec<String>,
    depth: usize,
}

fn cmd_graph(model: PathBuf, json: bool) -> Result<(), CliError> {
    // Structure only: nothing is evaluated.
    let options = ReactiveOptions { lazy_eval: true, use_cache: true };
    let Loaded { env, sources } = load_model(&model, options)?;

    let entries: Vec<GraphEntry> = env
        .names_in_order()
        .into_iter()
        .map(|name| {
            let kind = if sources.iter().any(|(source, _)| *source == name) {
                "source"
            } else if env.is_derived(&name) == Some(true) {
                "derived"
            } else {
                "static"
            };
            GraphEntry {
                kind,
                precedents: env.precedents(&name),
                dependents: env.dependents(&name),
                depth: env.graph().depth(&name),
                name,
            }
        })
        .collect();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let text = serde_json::to_string_pretty(&entries).map_err(|e| CliError::io(e.to_string()))?;
        writeln!(out, "{}", text).map_err(|e| CliError::io(e.to_string()))?;
        return Ok(());
    }

    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    for entry in &entries {
        writeln!(
            out,
            "{:<width$}  {:<7}  depth={}  reads=[{}]  read_by=[{}]",
            entry.name,
            entry.kind,
            entry.depth,
            entry.precedents.join(", "),
            entry.dependents.join(", "),
            width = width
        )
        .map_err(|e| CliError::io(e.to_string()))?;
    }
    Ok(())
}

// ============================================================================
// watch
// ============================================================================

fn cmd_watch(
    settings: &Settings,
    model: PathBuf,
    cells: Vec<String>,
    interval: Option<u64>,
    max_updates: Option<usize>,
) -> Result<(), CliError> {
    let Loaded { mut env, sources } = load_model(&model, settings.engine_options())?;
    if sources.is_empty() {
        return Err(CliError::args("model has no [sources] to watch")
            .with_hint("add e.g. [sources.notes] with file = \"notes.txt\""));
    }
    for name in &cells {
        if !env.contains(name) {
            return Err(CliError::engine(EngineError::UnknownCell(name.clone())));
        }
    }

    let interval = Duration::from_millis(interval.unwrap_or(settings.watch_interval_ms));
    log::info!(
        "watching {} source(s) every {}ms",
        sources.len(),
        interval.as_millis()
    );

    print_snapshot(&mut env, &cells);
    watch::run(&mut env, &sources, interval, max_updates, |env| {
        println!();
        print_snapshot(env, &cells);
    });
    Ok(())
}

/// One line per cell; failures are printed in place so watching continues.
fn print_snapshot(env: &mut Reactive, cells: &[String]) {
    for name in cells {
        match env.get(name) {
            Ok(value) => println!("{} = {}", name, value),
            Err(e) => println!("{}: error: {}", name, e),
        }
    }
    let _ = io::stdout().flush();
}
