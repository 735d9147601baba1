use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Instant;

use pyty::config::{self, Config, ServerConfig};
use pyty::diagnostic::ToolDiagnostic;
use pyty::discover;
use pyty::dispatch;
use pyty::output::{self, Format, Summary};
use pyty::request::{Request, Response};
use pyty::server::Server;
use pyty::state::ServerState;

#[derive(Parser)]
#[command(name = "pyty", version, about = "Incremental type-analysis server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis server
    Serve(ServeArgs),

    /// Type-check a source tree once and exit
    Check(CheckArgs),

    /// Manage pyty configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the resolved configuration
    Print(ConfigPrintArgs),

    /// Print the JSON Schema for pyty.json config files
    Schema,
}

#[derive(clap::Args)]
struct ConfigPrintArgs {
    /// Path to config file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Root of the source tree (defaults to the config file's directory)
    #[arg(short = 'r', long)]
    root: Option<PathBuf>,

    /// Port to listen on
    #[arg(short = 'p', long, default_value = "9175")]
    port: u16,

    /// Path to config file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log to this file instead of stderr (also feeds rage reports)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// File paths to check (defaults to everything discovered under the root)
    files: Vec<PathBuf>,

    /// Root of the source tree
    #[arg(short = 'r', long)]
    root: Option<PathBuf>,

    /// Path to config file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "human")]
    format: Format,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_serve(args),
        Commands::Check(args) => run_check(args),
        Commands::Config { command } => match command {
            ConfigCommands::Print(args) => run_config_print(args),
            ConfigCommands::Schema => run_config_schema(),
        },
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "pyty", &mut std::io::stdout());
            ExitCode::SUCCESS
        }
    }
}

fn tool_error(message: String) -> ExitCode {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{:?}", miette::Report::new(ToolDiagnostic::error(message)));
    ExitCode::from(2)
}

fn init_tracing(log_file: Option<&Path>, default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    match log_file.and_then(|path| {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).ok()?;
        }
        std::fs::File::options().create(true).append(true).open(path).ok()
    }) {
        Some(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
                .ok();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .ok();
        }
    }
}

/// Resolve configuration for a command: explicit `--config` is a hard
/// error on failure, auto-discovery falls back to defaults when absent.
fn resolve_config(
    explicit: &Option<PathBuf>,
    root: &Option<PathBuf>,
    log_file: Option<PathBuf>,
) -> Result<ServerConfig, String> {
    let cwd = std::env::current_dir().map_err(|e| format!("cannot determine current directory: {e}"))?;
    let start = root.clone().unwrap_or_else(|| cwd.clone());
    let (config, config_dir) = if let Some(path) = explicit {
        let config = Config::load(path).map_err(|e| format!("failed to load config: {e}"))?;
        let abs = if path.is_absolute() { path.clone() } else { cwd.join(path) };
        let dir = abs.parent().unwrap_or(&cwd).to_path_buf();
        (config, dir)
    } else {
        match config::find_config_file(&start) {
            Some(path) => {
                let config =
                    Config::load(&path).map_err(|e| format!("failed to load config: {e}"))?;
                let dir = path.parent().unwrap_or(&cwd).to_path_buf();
                (config, dir)
            }
            None => (Config::default_config(), start.clone()),
        }
    };
    let mut resolved = ServerConfig::resolve(&config, &config_dir, log_file);
    if let Some(root) = root {
        let root = if root.is_absolute() { root.clone() } else { cwd.join(root) };
        resolved.source_root = std::fs::canonicalize(&root).unwrap_or(root);
    }
    Ok(resolved)
}

fn run_serve(args: ServeArgs) -> ExitCode {
    let log_file = args.log_file.clone().or_else(config::default_log_file);
    init_tracing(log_file.as_deref(), "info");

    let server_config = match resolve_config(&args.config, &args.root, log_file) {
        Ok(config) => config,
        Err(message) => return tool_error(message),
    };

    let mut state = match ServerState::new(&server_config) {
        Ok(state) => state,
        Err(e) => return tool_error(format!("failed to build worker pool: {e}")),
    };

    let (files, warnings) =
        match discover::discover_files(&server_config.source_root, &server_config.files) {
            Ok(result) => result,
            Err(e) => return tool_error(format!("failed to discover files: {e}")),
        };
    for warning in warnings {
        tracing::warn!("{warning}");
    }
    tracing::info!(files = files.len(), root = %server_config.source_root.display(), "initial check");
    let initial = Request::TypeCheck { update_environment_with: files.clone(), check: files };
    if let Err(e) = dispatch::process(&mut state, &server_config, initial) {
        return tool_error(format!("initial check failed: {e}"));
    }

    let server = match Server::bind(args.port) {
        Ok(server) => server,
        Err(e) => return tool_error(format!("failed to bind port {}: {e}", args.port)),
    };
    match server.run(state, &server_config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => tool_error(format!("server failed: {e}")),
    }
}

fn run_check(args: CheckArgs) -> ExitCode {
    init_tracing(None, "warn");
    let start = Instant::now();

    let server_config = match resolve_config(&args.config, &args.root, None) {
        Ok(config) => config,
        Err(message) => return tool_error(message),
    };

    let mut state = match ServerState::new(&server_config) {
        Ok(state) => state,
        Err(e) => return tool_error(format!("failed to build worker pool: {e}")),
    };

    let files = if args.files.is_empty() {
        match discover::discover_files(&server_config.source_root, &server_config.files) {
            Ok((files, warnings)) => {
                for warning in warnings {
                    tracing::warn!("{warning}");
                }
                files
            }
            Err(e) => return tool_error(format!("failed to discover files: {e}")),
        }
    } else {
        args.files.clone()
    };

    if files.is_empty() {
        if args.format == Format::Human {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(
                stderr,
                "{:?}",
                miette::Report::new(ToolDiagnostic::warning("no files to check".to_string()))
            );
        }
        return ExitCode::SUCCESS;
    }

    let request = Request::TypeCheck { update_environment_with: files.clone(), check: files };
    let errors = match dispatch::process(&mut state, &server_config, request) {
        Ok(Some(Response::TypeCheck { errors })) => errors,
        Ok(_) => BTreeMap::new(),
        Err(e) => return tool_error(format!("check failed: {e}")),
    };

    let files_with_errors = errors.values().filter(|list| !list.is_empty()).count();
    let total_errors: usize = errors.values().map(Vec::len).sum();
    let summary = Summary {
        checked_files: errors.len(),
        clean_files: errors.len() - files_with_errors,
        files_with_errors,
        total_errors,
        duration: start.elapsed(),
        jobs: server_config.jobs,
    };

    match args.format {
        Format::Human => {
            let sources: BTreeMap<String, String> = errors
                .keys()
                .map(|path| {
                    let text = std::fs::read_to_string(server_config.source_root.join(path))
                        .unwrap_or_default();
                    (path.clone(), text)
                })
                .collect();
            let mut stderr = std::io::stderr().lock();
            output::render_human(&errors, &summary, &sources, &mut stderr);
        }
        Format::Json => {
            let mut stdout = std::io::stdout().lock();
            output::render_json(&errors, &summary, &mut stdout);
        }
    }

    if total_errors > 0 { ExitCode::from(1) } else { ExitCode::SUCCESS }
}

fn run_config_print(args: ConfigPrintArgs) -> ExitCode {
    let config = if let Some(path) = &args.config {
        match Config::load(path) {
            Ok(config) => config,
            Err(e) => return tool_error(format!("failed to load config: {e}")),
        }
    } else {
        let cwd = match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => return tool_error(format!("cannot determine current directory: {e}")),
        };
        match config::find_config_file(&cwd) {
            Some(path) => match Config::load(&path) {
                Ok(config) => config,
                Err(e) => return tool_error(format!("failed to load config: {e}")),
            },
            None => Config::default_config(),
        }
    };
    println!("{}", serde_json::to_string_pretty(&config).unwrap());
    ExitCode::SUCCESS
}

fn run_config_schema() -> ExitCode {
    let schema = schemars::schema_for!(Config);
    println!("{}", serde_json::to_string_pretty(&schema).unwrap());
    ExitCode::SUCCESS
}
