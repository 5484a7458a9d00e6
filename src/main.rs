//! Edgeweave CLI entrypoint.
//!
//! This is the main entrypoint for the edgeweave command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use edgeweave::cli::{Cli, Commands, OutputFormatter, StateCommands};
use edgeweave::config::{
    ConfigParser, ConfigValidator, DeployConfig, StateBackend, find_config_file,
};
use edgeweave::error::{EdgeweaveError, Result};
use edgeweave::graph::ResourceGraph;
use edgeweave::planner::Plan;
use edgeweave::provider;
use edgeweave::reconciler::Reconciler;
use edgeweave::state::{LocalStateStore, S3StateStore, STATE_DIR, StateStore};

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for an apply that finished with failed, blocked or cancelled actions.
const EXIT_APPLY_FAILED: u8 = 1;
/// Exit code for invalid configuration or graph.
const EXIT_INVALID: u8 = 2;
/// Exit code when the state is locked by another run.
const EXIT_CONFLICT: u8 = 3;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn exit_code_for(error: &EdgeweaveError) -> u8 {
    match error {
        EdgeweaveError::Config(_) | EdgeweaveError::Graph(_) | EdgeweaveError::Plan(_) => {
            EXIT_INVALID
        }
        e if e.is_conflict() => EXIT_CONFLICT,
        _ => EXIT_APPLY_FAILED,
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config_path, detailed, &formatter).await,
        Commands::Apply { yes, parallelism } => {
            cmd_apply(config_path, yes, parallelism, &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::Graph { dot } => cmd_graph(config_path, dot, &formatter),
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<ExitCode> {
    info!("Initializing new edgeweave project in: {}", path.display());

    let config_path = path.join("edgeweave.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(ExitCode::SUCCESS);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/edgeweave.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", state_entry.as_str()]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# edgeweave")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in the provider token");
    eprintln!("  2. Edit edgeweave.yaml with your resources");
    eprintln!("  3. Run 'edgeweave validate' to check the configuration");
    eprintln!("  4. Run 'edgeweave plan' to see what will change");
    eprintln!("  5. Run 'edgeweave apply' to apply it");

    Ok(ExitCode::SUCCESS)
}

/// Validate configuration and its dependency graph.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&result, show_warnings));
    if !result.is_valid() {
        return Ok(ExitCode::from(EXIT_INVALID));
    }

    let graph = ResourceGraph::build(&config.resources)?;
    let waves = graph.levels()?;
    eprintln!("\nConfiguration summary:");
    eprintln!("  Stack: {}", config.qualified_name());
    eprintln!("  Resources: {}", graph.len());
    eprintln!("  Dependencies: {}", graph.edge_count());
    eprintln!("  Waves: {}", waves.len());

    Ok(ExitCode::SUCCESS)
}

/// Show the plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let reconciler = load_reconciler(config_path).await?;
    let plan = reconciler.plan().await?;

    println!("{}", formatter.format_plan(&plan, detailed));

    if plan.passes_guardrails {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_INVALID))
    }
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let mut reconciler = load_reconciler(config_path).await?;
    if let Some(parallelism) = parallelism {
        reconciler = reconciler.with_parallelism(parallelism);
    }

    let plan = reconciler.plan().await?;
    if plan.is_empty() {
        eprintln!("{}", formatter.success("No changes to apply."));
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", formatter.format_plan(&plan, false));
    plan.enforce_guardrails()?;

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let result = reconciler.apply(cancel_on_ctrl_c()).await?;
    println!("{}", formatter.format_result(&result));

    Ok(ExitCode::from(u8::try_from(result.exit_code()).unwrap_or(EXIT_APPLY_FAILED)))
}

/// Destroy every resource in state.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, state_store) = load_config_and_state(config_path).await?;

    let Some(state) = state_store.load().await? else {
        eprintln!("No state found, nothing to destroy.");
        return Ok(ExitCode::SUCCESS);
    };
    if state.resource_count() == 0 {
        eprintln!("No resources to destroy.");
        return Ok(ExitCode::SUCCESS);
    }

    let plan = Plan::destroy(&state, config.guardrails.as_ref())?;
    println!("{}", formatter.format_plan(&plan, false));
    plan.enforce_guardrails()?;

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let provider = provider::from_config(&config.provider)?;
    let reconciler = Reconciler::new(config, state_store, provider);
    let result = reconciler.destroy(cancel_on_ctrl_c()).await?;
    println!("{}", formatter.format_result(&result));

    Ok(ExitCode::from(u8::try_from(result.exit_code()).unwrap_or(EXIT_APPLY_FAILED)))
}

/// Show the dependency graph.
fn cmd_graph(
    config_path: Option<&PathBuf>,
    dot: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, _) = load_config(config_path)?;
    let graph = ResourceGraph::build(&config.resources)?;

    if dot {
        println!("{}", graph.to_dot());
    } else {
        let waves = graph.levels()?;
        println!("{}", formatter.format_graph(&graph, &waves));
    }

    Ok(ExitCode::SUCCESS)
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (_config, state_store) = load_config_and_state(config_path).await?;

    match command {
        StateCommands::Show => {
            let lock = state_store.get_lock_info().await?;
            if let Some(state) = state_store.load().await? {
                println!("{}", formatter.format_state(&state, lock.as_ref()));
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                warn!("Forcing removal of the state lock");
                state_store.force_unlock().await?;
                eprintln!("{}", formatter.warning("State forcefully unlocked."));
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("{}", formatter.success("State unlocked."));
            } else {
                eprintln!("{}", formatter.error("Please provide --lock-id or use --force"));
                return Ok(ExitCode::from(EXIT_INVALID));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn config_dir(config_file: &Path) -> &Path {
    config_file.parent().unwrap_or_else(|| Path::new("."))
}

fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_dir(config_file))
}

/// Loads and validates the configuration.
fn load_config(config_path: Option<&PathBuf>) -> Result<(DeployConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok((config, config_file))
}

/// Loads configuration and creates the configured state store.
async fn load_config_and_state(
    config_path: Option<&PathBuf>,
) -> Result<(DeployConfig, Arc<dyn StateStore>)> {
    let (config, config_file) = load_config(config_path)?;

    let state_store: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config.state.path.as_ref().map_or_else(
                || config_dir(&config_file).join(STATE_DIR),
                PathBuf::from,
            );
            Arc::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| EdgeweaveError::internal("S3 bucket not configured"))?;
            let prefix = config.state.prefix.as_deref();
            let region = config.state.region.as_deref();
            Arc::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    };

    Ok((config, state_store))
}

/// Loads configuration, state store and provider into a reconciler.
async fn load_reconciler(config_path: Option<&PathBuf>) -> Result<Reconciler> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let provider = provider::from_config(&config.provider)?;
    Ok(Reconciler::new(config, state_store, provider))
}

/// Asks for confirmation on stderr; true if the answer matches `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Returns a flag that turns `true` on the first Ctrl-C.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight actions");
            let _ = tx.send(true);
            // Keep the sender alive so the flag stays readable.
            tx.closed().await;
        }
    });
    rx
}
