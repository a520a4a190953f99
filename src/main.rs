//! stackplan CLI entrypoint.
//!
//! This is the main entrypoint for the stackplan command-line tool.

use std::error::Error as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use stackplan::catalog::Catalog;
use stackplan::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use stackplan::config::{
    ConfigParser, ConfigValidator, StackConfig, StateBackend, find_config_file,
};
use stackplan::engine::{Engine, build_graph, graph_nodes};
use stackplan::error::{ConfigError, Result, StackError};
use stackplan::planner::Plan;
use stackplan::provider::build_provisioner;
use stackplan::state::{
    LocalStateStore, S3StateStore, STATE_DIR, StateSnapshot, StateStore, generate_holder_id,
};

use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Prints an error and its causes.
fn report_error(err: &StackError) {
    let message = err.to_string();
    eprintln!("{} {message}", "Error:".red().bold());

    let mut source = err.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            eprintln!("  caused by: {cause_message}");
        }
        source = cause.source();
    }

    if let StackError::Execution(execution) = err {
        let snapshot = execution.snapshot();
        eprintln!(
            "  state was saved at serial {} with {} recorded resource(s)",
            snapshot.serial,
            snapshot.resources.len()
        );
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan { refresh, out } => {
            cmd_plan(config_path, refresh, out.as_deref(), &formatter).await
        }
        Commands::Apply { yes, plan } => {
            cmd_apply(config_path, yes, plan.as_deref(), &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::Drift => cmd_drift(config_path, &formatter).await,
        Commands::Outputs => cmd_outputs(config_path, &formatter).await,
        Commands::Graph => cmd_graph(config_path, &formatter),
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Writes a starter stack file.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new stack in: {}", path.display());

    let config_path = path.join("stackplan.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Stack file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/stackplan.yaml"))?;
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
            writeln!(file, "\n# stackplan")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set STACKPLAN_API_TOKEN");
    eprintln!("  2. Edit stackplan.yaml with your domain and bucket names");
    eprintln!("  3. Run 'stackplan validate' to check the stack file");
    eprintln!("  4. Run 'stackplan plan' to see what will be created");
    eprintln!("  5. Run 'stackplan apply' to create it");

    Ok(())
}

/// Validates the stack file and its graph.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, _) = read_stack(config_path)?;

    let result = ConfigValidator::new().check(&config);
    emit(&formatter.format_validation(&config, &result, show_warnings))?;
    if let Some(first) = result.errors.first() {
        return Err(ConfigError::validation(&first.message, &first.field).into());
    }

    let graph = build_graph(&config, &Catalog::builtin())?;
    info!(resources = graph.len(), edges = graph.edges().len(), "Resource graph is acyclic");
    Ok(())
}

/// Shows the change plan.
async fn cmd_plan(
    config_path: Option<&Path>,
    refresh: bool,
    out: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_stack(config_path)?;
    let store = build_state_store(&config, &base_dir).await?;
    let provisioner = build_provisioner(&config)?;
    let engine = Engine::new(&config, store.as_ref(), provisioner.as_ref());

    let plan = engine.plan(refresh).await?;
    emit(&formatter.format_plan(&plan))?;

    if let Some(path) = out {
        plan.save(path)?;
        eprintln!("Saved plan to {}", path.display());
    }

    Ok(())
}

/// Applies the change plan.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    plan_file: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_stack(config_path)?;
    let store = build_state_store(&config, &base_dir).await?;
    let provisioner = build_provisioner(&config)?;
    let engine = Engine::new(&config, store.as_ref(), provisioner.as_ref());

    let plan = match plan_file {
        Some(path) => {
            debug!("Loading saved plan from: {}", path.display());
            Plan::load(path)?
        }
        None => engine.plan(false).await?,
    };

    if plan.has_changes() {
        eprintln!("{}", formatter.format_plan(&plan));
        if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let report = engine.apply(Some(plan), Some(interrupt_signal())).await?;
    emit(&formatter.format_apply(&report))
}

/// Destroys every recorded resource.
async fn cmd_destroy(
    config_path: Option<&Path>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_stack(config_path)?;
    let store = build_state_store(&config, &base_dir).await?;
    let provisioner = build_provisioner(&config)?;
    let engine = Engine::new(&config, store.as_ref(), provisioner.as_ref());

    let plan = engine.plan_destroy().await?;
    if !plan.has_changes() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    eprintln!("{}", formatter.format_plan(&plan));
    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let report = engine.destroy(Some(interrupt_signal())).await?;
    emit(&formatter.format_apply(&report))
}

/// Reports drift without changing state.
async fn cmd_drift(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (config, base_dir) = load_stack(config_path)?;
    let store = build_state_store(&config, &base_dir).await?;
    let provisioner = build_provisioner(&config)?;
    let engine = Engine::new(&config, store.as_ref(), provisioner.as_ref());

    let report = engine.check_drift().await?;
    emit(&formatter.format_drift(&report))
}

/// Shows recorded stack outputs.
async fn cmd_outputs(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (config, base_dir) = load_stack(config_path)?;
    let store = build_state_store(&config, &base_dir).await?;

    let outputs = store
        .load()
        .await?
        .map(|state| state.outputs)
        .unwrap_or_default();
    emit(&formatter.format_outputs(&outputs))
}

/// Shows resources in dependency order.
fn cmd_graph(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (config, _) = load_stack(config_path)?;
    let graph = build_graph(&config, &Catalog::builtin())?;
    emit(&formatter.format_graph(&graph_nodes(&graph)))
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_stack(config_path)?;
    let store = build_state_store(&config, &base_dir).await?;

    match command {
        StateCommands::Show => {
            let state = store.load().await?.unwrap_or_else(|| {
                StateSnapshot::new(&config.project.name, &config.project.environment)
            });
            emit(&formatter.format_state(&state))?;
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder, "manual").await?;
            emit(&formatter.format_lock(&lock))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                warn!("State lock removed regardless of holder");
                emit(&formatter.success("State forcefully unlocked."))?;
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                emit(&formatter.success("State unlocked."))?;
            } else {
                eprintln!("{}", formatter.warning("Please provide --lock-id or use --force"));
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text.trim_end())?;
    Ok(())
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Flips to `true` on the first Ctrl-C.
fn interrupt_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for in-flight operations to finish");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Resolves the stack file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Parses the stack file with `.env` and environment overrides applied.
fn read_stack(config_path: Option<&Path>) -> Result<(StackConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading stack file from: {}", config_file.display());

    let base_dir = config_file
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let parser = ConfigParser::new().with_base_path(&base_dir);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    Ok((config, base_dir))
}

/// Parses and validates the stack file.
fn load_stack(config_path: Option<&Path>) -> Result<(StackConfig, PathBuf)> {
    let (config, base_dir) = read_stack(config_path)?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }
    Ok((config, base_dir))
}

/// Creates the state store selected in the stack file.
async fn build_state_store(config: &StackConfig, base_dir: &Path) -> Result<Box<dyn StateStore>> {
    let store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => match config.state.path.as_deref() {
            Some(path) => Box::new(LocalStateStore::with_state_path(base_dir.join(path))),
            None => Box::new(LocalStateStore::with_base_dir(base_dir.join(STATE_DIR))),
        },
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| ConfigError::validation("S3 bucket not configured", "state.bucket"))?;
            let prefix = config.state.prefix.as_deref();
            let region = config.state.region.as_deref();
            Box::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    };
    debug!(backend = store.backend_type(), "Using state backend");
    Ok(store)
}
