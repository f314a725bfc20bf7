use std::env;
use std::fmt;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};

use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use oqto_fleet::api;
use oqto_fleet::control_plane::{ControlPlaneClient, ControlPlaneConfig};
use oqto_fleet::db::Database;
use oqto_fleet::nodes::{FleetConfig, FleetInventory, NodeSelector};
use oqto_fleet::reconcile::{ReconcileConfig, Reconciler};
use oqto_fleet::remote::{SshConfig, SshExecutor};
use oqto_fleet::service::{
    PipelineConfig, RoutingConfig, RuntimeConfig, ServiceProvisioner, ServiceRepository,
    SessionConfig, SessionSettings,
};
use oqto_fleet::volume::{EditorConfig, EditorVolume, RemoteVolumeManager, VolumeConfig};

const APP_NAME: &str = "oqto-fleet";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, command: Command) -> Result<()> {
    match command {
        Command::Serve(cmd) => handle_serve(&ctx, cmd).await,
        Command::Nodes => handle_nodes(&ctx).await,
        Command::Status(cmd) => handle_status(&ctx, cmd).await,
        Command::Create(cmd) => handle_create(&ctx, cmd).await,
        Command::Start(cmd) => handle_start(&ctx, cmd).await,
        Command::Stop(cmd) => handle_stop(&ctx, cmd).await,
        Command::Delete(cmd) => handle_delete(&ctx, cmd).await,
        Command::Reconcile(cmd) => handle_reconcile(&ctx, cmd).await,
        Command::EditorVolume { command } => handle_editor_volume(&ctx, command).await,
        Command::Init(_) | Command::Config { .. } | Command::Completions { .. } => {
            Err(anyhow!("command does not need the async runtime"))
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    match cli.command {
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
        command => async_main(ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Oqto fleet - session service provisioning and volume placement.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Assume "yes" for interactive prompts
    #[arg(short = 'y', long = "yes", global = true)]
    assume_yes: bool,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// List storage nodes eligible for session volumes
    Nodes,
    /// Show service records, or one session's status
    Status(StatusCommand),
    /// Provision a session service
    Create(CreateCommand),
    /// Start a session service
    Start(SessionCommand),
    /// Stop a session service
    Stop(SessionCommand),
    /// Tear down a session service and its volume
    Delete(SessionCommand),
    /// Find (and optionally remove) orphan session volumes
    Reconcile(ReconcileCommand),
    /// Manage the shared editor volume
    EditorVolume {
        #[command(subcommand)]
        command: EditorVolumeCommand,
    },
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct StatusCommand {
    /// Session to inspect; lists every record when omitted
    session_id: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct CreateCommand {
    /// Session to provision
    session_id: String,
    /// Repository cloned into the workspace on first start
    #[arg(long)]
    repository: Option<String>,
    /// Custom environment variable (KEY=VALUE, repeatable)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Args)]
struct SessionCommand {
    session_id: String,
}

#[derive(Debug, Clone, Args)]
struct ReconcileCommand {
    /// Remove orphan volumes instead of only reporting them
    #[arg(long)]
    delete: bool,
}

#[derive(Debug, Subcommand)]
enum EditorVolumeCommand {
    /// Create and populate the editor volume on every storage node
    Setup,
    /// Refresh the editor volume contents on every storage node
    Update,
    /// Show editor volume presence per node
    Status,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let mut paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&mut paths, &common)?;
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("oqto_fleet={level},tower_http={level}"))
        });

        // Logs go to stderr so --json/--yaml output on stdout stays parseable.
        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.config.logging.level.as_str()),
        );
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            info!(
                "dry-run: would ensure data dir {}",
                self.paths.data_dir.display()
            );
            return Ok(());
        }

        fs::create_dir_all(&self.paths.data_dir).with_context(|| {
            format!("creating data directory {}", self.paths.data_dir.display())
        })?;
        Ok(())
    }

    /// Print `value` as JSON or YAML when requested, otherwise with `text`.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        if self.common.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).context("serializing output to JSON")?
            );
        } else if self.common.yaml {
            println!(
                "{}",
                serde_yaml::to_string(value).context("serializing output to YAML")?
            );
        } else {
            text(value);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
    data_dir: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self {
            config_file,
            data_dir: default_data_dir()?,
        })
    }

    fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
        }
        Ok(self)
    }

    fn database_file(&self) -> PathBuf {
        self.data_dir.join("services.db")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    logging: LoggingConfig,
    paths: PathsConfig,
    server: ServerConfig,
    control_plane: ControlPlaneConfig,
    ssh: SshConfig,
    fleet: FleetConfig,
    volumes: VolumeConfig,
    editor: EditorConfig,
    routing: RoutingConfig,
    runtime: RuntimeConfig,
    session: SessionConfig,
    reconcile: ReconcileConfig,
}

/// Placeholder shown instead of secret values.
const REDACTED: &str = "********";

impl AppConfig {
    /// Copy of the config with every credential masked, for display.
    fn redacted(&self) -> Self {
        fn mask(value: &mut Option<String>) {
            if value.as_deref().is_some_and(|v| !v.is_empty()) {
                *value = Some(REDACTED.to_string());
            }
        }

        let mut config = self.clone();
        if !config.control_plane.api_key.is_empty() {
            config.control_plane.api_key = REDACTED.to_string();
        }
        mask(&mut config.server.api_token);
        mask(&mut config.session.token_secret);
        mask(&mut config.runtime.registry_password);
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct PathsConfig {
    data_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ServerConfig {
    host: String,
    port: u16,
    /// Bearer token required by the API. Unset disables auth.
    api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            api_token: None,
        }
    }
}

/// Everything the service commands and the server share.
struct Fleet {
    provisioner: ServiceProvisioner,
    selector: Arc<NodeSelector>,
    reconciler: Reconciler,
    editor: EditorVolume,
}

impl Fleet {
    async fn build(ctx: &RuntimeContext) -> Result<Self> {
        let cfg = &ctx.config;

        let db_path = ctx.paths.database_file();
        debug!("Database path: {}", db_path.display());
        let database = Database::new(&db_path).await?;
        let repo = ServiceRepository::new(database.pool().clone());

        let executor = Arc::new(SshExecutor::new(cfg.ssh.clone()));
        let inventory = Arc::new(FleetInventory::new(executor.clone(), cfg.fleet.clone()));
        let volumes = Arc::new(RemoteVolumeManager::new(executor, cfg.volumes.clone()));
        let selector = Arc::new(NodeSelector::new(inventory.clone()));

        let control_plane = Arc::new(
            ControlPlaneClient::new(&cfg.control_plane)
                .context("creating control plane client")?,
        );

        let pipeline = PipelineConfig {
            runtime: cfg.runtime.clone(),
            routing: cfg.routing.clone(),
            session: cfg.session.clone(),
            editor: cfg.editor.clone(),
            project_id: cfg.control_plane.project_id.clone(),
        };
        if pipeline.session.token_secret.as_deref().is_none_or(str::is_empty) {
            warn!("session.token_secret is not set; sessions get opaque random tokens");
        }

        let provisioner = ServiceProvisioner::new(
            repo,
            control_plane,
            selector.clone(),
            volumes.clone(),
            pipeline,
        );
        let reconciler = Reconciler::new(inventory.clone(), volumes.clone(), &cfg.reconcile);
        let editor = EditorVolume::new(inventory, volumes, cfg.editor.clone());

        Ok(Self {
            provisioner,
            selector,
            reconciler,
            editor,
        })
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    write_default_config(&ctx.paths.config_file)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = ctx.config.redacted();
            ctx.emit(&config, |config| println!("{:#?}", config))
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

async fn handle_nodes(ctx: &RuntimeContext) -> Result<()> {
    let fleet = Fleet::build(ctx).await?;
    let nodes = fleet.selector.nodes().await?;
    ctx.emit(&nodes, |nodes| {
        if nodes.is_empty() {
            println!("No storage nodes available");
        }
        for node in nodes {
            println!("{}\t{}\t{}", node.hostname, node.availability, node.cluster_id);
        }
    })
}

async fn handle_status(ctx: &RuntimeContext, cmd: StatusCommand) -> Result<()> {
    let fleet = Fleet::build(ctx).await?;
    match cmd.session_id {
        Some(session_id) => {
            let status = fleet
                .provisioner
                .get_status(&session_id)
                .await?
                .ok_or_else(|| anyhow!("service for session {} not found", session_id))?;
            ctx.emit(&status, |status| {
                println!("status: {}", status.status);
                if let Some(ref url) = status.url {
                    println!("url:    {}", url);
                }
                if let Some(ref error) = status.error {
                    println!("error:  {}", error);
                }
            })
        }
        None => {
            let records = fleet.provisioner.list().await?;
            ctx.emit(&records, |records| {
                for record in records {
                    println!(
                        "{}\t{}\t{}\t{}",
                        record.session_id,
                        record.status,
                        record.worker_node.as_deref().unwrap_or("-"),
                        record.service_url.as_deref().unwrap_or("-")
                    );
                }
            })
        }
    }
}

async fn handle_create(ctx: &RuntimeContext, cmd: CreateCommand) -> Result<()> {
    let settings = SessionSettings {
        repository_url: cmd.repository,
        env: cmd.env.into_iter().collect(),
        ..Default::default()
    };

    if ctx.common.dry_run {
        info!("dry-run: would provision session {}", cmd.session_id);
        return Ok(());
    }

    let fleet = Fleet::build(ctx).await?;
    let record = fleet.provisioner.create(&cmd.session_id, settings).await?;
    ctx.emit(&record, |record| {
        println!(
            "Provisioned {} on {} at {}",
            record.session_id,
            record.worker_node.as_deref().unwrap_or("-"),
            record.service_url.as_deref().unwrap_or("-")
        );
    })
}

async fn handle_start(ctx: &RuntimeContext, cmd: SessionCommand) -> Result<()> {
    let fleet = Fleet::build(ctx).await?;
    fleet.provisioner.start(&cmd.session_id).await?;
    info!("Started {}", cmd.session_id);
    Ok(())
}

async fn handle_stop(ctx: &RuntimeContext, cmd: SessionCommand) -> Result<()> {
    let fleet = Fleet::build(ctx).await?;
    fleet.provisioner.stop(&cmd.session_id).await?;
    info!("Stopped {}", cmd.session_id);
    Ok(())
}

async fn handle_delete(ctx: &RuntimeContext, cmd: SessionCommand) -> Result<()> {
    if ctx.common.dry_run {
        info!("dry-run: would delete session {}", cmd.session_id);
        return Ok(());
    }

    let fleet = Fleet::build(ctx).await?;
    fleet.provisioner.delete(&cmd.session_id).await?;
    info!("Deleted {}", cmd.session_id);
    Ok(())
}

async fn handle_reconcile(ctx: &RuntimeContext, cmd: ReconcileCommand) -> Result<()> {
    let delete = cmd.delete && !ctx.common.dry_run;
    let fleet = Fleet::build(ctx).await?;
    let report = fleet
        .reconciler
        .reconcile(fleet.provisioner.repository(), delete)
        .await?;

    ctx.emit(&report, |report| {
        for (node, volumes) in &report.orphans {
            for volume in volumes {
                println!("{}\t{}", node, volume);
            }
        }
        match report.cleanup {
            Some(ref cleanup) => {
                println!(
                    "Removed {} orphan volume(s), {} failed",
                    cleanup.deleted.len(),
                    cleanup.errors.len()
                );
                for line in &cleanup.errors {
                    println!("  {}", line);
                }
            }
            None => println!("{} orphan volume(s) found", report.orphan_count()),
        }
    })
}

async fn handle_editor_volume(ctx: &RuntimeContext, command: EditorVolumeCommand) -> Result<()> {
    let fleet = Fleet::build(ctx).await?;
    match command {
        EditorVolumeCommand::Status => {
            let probes = fleet.editor.status().await?;
            ctx.emit(&probes, |probes| {
                for probe in probes {
                    println!("{}\t{:?}", probe.node, probe.probe);
                }
            })
        }
        EditorVolumeCommand::Setup | EditorVolumeCommand::Update => {
            let report = match command {
                EditorVolumeCommand::Setup => fleet.editor.setup().await?,
                _ => fleet.editor.update().await?,
            };
            ctx.emit(&report, |report| {
                for node in &report.succeeded {
                    println!("{}\tok", node);
                }
                for failure in &report.failed {
                    println!("{}\tfailed: {}", failure.node, failure.reason);
                }
            })?;
            if !report.is_complete() {
                return Err(anyhow!(
                    "editor volume incomplete on {} node(s)",
                    report.failed.len()
                ));
            }
            Ok(())
        }
    }
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    info!("Starting fleet provisioning server...");

    let fleet = Fleet::build(ctx).await?;

    match fleet.selector.nodes().await {
        Ok(nodes) => info!("{} storage node(s) available", nodes.len()),
        Err(e) => warn!(
            "Fleet inventory check failed: {}. Provisioning may fail.",
            e
        ),
    }

    let reconcile = &ctx.config.reconcile;
    let state = api::AppState::new(
        fleet.provisioner,
        fleet.selector,
        fleet.reconciler,
        fleet.editor,
        ctx.config.server.api_token.clone(),
    );
    if state.api_token.is_none() {
        warn!("server.api_token is not set; the API is unauthenticated");
    }

    let reconcile_task = if reconcile.enabled {
        Some(state.reconciler.clone().start_periodic_task(
            state.provisioner.repository().clone(),
            Duration::from_secs(reconcile.interval_seconds.max(1)),
            reconcile.delete_orphans,
        ))
    } else {
        None
    };

    let app = api::create_router(state);

    let host = cmd.host.unwrap_or_else(|| ctx.config.server.host.clone());
    let port = cmd.port.unwrap_or(ctx.config.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("invalid address")?;

    info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    if let Some(task) = reconcile_task {
        task.abort();
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

fn load_or_init_config(paths: &mut AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8090_i64)?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()?;

    let mut config: AppConfig = built.try_deserialize()?;

    if let Some(ref identity) = config.ssh.identity_file {
        config.ssh.identity_file = Some(expand_str_path(identity)?.display().to_string());
    }

    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push('\n');
    buffer
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::data_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl fmt::Display for AppPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config: {}, data: {}",
            self.config_file.display(),
            self.data_dir.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix(), "OQTO_FLEET");
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_default_config_roundtrips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = AppPaths {
            config_file: dir.path().join("config.toml"),
            data_dir: dir.path().join("data"),
        };
        let common = Cli::parse_from(["oqto-fleet", "nodes"]).common;

        let config = load_or_init_config(&mut paths, &common).unwrap();
        assert!(paths.config_file.exists());
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.editor.volume_name, "oqto-editor");
        assert!(!config.reconcile.enabled);
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("config.toml");
        fs::write(
            &config_file,
            "[server]\nport = 9999\napi_token = \"secret\"\n\n[reconcile]\nenabled = true\n",
        )
        .unwrap();
        let mut paths = AppPaths {
            config_file,
            data_dir: dir.path().join("data"),
        };
        let common = Cli::parse_from(["oqto-fleet", "nodes"]).common;

        let config = load_or_init_config(&mut paths, &common).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.api_token.as_deref(), Some("secret"));
        assert!(config.reconcile.enabled);
        assert_eq!(config.reconcile.interval_seconds, 3600);
    }

    #[test]
    fn test_config_show_redacts_secrets() {
        let mut config = AppConfig::default();
        config.control_plane.api_key = "cp-key".to_string();
        config.server.api_token = Some("api-token".to_string());
        config.session.token_secret = Some("jwt-secret".to_string());
        config.runtime.registry_password = Some(String::new());
        config.server.port = 9999;

        let shown = config.redacted();
        let rendered = serde_json::to_string(&shown).unwrap();
        for secret in ["cp-key", "api-token", "jwt-secret"] {
            assert!(!rendered.contains(secret), "{secret} leaked");
        }
        assert_eq!(shown.control_plane.api_key, REDACTED);
        assert_eq!(shown.server.api_token.as_deref(), Some(REDACTED));
        assert_eq!(shown.session.token_secret.as_deref(), Some(REDACTED));
        // Empty and unset values stay as they are, so misconfiguration is visible.
        assert_eq!(shown.runtime.registry_password.as_deref(), Some(""));
        assert_eq!(shown.server.port, 9999);
        assert_eq!(config.control_plane.api_key, "cp-key");

        let unset = AppConfig::default().redacted();
        assert!(unset.server.api_token.is_none());
        assert!(unset.control_plane.api_key.is_empty());
    }
}
