//! sbk: SecureBackup command-line client
//!
//! Commands:
//!   backup <sources>... --dest <dir>   - archive, compress and encrypt into a .sbk
//!   restore <archive> --out <dir>      - decrypt and extract a .sbk
//!   verify                             - check a password against the keycheck
//!   init                               - create the keycheck if absent
//!   config show                        - display current configuration
//!   jobs list|add|remove|run           - manage scheduled backup jobs
//!
//! Passwords come from `SBK_PASSWORD` or an interactive prompt.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use sbk_core::config::SbkConfig;
use sbk_core::paths::{default_state_dir, expand_tilde, CONFIG_FILE};
use sbk_core::types::{backup_file_name, Frequency, Job};
use sbk_engine::Engine;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sbk",
    version,
    about = "SecureBackup: password-protected, compressed backups",
    long_about = "sbk: create and restore encrypted .sbk archives and manage scheduled backup jobs"
)]
struct Cli {
    /// Path to config.toml (default: <state-dir>/config.toml)
    #[arg(long, short = 'c', env = "SBK_CONFIG")]
    config: Option<PathBuf>,

    /// Application state directory (keycheck, temp staging, config)
    #[arg(long, env = "SBK_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides [logging].level
    #[arg(long, env = "SBK_LOG")]
    log: Option<String>,

    /// Log format; overrides [logging].format
    #[arg(long, env = "SBK_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up files and folders into an encrypted .sbk archive
    Backup {
        /// Files or directories to include
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Destination directory for the .sbk file
        #[arg(long, short = 'd')]
        dest: PathBuf,
        /// Backup name; the file becomes <name>_<timestamp>.sbk
        #[arg(long, short = 'n', default_value = "backup")]
        name: String,
    },

    /// Decrypt and extract a .sbk archive
    Restore {
        /// The .sbk file to restore
        archive: PathBuf,
        /// Directory to extract into
        #[arg(long, short = 'o')]
        out: PathBuf,
    },

    /// Check a password against the stored keycheck
    Verify,

    /// Create the password keycheck if it does not exist yet
    Init,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Scheduled backup jobs stored in config.toml
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum JobsAction {
    /// List jobs with their cron expressions
    List,

    /// Add a job, or replace the job with the same name
    Add {
        /// Job name (also the archive file name prefix)
        name: String,
        /// Files or directories to include
        #[arg(long = "source", short = 's', required = true)]
        sources: Vec<PathBuf>,
        /// Destination directory for the .sbk files
        #[arg(long, short = 'd')]
        dest: PathBuf,
        #[arg(long, value_enum, default_value = "daily")]
        frequency: FrequencyArg,
        /// Local time of day, HH:MM
        #[arg(long, default_value = "10:00")]
        time: String,
        /// Weekday for weekly jobs
        #[arg(long, default_value = "Monday")]
        day: String,
        /// Store the job but do not run it
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a job by name
    Remove { name: String },

    /// Run one job's backup now (the entry point for external schedulers)
    Run { name: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FrequencyArg {
    Daily,
    Weekly,
}

impl From<FrequencyArg> for Frequency {
    fn from(arg: FrequencyArg) -> Self {
        match arg {
            FrequencyArg::Daily => Frequency::Daily,
            FrequencyArg::Weekly => Frequency::Weekly,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let state_dir = cli
        .state_dir
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(default_state_dir);
    let config_path = cli
        .config
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(|| state_dir.join(CONFIG_FILE));
    let config = load_config(&config_path)?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| parse_log_format(&config.logging.format));
    init_logging(level, &format);
    config.check_file_mode(&config_path);

    let engine = Engine::new(config.engine_paths(&state_dir));
    info!(
        version = env!("CARGO_PKG_VERSION"),
        state_dir = %state_dir.display(),
        config = %config_path.display(),
        "sbk starting"
    );

    match cli.command {
        Commands::Backup { sources, dest, name } => cmd_backup(&engine, &sources, &dest, &name),
        Commands::Restore { archive, out } => cmd_restore(&engine, &archive, &out),
        Commands::Verify => cmd_verify(&engine),
        Commands::Init => cmd_init(&engine),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
        Commands::Jobs { action } => match action {
            JobsAction::List => cmd_jobs_list(&config),
            JobsAction::Add {
                name,
                sources,
                dest,
                frequency,
                time,
                day,
                disabled,
            } => {
                let job = Job {
                    name,
                    destination: dest,
                    password: String::new(),
                    frequency: frequency.into(),
                    time,
                    day,
                    enabled: !disabled,
                    sources,
                };
                cmd_jobs_add(&engine, config, &config_path, job)
            }
            JobsAction::Remove { name } => cmd_jobs_remove(config, &config_path, &name),
            JobsAction::Run { name } => cmd_jobs_run(&engine, &config, &name),
        },
    }
}

fn load_config(path: &Path) -> Result<SbkConfig> {
    SbkConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

fn parse_log_format(s: &str) -> LogFormat {
    if s.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Passwords ─────────────────────────────────────────────────────────────────

/// Read the password from `SBK_PASSWORD`, or prompt for it. When `confirm`
/// is set the prompt asks twice.
fn read_password(confirm: bool) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("SBK_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password("Password: ").context("reading password")?;
    if confirm {
        let again = rpassword::prompt_password("Confirm password: ").context("reading password")?;
        if again != pw {
            bail!("passwords do not match");
        }
    }
    Ok(SecretString::from(pw))
}

/// Reject a password that does not match the keycheck, then make sure a
/// keycheck exists for it.
fn check_and_bind_password(engine: &Engine, password: &SecretString) -> Result<()> {
    if !engine.verify_password(password) {
        bail!("password does not match the one used for earlier backups");
    }
    if engine.ensure_keycheck(password)? {
        println!(
            "Created password keycheck at {}",
            engine.paths().keycheck_file.display()
        );
    }
    Ok(())
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `sbk backup` ──────────────────────────────────────────────────────────────

fn cmd_backup(engine: &Engine, sources: &[PathBuf], dest: &Path, name: &str) -> Result<()> {
    let password = read_password(!engine.keycheck().exists())?;
    check_and_bind_password(engine, &password)?;
    let output = run_backup(engine, sources, dest, name, &password)?;
    println!("{}", output.display());
    Ok(())
}

fn run_backup(
    engine: &Engine,
    sources: &[PathBuf],
    dest: &Path,
    name: &str,
    password: &SecretString,
) -> Result<PathBuf> {
    let file_name = backup_file_name(name, &chrono::Local::now());
    let dest = expand_tilde(dest);
    let sources: Vec<PathBuf> = sources.iter().map(|s| expand_tilde(s)).collect();

    let pb = make_spinner("backup");
    pb.set_message(format!("{} source(s) → {}", sources.len(), file_name));
    let result = engine.run_backup(&sources, &dest, password, &file_name);
    pb.finish_and_clear();

    let output = result.with_context(|| format!("backing up into {}", dest.display()))?;
    let size = std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
    eprintln!("Backup written: {} ({})", output.display(), fmt_bytes(size));
    Ok(output)
}

// ── `sbk restore` ─────────────────────────────────────────────────────────────

fn cmd_restore(engine: &Engine, archive: &Path, out: &Path) -> Result<()> {
    let password = read_password(false)?;
    let archive = expand_tilde(archive);
    let out = expand_tilde(out);

    let pb = make_spinner("restore");
    pb.set_message(archive.display().to_string());
    let result = engine.run_restore(&archive, &out, &password);
    pb.finish_and_clear();

    let report = result.with_context(|| format!("restoring {}", archive.display()))?;
    println!(
        "Restored {} entries ({}) into {}",
        report.extracted,
        fmt_bytes(report.payload_bytes),
        out.display()
    );
    if !report.rejected.is_empty() {
        println!("Refused {} unsafe entries:", report.rejected.len());
        for path in &report.rejected {
            println!("  {}", path.display());
        }
    }
    Ok(())
}

// ── `sbk verify` / `sbk init` ─────────────────────────────────────────────────

fn cmd_verify(engine: &Engine) -> Result<()> {
    if !engine.keycheck().exists() {
        println!("No keycheck yet: any password will be accepted and bound on first backup");
        return Ok(());
    }
    let password = read_password(false)?;
    if engine.verify_password(&password) {
        println!("Password OK");
        Ok(())
    } else {
        bail!("password does not match the keycheck")
    }
}

fn cmd_init(engine: &Engine) -> Result<()> {
    let keycheck = &engine.paths().keycheck_file;
    if engine.keycheck().exists() {
        println!("Keycheck already exists at {}", keycheck.display());
        return Ok(());
    }
    let password = read_password(true)?;
    if engine.ensure_keycheck(&password)? {
        println!("Created password keycheck at {}", keycheck.display());
    } else {
        println!("Keycheck already exists at {}", keycheck.display());
    }
    Ok(())
}

// ── `sbk config show` ─────────────────────────────────────────────────────────

fn cmd_config_show(config: &SbkConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();

    let mut shown = config.clone();
    for job in &mut shown.jobs {
        if !job.password.is_empty() {
            job.password = "********".into();
        }
    }
    let rendered = toml::to_string_pretty(&shown).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `sbk jobs` ────────────────────────────────────────────────────────────────

fn cmd_jobs_list(config: &SbkConfig) -> Result<()> {
    if config.jobs.is_empty() {
        println!("No jobs configured");
        return Ok(());
    }
    println!(
        "{:<20} {:<8} {:<16} {:<8} DESTINATION",
        "NAME", "ENABLED", "CRON", "SOURCES"
    );
    for job in &config.jobs {
        let cron = job
            .cron_expression()
            .unwrap_or_else(|e| format!("invalid ({e})"));
        println!(
            "{:<20} {:<8} {:<16} {:<8} {}",
            job.name,
            if job.enabled { "yes" } else { "no" },
            cron,
            job.sources.len(),
            job.destination.display()
        );
    }
    Ok(())
}

fn cmd_jobs_add(
    engine: &Engine,
    mut config: SbkConfig,
    config_path: &Path,
    mut job: Job,
) -> Result<()> {
    let cron = job
        .cron_expression()
        .with_context(|| format!("invalid schedule for job {}", job.name))?;

    let password = read_password(!engine.keycheck().exists())?;
    check_and_bind_password(engine, &password)?;
    job.password = password.expose_secret().to_string();

    let name = job.name.clone();
    let replaced = config.upsert_job(job);
    config
        .save(config_path)
        .with_context(|| format!("saving config: {}", config_path.display()))?;

    let verb = if replaced { "Updated" } else { "Added" };
    println!("{verb} job {name} ({cron})");
    Ok(())
}

fn cmd_jobs_remove(mut config: SbkConfig, config_path: &Path, name: &str) -> Result<()> {
    if !config.remove_job(name) {
        bail!("no job named {name}");
    }
    config
        .save(config_path)
        .with_context(|| format!("saving config: {}", config_path.display()))?;
    println!("Removed job {name}");
    Ok(())
}

fn cmd_jobs_run(engine: &Engine, config: &SbkConfig, name: &str) -> Result<()> {
    let job = config
        .find_job(name)
        .with_context(|| format!("no job named {name}"))?;
    if !job.enabled {
        warn!(job = %job.name, "job is disabled, not running");
        println!("Job {name} is disabled");
        return Ok(());
    }

    let password = SecretString::from(job.password.clone());
    check_and_bind_password(engine, &password)
        .with_context(|| format!("job {name}"))?;
    let output = run_backup(engine, &job.sources, &job.destination, &job.name, &password)?;
    info!(job = %job.name, output = %output.display(), "job finished");
    println!("{}", output.display());
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
