//! sealgated: envelope-encryption file gateway daemon
//!
//! Usage:
//!   sealgated [--config /etc/sealgate/config.toml] <serve|rekey|verify|keygen>
//!
//! Commands:
//!   serve   Bootstrap the gateway, expose /metrics, /healthz, /readyz
//!   rekey   Rotate a KMS key and rewrap every DEK under the KEK
//!   verify  Check that every live metadata row has its ciphertext object
//!   keygen  Write a new local KEK file (mode 0600)

mod bootstrap;
mod daemon;
mod keygen;
mod metrics;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use sealgate_core::config::SealgateConfig;
use sealgate_core::types::RequestInfo;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sealgated", version, about = "sealgate envelope-encryption gateway")]
struct Cli {
    /// Path to sealgate.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SEALGATE_CONFIG",
        default_value = "/etc/sealgate/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to daemon.log_level
    #[arg(long, env = "SEALGATE_LOG")]
    log: Option<String>,

    /// Log format; defaults to daemon.log_format
    #[arg(long, env = "SEALGATE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway until SIGTERM / Ctrl-C
    Serve,
    /// Rotate `key_uid` in the KMS and rewrap all stored DEKs
    Rekey {
        /// Admin id performing the rotation (recorded in the audit log)
        #[arg(long)]
        admin: String,
        /// KMS UID of the key to rotate
        #[arg(long)]
        key_uid: String,
    },
    /// Report metadata rows whose ciphertext object is missing
    Verify,
    /// Generate a local KEK file
    Keygen {
        /// Output path
        #[arg(long, short = 'o')]
        out: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, found) = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.daemon.log_format.eq_ignore_ascii_case("text") {
            LogFormat::Text
        } else {
            LogFormat::Json
        }
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?cli.command,
        config = %cli.config.display(),
        "sealgated starting"
    );
    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Command::Serve => {
            let gateway = bootstrap::build(&config).await?;
            daemon::run(config, gateway).await
        }
        Command::Rekey { admin, key_uid } => {
            let gateway = bootstrap::build(&config).await?;
            let req = RequestInfo {
                ip: None,
                user_agent: Some(format!("sealgated/{}", env!("CARGO_PKG_VERSION"))),
            };
            let report = gateway.pipeline.rekey(&admin, &key_uid, &req).await?;
            println!("successor key: {}", report.successor_uid);
            println!("rows rewrapped: {}", report.rewrapped);
            for uid in &report.skipped {
                println!("skipped key:   {uid}");
            }
            Ok(())
        }
        Command::Verify => {
            let gateway = bootstrap::build(&config).await?;
            let report = gateway.pipeline.verify_consistency().await?;
            println!("rows checked: {}", report.checked);
            for file_uid in &report.missing {
                println!("missing object: {file_uid}");
            }
            if !report.is_consistent() {
                anyhow::bail!("{} metadata rows have no ciphertext object", report.missing.len());
            }
            Ok(())
        }
        Command::Keygen { out, force } => {
            keygen::write_kek_file(&out, force)?;
            println!("wrote KEK to {}", out.display());
            Ok(())
        }
    }
}

/// Parse the config file, falling back to defaults if it does not exist.
/// `DATABASE_URL` overrides `database.url`.
async fn load_config(path: &Path) -> Result<(SealgateConfig, bool)> {
    let (mut config, found) = if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        (config, true)
    } else {
        (SealgateConfig::default(), false)
    };

    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database.url = url;
    }
    Ok((config, found))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
