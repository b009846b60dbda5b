mod cli_logger;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use cli_logger::CliLogger;
use stackpile::{
    Config, DEFAULT_CONFIG_FILE, Format, IngestServer, Ingester, MemoryStorage, PushOptions,
    SamplingMultiplier, fold_command, push_command,
};

#[derive(Debug, Parser)]
#[command(name = "stackpile", version, about = "Profiling sample ingestion server")]
struct Cli {
    /// Config file; `stackpile.toml` in the working directory when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the ingestion server until interrupted.
    Serve {
        /// Overrides `listen_addr` from the config.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Decode a profile file locally and print its collapsed stacks.
    Fold {
        file: PathBuf,
        #[arg(long, default_value = "lines")]
        format: Format,
        /// Overrides `sampling_multiplier` from the config.
        #[arg(long)]
        multiplier: Option<u64>,
    },
    /// Upload a profile file to a running server.
    Push {
        file: PathBuf,
        #[arg(long, default_value = "http://127.0.0.1:4040")]
        url: String,
        /// Application name, e.g. `app.cpu` or `app.cpu{env=prod}`.
        #[arg(long)]
        name: String,
        #[arg(long)]
        grouped: bool,
        /// Aggregate locally and send a binary transport trie.
        #[arg(long)]
        trie: bool,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        until: Option<String>,
        /// Extra label, repeatable.
        #[arg(long = "label", value_name = "KEY=VALUE", value_parser = parse_label)]
        labels: Vec<(String, String)>,
    },
    /// Print the effective configuration.
    Config,
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let logger = CliLogger::new(cli.json, cli.no_color);
    match run(cli, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, logger: &CliLogger) -> Result<()> {
    let filter_handle = init_tracing()?;
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::load_optional(Path::new(DEFAULT_CONFIG_FILE)),
    };
    if let Some(handle) = filter_handle {
        let filter = EnvFilter::try_new(&config.log_filter)
            .with_context(|| format!("invalid log_filter {:?}", config.log_filter))?;
        handle.reload(filter).context("applying log_filter")?;
    }
    config.validate()?;

    match cli.command {
        Command::Serve { listen } => {
            let mut config = config;
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            serve(&config)
        }
        Command::Fold {
            file,
            format,
            multiplier,
        } => {
            let multiplier = match multiplier {
                Some(m) => SamplingMultiplier::new(m)?,
                None => config.multiplier()?,
            };
            let summary = fold_command(&file, format, multiplier)?;
            logger.print_fold(&summary)
        }
        Command::Push {
            file,
            url,
            name,
            grouped,
            trie,
            from,
            until,
            labels,
        } => {
            let opts = PushOptions {
                url,
                name,
                grouped,
                trie,
                from,
                until,
                labels,
            };
            let report = push_command(&file, &opts)?;
            logger.print_put_report(&report)
        }
        Command::Config => logger.print_serialized(&config),
    }
}

fn serve(config: &Config) -> Result<()> {
    let addr = config.listen_socket_addr()?;
    let storage = Arc::new(MemoryStorage::new(config.segment_resolution_secs));
    let ingester = Ingester::new(config.multiplier()?, storage);
    let server = IngestServer::new(ingester, config.max_body_bytes);
    tracing::info!(
        multiplier = config.sampling_multiplier,
        resolution_secs = config.segment_resolution_secs,
        "starting stackpile"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(server.run(addr, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {err}");
        }
        tracing::info!("shutting down");
    }))?;
    Ok(())
}

/// Installs the global subscriber filtered by `RUST_LOG`, or `info` until the
/// config is loaded. Returns the reload handle only when `RUST_LOG` is unset.
fn init_tracing() -> Result<Option<reload::Handle<EnvFilter, Registry>>> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let env_set = from_env.is_some();
    let (filter_layer, handle) =
        reload::Layer::new(from_env.unwrap_or_else(|| EnvFilter::new("info")));
    let subscriber = tracing_subscriber::registry().with(filter_layer).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false),
    );
    tracing::subscriber::set_global_default(subscriber).context("installing log subscriber")?;
    Ok((!env_set).then_some(handle))
}
