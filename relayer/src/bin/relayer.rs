use std::{
    backtrace::{Backtrace, BacktraceStatus},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use relayerlib::{
    cfg::Settings,
    chain::{ChainOptions, ChainRegistrar, TendermintStatus},
    engine::rpc::RpcRelayEngine,
    path::{ChannelOptions, PathAllocator},
    registry::{Ordering, TRANSFER_PORT, TRANSFER_VERSION},
    relayer::{LinkReport, Relayer, shutdown_on},
    store::{ConfigStore, FileStore},
};
use tracing_subscriber::EnvFilter;

/// Connects blockchains over IBC.
#[derive(Parser, Debug)]
#[clap(about)]
struct Cli {
    /// Relayer settings file (TOML).
    #[clap(long, short)]
    settings: Option<PathBuf>,
    /// Overrides the registry location from the settings.
    #[clap(long)]
    registry: Option<PathBuf>,
    /// Overrides the relay engine endpoint from the settings.
    #[clap(long)]
    engine_url: Option<String>,
    #[clap(long, default_value = "false")]
    log_json: bool,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a source and a target chain and create a path between them.
    Configure(ConfigureArgs),
    /// Link paths without relaying. Links every path if none are given.
    Link(PathsArg),
    /// Link paths and relay packets over them until interrupted. Uses every path if none are given.
    Connect(PathsArg),
    /// List the paths in the registry.
    Paths,
    /// List the chains in the registry.
    Chains,
}

#[derive(Args, Debug)]
struct PathsArg {
    paths: Vec<String>,
}

#[derive(Args, Debug)]
struct ConfigureArgs {
    #[clap(long)]
    source_rpc: String,
    #[clap(long, default_value = "default")]
    source_account: String,
    #[clap(long)]
    source_prefix: Option<String>,
    #[clap(long)]
    source_gas_price: Option<String>,
    #[clap(long)]
    source_gas_limit: Option<u64>,
    #[clap(long, default_value = TRANSFER_PORT)]
    source_port: String,
    #[clap(long, default_value = TRANSFER_VERSION)]
    source_version: String,
    #[clap(long)]
    target_rpc: String,
    #[clap(long, default_value = "default")]
    target_account: String,
    #[clap(long)]
    target_prefix: Option<String>,
    #[clap(long)]
    target_gas_price: Option<String>,
    #[clap(long)]
    target_gas_limit: Option<u64>,
    #[clap(long, default_value = TRANSFER_PORT)]
    target_port: String,
    #[clap(long, default_value = TRANSFER_VERSION)]
    target_version: String,
    /// Open an ordered channel instead of an unordered one.
    #[clap(long)]
    ordered: bool,
}

fn init_logging(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    // Set a panic hook that records the panic as a `tracing` event at the `ERROR` verbosity level.
    std::panic::set_hook(Box::new(|panic| {
        let message = match panic.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        let backtrace = Backtrace::capture();
        let backtrace =
            (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());

        match (panic.location(), backtrace) {
            (None, None) => tracing::error!(message),
            (None, Some(backtrace)) => tracing::error!(message, %backtrace),
            (Some(location), None) => tracing::error!(
                message,
                panic.file = location.file(),
                panic.line = location.line(),
            ),
            (Some(location), Some(backtrace)) => tracing::error!(
                message,
                panic.file = location.file(),
                panic.line = location.line(),
                %backtrace,
            ),
        }
    }));
}

fn settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.settings {
        Some(file) => Settings::from_file(file)?,
        None => Settings::default(),
    };
    if let Some(registry) = &cli.registry {
        settings.registry_file = registry.clone();
    }
    if let Some(url) = &cli.engine_url {
        settings.engine.url = url.clone();
    }
    Ok(settings)
}

fn relayer(settings: &Settings, store: Arc<dyn ConfigStore>) -> Result<Relayer> {
    let engine = RpcRelayEngine::new(&settings.engine)?;
    Ok(Relayer::new(store, Arc::new(engine)))
}

async fn configure(
    args: &ConfigureArgs,
    settings: &Settings,
    store: Arc<dyn ConfigStore>,
) -> Result<()> {
    let status = TendermintStatus::new(settings.chain_query_timeout)?;
    let registrar = ChainRegistrar::new(store.clone(), Arc::new(status));

    let src = registrar
        .register(
            &args.source_account,
            &args.source_rpc,
            &ChainOptions {
                address_prefix: args.source_prefix.clone(),
                gas_price: args.source_gas_price.clone(),
                gas_limit: args.source_gas_limit,
            },
        )
        .await?;
    let dst = registrar
        .register(
            &args.target_account,
            &args.target_rpc,
            &ChainOptions {
                address_prefix: args.target_prefix.clone(),
                gas_price: args.target_gas_price.clone(),
                gas_limit: args.target_gas_limit,
            },
        )
        .await?;

    let options = ChannelOptions {
        source_port: args.source_port.clone(),
        source_version: args.source_version.clone(),
        target_port: args.target_port.clone(),
        target_version: args.target_version.clone(),
        ordering: if args.ordered {
            Ordering::Ordered
        } else {
            Ordering::Unordered
        },
    };
    let id = PathAllocator::new(store).allocate(&src.id, &dst.id, &options)?;

    println!("{}", format!("✓ Configured chains: {} → {}", src.id, dst.id).green());
    println!("  path: {id}");
    Ok(())
}

fn print_report(report: &LinkReport) {
    if !report.already_linked.is_empty() {
        println!(
            "{}",
            format!("✓ {} paths already linked.", report.already_linked.len()).green()
        );
        for id in &report.already_linked {
            println!("  - {id}");
        }
    }
    if !report.linked.is_empty() {
        println!(
            "{}",
            format!("✓ Linked chains with {} paths.", report.linked.len()).green()
        );
        for id in &report.linked {
            println!("  - {id}");
        }
    }
    if !report.failed.is_empty() {
        println!(
            "{}",
            format!("x Failed to link chains in {} paths.", report.failed.len()).red()
        );
        for failure in &report.failed {
            println!("  - {} failed with error: {}", failure.path_id, failure.reason);
        }
    }
}

async fn connect(relayer: &Relayer, paths: &[String]) -> Result<()> {
    let report = relayer.link(paths).await?;
    print_report(&report);

    let connectable = report.connectable();
    if connectable.is_empty() {
        println!("No paths to connect.");
        return Ok(());
    }

    println!("Continuing with {} paths...", connectable.len());
    for id in &connectable {
        let path = relayer.get_path(id).await?;
        println!("{}:", path.id);
        for end in [&path.src, &path.dst] {
            println!(
                "    {} > (port: {}) (channel: {})",
                end.chain_id, end.port_id, end.channel_id
            );
        }
    }

    println!("Listening and relaying packets between chains...");
    relayer
        .start(&connectable, shutdown_on(tokio::signal::ctrl_c()))
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let settings = settings(&cli)?;
    let store: Arc<dyn ConfigStore> = Arc::new(FileStore::new(&settings.registry_file));

    match &cli.command {
        Commands::Configure(args) => configure(args, &settings, store).await?,
        Commands::Link(arg) => {
            let report = relayer(&settings, store)?.link(&arg.paths).await?;
            print_report(&report);
        }
        Commands::Connect(arg) => connect(&relayer(&settings, store)?, &arg.paths).await?,
        Commands::Paths => {
            for path in store.load()?.paths {
                let state = if path.is_linked() {
                    "linked".green()
                } else {
                    "not linked".yellow()
                };
                println!(
                    "{}: {} ({}) > {} ({}) [{}] {state}",
                    path.id,
                    path.src.chain_id,
                    path.src.port_id,
                    path.dst.chain_id,
                    path.dst.port_id,
                    path.ordering
                );
            }
        }
        Commands::Chains => {
            for chain in store.load()?.chains {
                println!(
                    "{}: {} (account: {}, prefix: {})",
                    chain.id, chain.rpc_address, chain.account, chain.address_prefix
                );
            }
        }
    }
    Ok(())
}
