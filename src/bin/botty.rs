use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use botty::{
    adapter::CliAdapter,
    config::StorageBackend,
    storage::Storage,
    Bot, BotConfig, Message,
};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, env = "BOTTY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the example bot on the terminal
    Run(RunArgs),

    /// Validate the config file and print the effective config
    Check,
}

#[derive(Parser)]
struct RunArgs {
    /// Bot name, shown in the prompt
    #[arg(long)]
    name: Option<String>,

    /// Per handler timeout in milliseconds, 0 disables it
    #[arg(long)]
    handler_timeout_ms: Option<u64>,

    /// Persist memory to this JSON file instead of keeping it in memory
    #[arg(long)]
    storage_path: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> anyhow::Result<BotConfig> {
    match &cli.config {
        Some(path) => BotConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(BotConfig::default()),
    }
}

fn apply_overrides(mut config: BotConfig, args: &RunArgs) -> anyhow::Result<BotConfig> {
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(ms) = args.handler_timeout_ms {
        config.brain.handler_timeout = Duration::from_millis(ms);
    }
    if let Some(path) = &args.storage_path {
        config.storage.backend = StorageBackend::File;
        config.storage.path = Some(path.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn remember(storage: Arc<Storage>, msg: Message) -> anyhow::Result<()> {
    let (key, value) = (&msg.matches[0], &msg.matches[1]);
    msg.respond(format!("Ok I'll remember {key} is {value}"))
        .await?;
    storage.set(key, value).await?;
    Ok(())
}

async fn what_is(storage: Arc<Storage>, msg: Message) -> anyhow::Result<()> {
    let key = msg.matches[0].trim_end_matches('\r');
    match storage.get::<String>(key).await? {
        Some(value) => msg.respond(format!("{key} is {value}")).await?,
        None => msg.respond(format!("Could not find {key:?} stored")).await?,
    }
    Ok(())
}

async fn run_bot(config: BotConfig) -> anyhow::Result<()> {
    let storage = Storage::from_config(&config.storage).await?;
    let cli = Arc::new(CliAdapter::new(
        format!("{} {}", config.name, config.cli.prefix),
        config.cli.author.clone(),
    ));
    let bot = Arc::new(Bot::with_parts(config, storage, cli.clone()));

    let storage = bot.storage().clone();
    bot.respond("remember (.+) is (.+)", move |msg| remember(storage.clone(), msg));
    let storage = bot.storage().clone();
    bot.respond("what is (.+)", move |msg| what_is(storage.clone(), msg));

    let runner = bot.clone();
    let mut run = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut run => {
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        _ = cli.input_finished() => info!("End of input, shutting down"),
    }

    bot.shutdown().await?;
    run.await??;
    Ok(())
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    match &cli.command {
        Commands::Run(args) => {
            let config = apply_overrides(config, args)?;
            debug!("Effective config: {:?}", config);
            run_bot(config).await
        }
        Commands::Check => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run(&cli));
    // A pending stdin read would otherwise keep the runtime alive.
    runtime.shutdown_timeout(Duration::from_millis(100));

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
