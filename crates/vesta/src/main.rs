use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use vesta::Config;
use vesta::Engine;
use vesta::config::LoggingConfig;
use vesta::format_diagnostics;
use vesta::runtime;
use vesta::store::JsonFileStore;

#[derive(Parser, Debug)]
#[command(name = "vesta", version, about = "Simulated smart-home assistant")]
struct Cli {
    /// Config files, merged in order; repeat for more than one
    #[arg(short, long = "config", value_name = "FILE")]
    config: Vec<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Interactive console (the default)
    Repl,

    /// Run a single command and exit
    Say {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Serve the HTTP API
    Serve,
}

fn init_logging(logging: &LoggingConfig) {
    let targets = Targets::new()
        .with_default(LevelFilter::from(logging.level))
        .with_targets(
            logging
                .overrides
                .iter()
                .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
        );

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(targets)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.is_empty() {
        Config::default()
    } else {
        let (config, diagnostics) =
            Config::from_files(&cli.config).context("Failed to load configuration")?;
        if !diagnostics.is_empty() {
            eprint!("{}", format_diagnostics(&diagnostics));
        }
        config
    };

    init_logging(&config.logging);
    tracing::info!("vesta starting");
    tracing::debug!(?config, "configuration loaded");

    let store = JsonFileStore::new(&config.store.data_dir);
    let mut engine = Engine::new(Box::new(store), config.profile_defaults(), config.timings());

    match cli.command.unwrap_or(Command::Repl) {
        Command::Repl => runtime::repl(engine, config.tick_period()).await,
        Command::Say { text } => {
            for reply in runtime::say(&mut engine, &text.join(" "))? {
                println!("{}", reply);
            }
            Ok(())
        }
        Command::Serve => {
            runtime::serve(
                engine,
                config.api.listen.clone(),
                config.api.port,
                config.tick_period(),
            )
            .await
        }
    }
}
