//! Schemata Command-Line Client
//!
//! Creates, applies and reverts structural schema migrations.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;
mod config;
mod error;
mod formatter;

use clap::Parser;
use commands::CreateOptions;
use config::{Args, Command};
use error::CliError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Initialize tracing on stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schemata=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("error[{}]: {}", e.kind(), e);
            std::process::exit(e.exit_code());
        }
    }
}

fn run(args: Args) -> Result<String, CliError> {
    let command = args.command.clone();
    let config = args.into_config();
    let formatter = formatter::create_formatter(config.format);

    tracing::debug!(
        migrations_dir = %config.migrations_dir.display(),
        data_path = %config.data_path.display(),
        target_id = %config.target,
        "configuration loaded"
    );

    match command {
        Command::CreateMigration {
            name,
            snapshot,
            renames,
            accept_incompatible,
            allow_empty,
        } => {
            let options = CreateOptions {
                name,
                renames,
                accept_incompatible,
                allow_empty,
            };
            commands::create_migration(&config, &snapshot, &options, &*formatter)
        }
        Command::Apply {
            to,
            allow_destructive,
        } => commands::apply(&config, to, allow_destructive, &*formatter),
        Command::Revert { to } => commands::revert(&config, to, &*formatter),
        Command::Status => commands::status(&config, &*formatter),
    }
}
