//! Stormwatch CLI
//!
//! Usage:
//!   stormwatch run [-c config.yaml]           # One monitoring pass
//!   stormwatch run --dev-chat-id 123          # Send only to one chat
//!   stormwatch run --dry-run                  # Print messages instead of sending
//!   stormwatch watch [-c config.yaml]         # Run passes on the configured schedule
//!   stormwatch bot [-c config.yaml]           # Interactive bot (long polling)
//!   stormwatch status [-f table|json]         # Configuration overview
//!   stormwatch subscribers list               # List subscribers
//!   stormwatch subscribers add <chat-id>      # Add a subscriber
//!   stormwatch subscribers remove <chat-id>   # Remove a subscriber

use argh::FromArgs;
use stormwatch::cli::{BotCommand, RunCommand, StatusCommand, SubscribersCommand, WatchCommand};

/// Stormwatch - weather threshold alerts over Telegram
#[derive(FromArgs)]
struct Args {
    /// show version information
    #[argh(switch, short = 'V')]
    version: bool,

    /// enable debug logging
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    command: Option<Command>,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Watch(WatchCommand),
    Bot(BotCommand),
    Status(StatusCommand),
    Subscribers(SubscribersCommand),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Args = argh::from_env();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(format!("warn,stormwatch={}", level)),
    )
    .target(env_logger::Target::Stderr)
    .init();

    // Handle --version flag
    if args.version {
        println!("stormwatch {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match args.command {
        // No subcommand = show help
        None => {
            eprintln!("Stormwatch - weather threshold alerts over Telegram\n");
            eprintln!("Usage: stormwatch <command>\n");
            eprintln!("Commands:");
            eprintln!("  run          Run one monitoring pass:");
            eprintln!("                 -c, --config <path>: config file (default: config.yaml)");
            eprintln!("                 --dev-chat-id <id>: send only to this chat");
            eprintln!("                 --dry-run: print messages instead of sending");
            eprintln!("  watch        Run passes on the configured schedule until Ctrl+C");
            eprintln!("  bot          Run the interactive bot until Ctrl+C");
            eprintln!("  status       Show the configuration overview");
            eprintln!("                 -f, --format <fmt>: table|json (default: table)");
            eprintln!("  subscribers  Manage subscribers:");
            eprintln!("                 list, add, remove");
            eprintln!("\nRun 'stormwatch <command> --help' for more information.");
            return Ok(());
        }
        Some(Command::Run(cmd)) => cmd.run().await?,
        Some(Command::Watch(cmd)) => cmd.run().await?,
        Some(Command::Bot(cmd)) => cmd.run().await?,
        Some(Command::Status(cmd)) => cmd.run().await?,
        Some(Command::Subscribers(cmd)) => cmd.run().await?,
    }

    Ok(())
}
