//! Inspect or clear the coordination keys of a resource.
//!
//! `show` prints the seven protocol keys with their current values; `purge`
//! deletes them. Purging is only safe when no participant is active.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rwcoord::{dump_resource_state, purge_resource_state, RedisStore, StoreEndpoint};

#[derive(Parser)]
#[command(name = "rwcoord-admin", about = "Inspect and clean up coordination keys")]
struct Cli {
    /// Coordination store host.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Coordination store port.
    #[arg(long, default_value_t = 6379)]
    port: u16,

    /// Database index.
    #[arg(long, default_value_t = 0)]
    db: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the protocol keys for a resource and their current values.
    Show { resource: String },
    /// Delete the protocol keys for a resource.
    Purge { resource: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let endpoint = StoreEndpoint {
        host: cli.host,
        port: cli.port,
        db: cli.db,
    };
    let store = RedisStore::connect(&endpoint)?;
    match cli.command {
        Command::Show { resource } => {
            for (key, value) in dump_resource_state(&store, &resource)? {
                match value {
                    Some(value) => println!("{}\t{}", key, value),
                    None => println!("{}\t<absent>", key),
                }
            }
        }
        Command::Purge { resource } => {
            let removed = purge_resource_state(&store, &resource)?;
            println!("removed {} key(s)", removed);
        }
    }
    Ok(())
}
