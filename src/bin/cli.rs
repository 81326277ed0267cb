//! mcbin CLI
//!
//! Command-line interface for poking at a cache cluster.

use clap::{Parser, Subcommand};
use mcbin::{Client, ClientConfig, SetEntry, Value};

/// mcbin CLI
#[derive(Parser, Debug)]
#[command(name = "mcbin-cli")]
#[command(about = "CLI for memcached binary-protocol clusters")]
struct Args {
    /// Server address (host:port or unix:/path); repeat for a cluster
    #[arg(short, long, default_value = "127.0.0.1:11211")]
    server: Vec<String>,

    /// SASL username
    #[arg(long)]
    username: Option<String>,

    /// SASL password
    #[arg(long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Set several key=value pairs in one batch
    SetMulti {
        /// key=value pairs
        pairs: Vec<String>,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Increment a counter
    Incr {
        key: String,

        #[arg(default_value_t = 1)]
        delta: u64,
    },

    /// Decrement a counter
    Decr {
        key: String,

        #[arg(default_value_t = 1)]
        delta: u64,
    },

    /// Fetch server statistics
    Stats {
        /// Optional category (e.g. settings, slabs)
        category: Option<String>,
    },

    /// Clear all keys on every server
    Flush,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> mcbin::Result<()> {
    let mut builder = ClientConfig::builder().servers(args.server.iter().map(String::as_str));
    if let (Some(user), Some(pass)) = (args.username, args.password) {
        builder = builder.credentials(user, pass);
    }
    let client = Client::new(builder.build()?)?;

    match args.command {
        Commands::Get { key } => match client.get(&key)? {
            Some(value) => println!("{}", render(&value)),
            None => println!("(not found)"),
        },
        Commands::Set { key, value } => {
            println!("{}", client.set(&key, value.as_str())?);
        }
        Commands::SetMulti { pairs } => {
            let entries = parse_pairs(&pairs)?;
            println!("{}", client.set_multi(&entries)?);
        }
        Commands::Del { key } => {
            println!("{}", client.delete(&key)?);
        }
        Commands::Incr { key, delta } => {
            println!("{}", client.incr(&key, delta)?);
        }
        Commands::Decr { key, delta } => {
            println!("{}", client.decr(&key, delta)?);
        }
        Commands::Stats { category } => {
            let stats = client.stats(category.as_deref())?;
            for (server, entries) in stats {
                println!("[{}]", server);
                for (name, value) in entries {
                    println!("{} = {}", name, value);
                }
            }
        }
        Commands::Flush => {
            println!("{}", client.flush_all()?);
        }
    }

    client.disconnect_all();
    Ok(())
}

/// Parse `key=value` arguments, rejecting anything without an `=`
fn parse_pairs(pairs: &[String]) -> mcbin::Result<Vec<SetEntry>> {
    let mut entries = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let Some((k, v)) = pair.split_once('=') else {
            return Err(mcbin::McError::Config(format!(
                "malformed pair {:?}, expected key=value",
                pair
            )));
        };
        entries.push(SetEntry::new(k, v));
    }
    Ok(entries)
}

fn render(value: &Value) -> String {
    match value {
        Value::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Object(blob) => format!("(object, {} bytes)", blob.len()),
        Value::Int(n) => n.to_string(),
        Value::BigInt(n) => n.to_string(),
    }
}
