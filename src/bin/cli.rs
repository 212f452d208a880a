//! mapkv CLI Client
//!
//! Command-line interface for interacting with a mapkv server.

use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mapkv::protocol::{MAX_KEY_LENGTH, MAX_VALUE_LENGTH};
use mapkv::{Client, Operation, Request};
use tracing_subscriber::{fmt, EnvFilter};

/// mapkv CLI
#[derive(Parser, Debug)]
#[command(name = "mapkv-cli")]
#[command(about = "CLI for the mapkv key-value store")]
#[command(
    after_help = format!(
        "KEY is at most {} bytes and VALUE at most {} bytes.\n\
         The server answers with an error when INSERT finds the key, when UPDATE \
         misses it or sees the same value, and when DELETE or GET miss it.",
        MAX_KEY_LENGTH, MAX_VALUE_LENGTH
    )
)]
#[command(version)]
struct Args {
    /// Server address (ip:port)
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    server: SocketAddr,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert a new key-value pair
    Insert {
        /// The key to insert
        key: String,

        /// The value to store
        value: String,
    },

    /// Change the value of an existing key
    Update {
        /// The key to update
        key: String,

        /// The new value
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Read `OPERATION KEY [VALUE]` lines from stdin until EOF
    ///
    /// OPERATION is 0|I|INSERT, 1|U|UPDATE, 2|D|DELETE or 3|G|GET.
    Shell,
}

impl Commands {
    fn into_request(self) -> Option<Request> {
        match self {
            Self::Insert { key, value } => Some(Request::insert(key, value)),
            Self::Update { key, value } => Some(Request::update(key, value)),
            Self::Delete { key } => Some(Request::delete(key)),
            Self::Get { key } => Some(Request::get(key)),
            Self::Shell => None,
        }
    }
}

/// Parse one shell line into a request
fn parse_line(line: &str) -> mapkv::Result<Request> {
    let mut parts = line.trim().splitn(3, char::is_whitespace);
    let operation: Operation = parts.next().unwrap_or_default().parse()?;
    let key = parts.next().unwrap_or_default().to_string();
    let value = if operation.takes_value() {
        parts.next().unwrap_or_default().to_string()
    } else {
        String::new()
    };
    Ok(Request::new(operation, key, value))
}

/// Send one request and print the outcome; returns whether it reached the server
fn execute(client: &mut Client, server: SocketAddr, request: &Request) -> bool {
    println!("{}", request);
    match client.send(server, request) {
        Ok(response) => {
            println!("{}", response);
            true
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            false
        }
    }
}

fn shell(client: &mut Client, server: SocketAddr) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    write!(stdout, "> ")?;
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        match line.trim() {
            "" => {}
            "quit" | "exit" => break,
            text => match parse_line(text) {
                Ok(request) => {
                    execute(client, server, &request);
                }
                Err(e) => eprintln!("{}", e),
            },
        }
        write!(stdout, "> ")?;
        stdout.flush()?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let args = Args::parse();
    let mut client = Client::new();

    match args.command.into_request() {
        Some(request) => {
            if execute(&mut client, args.server, &request) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        None => match shell(&mut client, args.server) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}
