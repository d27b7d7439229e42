mod error;

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use clap::Parser;
use runtime::{AnthropicBackend, FnSink, Host};
use tracing_subscriber::EnvFilter;

use error::{Error, Result};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Parser)]
#[command(name = "coxswain")]
#[command(about = "Chat with a model that can call MCP tool servers", long_about = None)]
#[command(version)]
struct Cli {
    /// Model to query (overrides COXSWAIN_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// Servers to launch: <name> <script> [KEY=VALUE]... groups
    #[arg(required = true, num_args = 1..)]
    servers: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let specs = parse_server_specs(&cli.servers)?;

    let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| Error::MissingApiKey)?;
    let model = cli
        .model
        .or_else(|| std::env::var("COXSWAIN_MODEL").ok())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    println!("coxswain v{}", env!("CARGO_PKG_VERSION"));
    println!("Model: {model}");

    let backend = AnthropicBackend::builder(api_key, &model).build();
    let host = Host::new(backend);

    for (name, path, env) in specs {
        let capabilities = host.add_server(&name, &path, env).await?;
        println!("Connected to server '{name}' with capabilities:");
        for capability in capabilities {
            println!(
                "  {} - {}",
                capability.name,
                capability.description.as_deref().unwrap_or("")
            );
        }
    }

    println!("\nType 'quit' or Ctrl+D to exit.\n");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        let mut sink = FnSink(|text: &str| {
            print!("{text}");
            let _ = io::stdout().flush();
        });
        match host.run_query(input, &mut sink).await {
            Ok(_) => println!("\n"),
            Err(e) => eprintln!("\nError: {e}\n"),
        }
    }

    host.shutdown().await;
    println!("\nAll servers stopped.");
    Ok(())
}

/// Split the positional arguments into `(name, script, env)` groups.
///
/// Each group is a server name, a script path, and zero or more KEY=VALUE
/// environment entries; the next argument without a `=` starts a new group.
fn parse_server_specs(args: &[String]) -> Result<Vec<(String, String, HashMap<String, String>)>> {
    let mut specs = Vec::new();
    let mut iter = args.iter().peekable();

    while let Some(name) = iter.next() {
        if name.contains('=') {
            return Err(Error::InvalidServerSpec(format!(
                "expected a server name, got '{name}'"
            )));
        }
        let path = iter.next().ok_or_else(|| {
            Error::InvalidServerSpec(format!("server '{name}' is missing a script path"))
        })?;

        let mut env = HashMap::new();
        while let Some(next) = iter.peek() {
            let Some((key, value)) = next.split_once('=') else {
                break;
            };
            env.insert(key.to_string(), value.to_string());
            iter.next();
        }

        specs.push((name.clone(), path.clone(), env));
    }

    Ok(specs)
}
