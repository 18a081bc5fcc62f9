//! finmcp - MCP tool servers and client for financial research agents.
//!
//! Starts tool servers, lists the merged catalog of running servers and
//! invokes tools from the command line.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use finmcp::mcp::{register_builtin_tools, McpClient, McpServer, Parameters, ToolRegistry};
use finmcp::Config;

/// MCP tool servers and client for financial research agents
#[derive(Parser)]
#[command(name = "finmcp")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use this config file instead of the default lookup
    #[arg(short, long, global = true, env = "FINMCP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the configured MCP servers with the built-in tools
    Serve {
        /// Port for the server (only when a single server is started)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List tools available on MCP servers
    Tools {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Server URLs (defaults to client.servers from the config)
        urls: Vec<String>,
    },

    /// Invoke a tool and print its result
    Invoke {
        /// Tool id
        tool: String,

        /// Parameters as a JSON object or plain text
        #[arg(short, long)]
        params: Option<String>,

        /// Server URLs (defaults to client.servers from the config)
        urls: Vec<String>,
    },

    /// Check the health of a server
    Health {
        /// Server URL
        url: String,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };

    // Setup logging: RUST_LOG wins, then -v, then the config file
    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port } => cmd_serve(&config, port),
        Commands::Tools { format, urls } => cmd_tools(&config, &format, urls),
        Commands::Invoke { tool, params, urls } => cmd_invoke(&config, &tool, params, urls),
        Commands::Health { url } => cmd_health(&config, url),
        Commands::Config { path } => cmd_config(&config, cli.config.as_deref(), path),
    }
}

/// Start every configured server and run until Ctrl-C.
fn cmd_serve(config: &Config, port: Option<u16>) -> Result<()> {
    let mut servers = config.server_configs();
    if let Some(port) = port {
        if servers.len() > 1 {
            anyhow::bail!("--port only applies when a single server is configured ({} found)", servers.len());
        }
        for (server, _) in &mut servers {
            server.port = port;
        }
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let mut running = Vec::new();
        let mut tasks = Vec::new();

        for (server_config, tools) in servers {
            let mut registry = ToolRegistry::new();
            register_builtin_tools(&mut registry, &tools);

            let server = McpServer::new(server_config, registry);
            let listener = server.bind().await?;
            println!("{} listening on ws://{}", server.config().name, listener.local_addr()?);

            let serving = server.clone();
            tasks.push(tokio::spawn(async move { serving.serve(listener).await }));
            running.push(server);
        }

        println!("\nPress Ctrl-C to stop.");
        tokio::signal::ctrl_c().await?;
        println!("\nShutting down...");

        for server in &running {
            server.shutdown();
        }
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Server stopped with an error"),
                Err(e) => tracing::error!(error = %e, "Server task panicked"),
            }
        }
        Ok::<_, anyhow::Error>(())
    })
}

/// List the merged catalog.
fn cmd_tools(config: &Config, format: &str, urls: Vec<String>) -> Result<()> {
    if !matches!(format, "text" | "json") {
        anyhow::bail!("Unknown format '{}'. Use 'text' or 'json'.", format);
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let client = connect(config, urls).await?;

        if format == "json" {
            println!("{}", serde_json::to_string_pretty(&client.prompt_tools())?);
        } else {
            let entries = client.list_tools();
            println!("Available MCP tools:\n");
            if entries.is_empty() {
                println!("  No tools available.");
            }
            for entry in &entries {
                println!("  [{}] {} - {}", entry.server, entry.tool.id, entry.tool.description);
                let required: Vec<&str> =
                    entry.tool.parameters.iter().filter(|p| p.required).map(|p| p.name.as_str()).collect();
                if !required.is_empty() {
                    println!("    Required: {}", required.join(", "));
                }
            }
            println!("\nTotal: {} tool(s)", entries.len());
        }

        client.disconnect().await;
        Ok::<_, anyhow::Error>(())
    })
}

/// Invoke one tool.
fn cmd_invoke(config: &Config, tool: &str, params: Option<String>, urls: Vec<String>) -> Result<()> {
    let parameters = params.map_or_else(Parameters::default, Parameters::from);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let client = connect(config, urls).await?;
        let result = client.invoke(tool, parameters).await;
        client.disconnect().await;
        Ok::<_, anyhow::Error>(result?)
    })?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Print a server's health report.
fn cmd_health(config: &Config, url: String) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let client = connect(config, vec![url.clone()]).await?;
        let report = client.health(&url).await;
        let info = client.server_info(&url);
        client.disconnect().await;

        let report = serde_json::json!({ "server": info, "health": report? });
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok::<_, anyhow::Error>(())
    })
}

/// Show configuration.
fn cmd_config(config: &Config, explicit: Option<&std::path::Path>, show_path: bool) -> Result<()> {
    if show_path {
        match explicit.map(PathBuf::from).or_else(Config::find) {
            Some(path) => println!("{}", path.display()),
            None => match Config::config_dir() {
                Some(dir) => println!("{} (not found, using defaults)", dir.join("config.toml").display()),
                None => println!("No config file found, using defaults"),
            },
        }
        return Ok(());
    }

    print!("{}", config.to_toml()?);
    Ok(())
}

/// Connect a client to the given URLs, or to the configured ones.
async fn connect(config: &Config, urls: Vec<String>) -> Result<McpClient> {
    let mut client_config = config.client_config();
    if !urls.is_empty() {
        client_config.servers = urls;
    }
    if client_config.servers.is_empty() {
        anyhow::bail!(
            "No MCP servers given.\n\n  Pass server URLs or add them to .finmcp.toml:\n    [client]\n    servers = [\"ws://localhost:8080\"]"
        );
    }

    let client = McpClient::new(client_config);
    client.connect_configured().await?;
    Ok(client)
}
