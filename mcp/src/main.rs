use std::path::PathBuf;

use clap::Parser;

use lattice_mcp_runtime::{McpCommands, McpRuntimeConfig, run};

#[derive(Parser)]
#[command(
    name = "lattice-mcp",
    version,
    about = "Lattice MCP server — issue-tracker tools over stdio"
)]
struct Cli {
    /// Platform base URL
    #[arg(long, env = "LATTICE_URL", default_value = "http://localhost:8087")]
    url: String,

    /// Account email for the platform handshake
    #[arg(long, env = "LATTICE_EMAIL")]
    email: String,

    /// Account password for the platform handshake
    #[arg(long, env = "LATTICE_PASSWORD")]
    password: String,

    /// Workspace selector passed to selectWorkspace
    #[arg(long, env = "LATTICE_WORKSPACE")]
    workspace: String,

    /// Connection string for the platform's backing store
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// JSON file with the creator/assignee identity tables
    #[arg(long, env = "LATTICE_IDENTITY_FILE")]
    identity_file: Option<PathBuf>,

    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries the MCP protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lattice_mcp_runtime=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = McpRuntimeConfig {
        base_url: cli.url,
        email: cli.email,
        password: cli.password,
        workspace: cli.workspace,
        database_url: cli.database_url,
        identity_file: cli.identity_file,
    };

    let code = run(config, cli.command).await;
    std::process::exit(code);
}
