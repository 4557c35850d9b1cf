use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Management CLI for the relay router", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "RELAY_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show router status and balancing settings
    Status,
    /// List servers with health counters
    Servers,
    /// Enable a server
    Enable { id: String },
    /// Disable a server
    Disable { id: String },
    /// Clear error counters of one server, or of all servers
    ClearError { id: Option<String> },
    /// Clear max speed of all servers
    ClearMaxSpeed,
    /// Clear transfer totals of all servers
    ClearTotal,
    /// Pin the server at a pool index
    Pin { index: usize },
    /// Switch to a random server for a local port
    Switch { port: u16 },
    /// Ask which server a connection would use
    Resolve {
        port: u16,
        destination: Option<String>,
        /// Honour sticky routing for the destination
        #[arg(long)]
        sticky: bool,
    },
}

enum Method {
    Get,
    Post,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let mut query: Vec<(&str, String)> = Vec::new();
    let (method, path) = match &cli.command {
        Commands::Status => (Method::Get, "/admin/status".to_string()),
        Commands::Servers => (Method::Get, "/admin/servers".to_string()),
        Commands::Enable { id } => (Method::Post, format!("/admin/servers/{}/enable", id)),
        Commands::Disable { id } => (Method::Post, format!("/admin/servers/{}/disable", id)),
        Commands::ClearError { id: Some(id) } => {
            (Method::Post, format!("/admin/servers/{}/clear-error", id))
        }
        Commands::ClearError { id: None } => (Method::Post, "/admin/clear-error".to_string()),
        Commands::ClearMaxSpeed => (Method::Post, "/admin/clear-max-speed".to_string()),
        Commands::ClearTotal => (Method::Post, "/admin/clear-total".to_string()),
        Commands::Pin { index } => (Method::Post, format!("/admin/pin/{}", index)),
        Commands::Switch { port } => (Method::Post, format!("/admin/switch/{}", port)),
        Commands::Resolve { port, destination, sticky } => {
            query.push(("port", port.to_string()));
            query.push(("sticky", sticky.to_string()));
            if let Some(destination) = destination {
                query.push(("destination", destination.clone()));
            }
            (Method::Get, "/admin/resolve".to_string())
        }
    };

    let url = format!("{}{}", cli.url.trim_end_matches('/'), path);
    let request = match method {
        Method::Get => client.get(url).query(&query),
        Method::Post => client.post(url),
    };
    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
