use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Operator CLI for the admission-guard admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GUARD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pipeline status
    Status,
    /// Query retained security events
    Events {
        #[arg(long)]
        origin: Option<String>,
        #[arg(long)]
        threat_level: Option<String>,
        #[arg(long)]
        severity: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 50)]
        per_page: usize,
    },
    /// Export retained events (json or csv)
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// List active alerts
    Alerts {
        #[arg(long)]
        severity: Option<String>,
    },
    /// Resolve an alert
    Resolve {
        id: String,
        #[arg(long)]
        by: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List active blocks
    Blocks,
    /// Show recently ended blocks
    History,
    /// Block an IP
    Block {
        ip: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        duration_secs: Option<u64>,
        #[arg(long)]
        permanent: bool,
    },
    /// Lift a block
    Unblock {
        ip: String,
        #[arg(long)]
        by: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Show violation counts and history for an IP
    Violations { ip: String },
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
    let base = cli.url.trim_end_matches('/');
    let get = |path: String| client.get(format!("{base}{path}")).headers(headers.clone());
    let post = |path: String, body: Value| {
        client
            .post(format!("{base}{path}"))
            .headers(headers.clone())
            .json(&body)
    };

    match cli.command {
        Commands::Status => print_response(get("/admin/status".into()).send().await?).await?,
        Commands::Events {
            origin,
            threat_level,
            severity,
            page,
            per_page,
        } => {
            let mut query: Vec<(&str, String)> = vec![("page", page.to_string()), ("per_page", per_page.to_string())];
            query.extend(origin.map(|v| ("origin", v)));
            query.extend(threat_level.map(|v| ("threat_level", v)));
            query.extend(severity.map(|v| ("severity", v)));
            print_response(get("/admin/events".into()).query(&query).send().await?).await?;
        }
        Commands::Export { format } => {
            let res = get("/admin/events/export".into())
                .query(&[("format", format)])
                .send()
                .await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }
            print!("{}", res.text().await?);
        }
        Commands::Alerts { severity } => {
            let mut req = get("/admin/alerts".into());
            if let Some(severity) = severity {
                req = req.query(&[("severity", severity)]);
            }
            print_response(req.send().await?).await?;
        }
        Commands::Resolve { id, by, notes } => {
            let body = json!({ "resolved_by": by, "notes": notes });
            print_response(post(format!("/admin/alerts/{id}/resolve"), body).send().await?).await?;
        }
        Commands::Blocks => print_response(get("/admin/blocks".into()).send().await?).await?,
        Commands::History => print_response(get("/admin/blocks/history".into()).send().await?).await?,
        Commands::Block {
            ip,
            reason,
            duration_secs,
            permanent,
        } => {
            let body = json!({
                "ip": ip,
                "reason": reason,
                "duration_secs": duration_secs,
                "permanent": permanent,
            });
            print_response(post("/admin/blocks".into(), body).send().await?).await?;
        }
        Commands::Unblock { ip, by, reason } => {
            let body = json!({ "unblocked_by": by, "reason": reason });
            print_response(post(format!("/admin/blocks/{ip}/unblock"), body).send().await?).await?;
        }
        Commands::Violations { ip } => {
            print_response(get(format!("/admin/violations/{ip}")).send().await?).await?
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
