use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "leasectl")]
#[command(about = "CLI for raftlease lease management")]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:17070")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Status,
    Servers,

    #[command(subcommand)]
    Lease(LeaseCommands),
}

#[derive(Args)]
struct KeyArgs {
    #[arg(short, long)]
    namespace: String,

    #[arg(short, long)]
    model: String,

    #[arg(short, long)]
    lease: String,
}

impl KeyArgs {
    fn to_json(&self) -> serde_json::Map<String, Value> {
        let mut body = serde_json::Map::new();
        body.insert("namespace".into(), self.namespace.clone().into());
        body.insert("model_uuid".into(), self.model.clone().into());
        body.insert("lease".into(), self.lease.clone().into());
        body
    }
}

#[derive(Subcommand)]
enum LeaseCommands {
    List,
    Claim {
        #[command(flatten)]
        key: KeyArgs,

        #[arg(long)]
        holder: String,

        #[arg(short, long, default_value = "60")]
        duration: u64,
    },
    Extend {
        #[command(flatten)]
        key: KeyArgs,

        #[arg(long)]
        holder: String,

        #[arg(short, long, default_value = "60")]
        duration: u64,
    },
    Revoke {
        #[command(flatten)]
        key: KeyArgs,

        #[arg(long)]
        holder: String,
    },
}

async fn get(client: &reqwest::Client, url: String) -> Result<Value> {
    Ok(client.get(url).send().await?.json().await?)
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> Result<Value> {
    Ok(client.post(url).json(&body).send().await?.json().await?)
}

fn lease_body(key: &KeyArgs, holder: String, duration: Option<u64>) -> Value {
    let mut body = key.to_json();
    body.insert("holder".into(), holder.into());
    if let Some(secs) = duration {
        body.insert("duration_secs".into(), secs.into());
    }
    Value::Object(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base_url = cli.addr;

    let resp = match cli.command {
        Commands::Status => get(&client, format!("{}/status", base_url)).await?,
        Commands::Servers => get(&client, format!("{}/servers", base_url)).await?,
        Commands::Lease(cmd) => match cmd {
            LeaseCommands::List => get(&client, format!("{}/leases", base_url)).await?,
            LeaseCommands::Claim {
                key,
                holder,
                duration,
            } => {
                let body = lease_body(&key, holder, Some(duration));
                post(&client, format!("{}/leases/claim", base_url), body).await?
            }
            LeaseCommands::Extend {
                key,
                holder,
                duration,
            } => {
                let body = lease_body(&key, holder, Some(duration));
                post(&client, format!("{}/leases/extend", base_url), body).await?
            }
            LeaseCommands::Revoke { key, holder } => {
                let body = lease_body(&key, holder, None);
                post(&client, format!("{}/leases/revoke", base_url), body).await?
            }
        },
    };

    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}
