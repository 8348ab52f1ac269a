use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use votebox::config::ConfigError;
use votebox::net::types::{NewUser, TokenResponse, parse};
use votebox::{ApiClient, AuthStore, ClientConfig, ClientError, RequestOptions, StorageError};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("login request failed: {0}")]
    Login(#[from] reqwest::Error),
    #[error("login rejected: {0}")]
    LoginRejected(String),
    #[error("{0}")]
    Client(#[from] ClientError),
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "votebox", about = "Voting API client")]
struct Cli {
    #[arg(long, env = "VOTEBOX_API_BASE")]
    api_base: Option<String>,

    #[arg(long, env = "VOTEBOX_STORAGE_PATH")]
    storage_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange credentials for a session token and store it.
    Login {
        username: String,
        #[arg(long, env = "VOTEBOX_PASSWORD")]
        password: String,
    },
    /// Forget the stored session token.
    Logout,
    /// Create a voter account.
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "VOTEBOX_PASSWORD")]
        password: String,
    },
    /// Browse elections and their candidates.
    Elections(ElectionsCommand),
    /// Cast a vote for a candidate in an election.
    Vote {
        election_id: i64,
        candidate_id: i64,
    },
    /// Show tallied results for an election.
    Results {
        election_id: i64,
    },
    /// Show the auth state as seeded from storage.
    Status,
    /// Send a raw request through the authorized request path.
    Api {
        method: String,
        endpoint: String,
        #[arg(long)]
        data: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ElectionsCommand {
    #[command(subcommand)]
    command: ElectionsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ElectionsSubcommand {
    /// List all elections.
    List,
    /// List candidates standing in one election.
    Candidates { election_id: i64 },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(api_base) = cli.api_base {
        config.api_base = api_base.trim_end_matches('/').to_owned();
    }
    if let Some(storage_path) = cli.storage_path {
        config.storage_path = storage_path;
    }

    tracing::debug!(
        api_base = %config.api_base,
        storage = ?config.storage,
        storage_path = %config.storage_path.display(),
        "cli config resolved"
    );

    let storage = config.open_storage();
    let client = config.api_client(storage.clone());
    let auth = AuthStore::new(storage);

    match cli.command {
        Command::Login { username, password } => run_login(&client, &auth, &username, &password).await,
        Command::Logout => {
            auth.logout()?;
            eprintln!("logged out");
            Ok(())
        }
        Command::Register {
            username,
            email,
            password,
        } => {
            let user = NewUser { username, email, password };
            print_json(&client.register(&user).await?)
        }
        Command::Elections(elections) => match elections.command {
            ElectionsSubcommand::List => print_json(&client.get_elections().await?),
            ElectionsSubcommand::Candidates { election_id } => {
                print_json(&client.get_election_candidates(election_id).await?)
            }
        },
        Command::Vote {
            election_id,
            candidate_id,
        } => print_json(&client.vote(election_id, candidate_id).await?),
        Command::Results { election_id } => print_json(&client.get_results(election_id).await?),
        Command::Status => print_json(&status_json(&auth)),
        Command::Api {
            method,
            endpoint,
            data,
        } => run_api(&client, &method, &endpoint, data.as_deref()).await,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run_login(client: &ApiClient, auth: &AuthStore, username: &str, password: &str) -> Result<(), CliError> {
    let body = client.login(username, password).await?;
    if body.get("access_token").is_none() {
        let detail = body
            .get("detail")
            .and_then(Value::as_str)
            .map_or_else(|| body.to_string(), ToOwned::to_owned);
        return Err(CliError::LoginRejected(detail));
    }

    let token: TokenResponse = parse(&body)?;
    let user = token.user.ok_or(CliError::MissingField("user"))?;
    auth.login(&token.access_token, user)?;
    print_json(&status_json(auth))
}

async fn run_api(client: &ApiClient, method: &str, endpoint: &str, data: Option<&str>) -> Result<(), CliError> {
    let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| CliError::InvalidMethod(method.to_owned()))?;
    let options = match data {
        Some(raw) => RequestOptions::json(serde_json::from_str(raw)?),
        None => RequestOptions::default(),
    };
    print_json(&client.request(method, endpoint, options).await?)
}

/// Auth snapshot with the token itself redacted.
fn status_json(auth: &AuthStore) -> Value {
    let state = auth.snapshot();
    serde_json::json!({
        "user": state.user,
        "has_token": state.token.is_some(),
        "is_authenticated": state.is_authenticated,
    })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
