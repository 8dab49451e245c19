use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use beacon_core::{CategoryMap, Signal};
use beacon_daemon::jira::JiraClient;
use beacon_daemon::poller::Poller;
use beacon_daemon::relay::RelayServer;

const DEFAULT_BIND: &str = "127.0.0.1:52521";

#[derive(Parser)]
#[command(name = "beacond", about = "Ticket status relay for indicator clients")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server and Jira poller (default when no subcommand given)
    Daemon {
        /// Address the relay listens on
        #[arg(long, default_value = DEFAULT_BIND)]
        bind: SocketAddr,

        /// Jira base URL; when unset the daemon runs relay-only
        #[arg(long, env = "JIRA_URL")]
        jira_url: Option<String>,

        /// Jira personal access token
        #[arg(long, env = "JIRA_TOKEN")]
        jira_token: Option<String>,

        /// Custom JQL search; defaults to an open-issue query for --issue-type
        #[arg(long, env = "JIRA_JQL")]
        jql: Option<String>,

        /// Issue type id used for the fallback JQL query
        #[arg(long, default_value = "11206")]
        issue_type: String,

        /// Polling interval in minutes
        #[arg(long, default_value_t = 5)]
        poll_interval_minutes: u64,

        /// Issue type id mapped to the incident indicator
        #[arg(long, default_value = "11206")]
        incident_type_id: String,

        /// Issue type id mapped to the alert indicator
        #[arg(long, default_value = "13802")]
        alert_type_id: String,

        /// Maximum concurrent indicator clients
        #[arg(long, default_value_t = 64)]
        max_connections: usize,
    },
    /// Set the queue indicator on a running relay (operator input)
    Send {
        /// Relay address to connect to
        #[arg(long, default_value = DEFAULT_BIND)]
        addr: SocketAddr,

        /// Queue token: QUEUE_RED or QUEUE_GREEN
        token: String,
    },
    /// Connect to a relay and print every received token
    Watch {
        /// Relay address to connect to
        #[arg(long, default_value = DEFAULT_BIND)]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing. Respects RUST_LOG env var, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        // Default to daemon when no subcommand is given.
        None => run_daemon(DaemonOpts::default()).await?,
        Some(Commands::Daemon {
            bind,
            jira_url,
            jira_token,
            jql,
            issue_type,
            poll_interval_minutes,
            incident_type_id,
            alert_type_id,
            max_connections,
        }) => {
            run_daemon(DaemonOpts {
                bind,
                jira_url,
                jira_token,
                jql,
                issue_type,
                poll_interval_minutes,
                incident_type_id,
                alert_type_id,
                max_connections,
            })
            .await?;
        }
        Some(Commands::Send { addr, token }) => run_send(addr, &token).await?,
        Some(Commands::Watch { addr }) => run_watch(addr).await?,
    }

    Ok(())
}

struct DaemonOpts {
    bind: SocketAddr,
    jira_url: Option<String>,
    jira_token: Option<String>,
    jql: Option<String>,
    issue_type: String,
    poll_interval_minutes: u64,
    incident_type_id: String,
    alert_type_id: String,
    max_connections: usize,
}

impl Default for DaemonOpts {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 52521)),
            jira_url: std::env::var("JIRA_URL").ok(),
            jira_token: std::env::var("JIRA_TOKEN").ok(),
            jql: std::env::var("JIRA_JQL").ok(),
            issue_type: "11206".into(),
            poll_interval_minutes: 5,
            incident_type_id: "11206".into(),
            alert_type_id: "13802".into(),
            max_connections: 64,
        }
    }
}

async fn run_daemon(opts: DaemonOpts) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let server =
        RelayServer::new(opts.bind, cancel.clone()).with_max_connections(opts.max_connections);
    let relay = server.handle();

    // Jira integration is optional: without it the daemon still relays
    // operator-originated signals between clients.
    let poller = match (&opts.jira_url, &opts.jira_token) {
        (Some(url), Some(token)) => {
            let client = JiraClient::new(url.clone(), token.clone());
            start_poller(client, relay.clone(), &opts).await
        }
        _ => {
            tracing::warn!(
                "jira settings not found (JIRA_URL / JIRA_TOKEN), running relay only"
            );
            None
        }
    };

    tokio::select! {
        result = server.run() => {
            match result {
                Ok(()) => tracing::warn!("relay exited unexpectedly"),
                Err(e) => tracing::error!(error = %e, "relay error"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    cancel.cancel();
    if let Some((handle, task)) = poller {
        handle.stop(task).await;
    }

    tracing::info!("beacond stopped");
    Ok(())
}

/// Connectivity-check the Jira client and spawn the poller. A failed check
/// is fatal for the poller only; the relay keeps serving.
async fn start_poller(
    client: JiraClient,
    relay: beacon_daemon::relay::RelayHandle,
    opts: &DaemonOpts,
) -> Option<(
    beacon_daemon::poller::PollerHandle,
    tokio::task::JoinHandle<()>,
)> {
    let client = Arc::new(client);
    let ping = {
        let client = Arc::clone(&client);
        tokio::task::spawn_blocking(move || client.ping()).await
    };
    match ping {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, "jira connectivity check failed, poller disabled");
            return None;
        }
        Err(e) => {
            tracing::error!(error = %e, "jira connectivity check panicked, poller disabled");
            return None;
        }
    }

    let query = opts.jql.clone().unwrap_or_else(|| {
        format!(
            "issuetype = {} AND status NOT IN (Closed,Resolved,Done)",
            opts.issue_type
        )
    });
    let category_map = CategoryMap {
        incident_type_id: opts.incident_type_id.clone(),
        alert_type_id: opts.alert_type_id.clone(),
    };

    let poller = Poller::new(
        client,
        relay,
        category_map,
        query,
        Duration::from_secs(opts.poll_interval_minutes * 60),
    );
    let handle = poller.handle();
    let task = tokio::spawn(poller.run());
    tracing::info!("jira poller started");
    Some((handle, task))
}

/// Operator input is limited to the durable queue-channel tokens; the
/// transient incident and alert signals come from reconciliation only.
fn parse_operator_token(token: &str) -> Result<Signal, String> {
    match Signal::from_token(token) {
        Some(signal) if signal.is_durable() => Ok(signal),
        Some(signal) => Err(format!(
            "{signal} is not an operator token; use QUEUE_RED or QUEUE_GREEN"
        )),
        None => Err(format!("unknown signal token: {token}")),
    }
}

/// Operator client: validate the token and push it over a short-lived
/// connection.
async fn run_send(addr: SocketAddr, token: &str) -> Result<(), Box<dyn std::error::Error>> {
    let signal = parse_operator_token(token)?;

    let url = format!("ws://{addr}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "failed to connect; is beacond running?");
        e
    })?;

    ws.send(Message::Text(signal.token().to_string())).await?;
    ws.close(None).await?;
    println!("sent {signal}");
    Ok(())
}

/// Reference indicator client: print every token as it arrives. The durable
/// queue state, if any, arrives first.
async fn run_watch(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("ws://{addr}");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await?;
    let (_tx, mut rx) = ws.split();

    tracing::info!(addr = %addr, "watching; ctrl-c to stop");
    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => println!("{text}"),
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
