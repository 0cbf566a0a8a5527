use crate::cachet::{CachetClient, CachetConfig, IncidentClient};
use crate::metrics::setup_metrics;
use crate::resolver::ComponentResolver;
use crate::server::ServerConfig;
use crate::sync::{DEFAULT_LABEL_NAME, IncidentSynchronizer};
use crate::types::{ComponentId, IncidentMode, UpstreamPolicy};
use clap::Parser;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bridge Prometheus Alertmanager webhooks to CachetHQ incidents
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Where to find CachetHQ
    #[arg(long, env = "CACHETHQ_URL", default_value = "http://127.0.0.1/")]
    pub cachethq_url: String,

    /// API token sent to CachetHQ
    #[arg(long, env = "CACHETHQ_TOKEN", default_value = "", hide_env_values = true)]
    pub cachethq_token: String,

    /// Root CA (PEM) to trust when talking to CachetHQ
    #[arg(long, env = "CACHETHQ_ROOT_CA")]
    pub cachethq_root_ca: Option<PathBuf>,

    /// Do not verify the CachetHQ TLS certificate
    #[arg(long, env = "CACHETHQ_INSECURE")]
    pub cachethq_insecure: bool,

    /// Timeout in seconds for each CachetHQ request
    #[arg(long, env = "UPSTREAM_TIMEOUT", default_value_t = 10)]
    pub upstream_timeout: u64,

    /// What to do when CachetHQ answers with a non-2xx status
    #[arg(long, env = "UPSTREAM_POLICY", value_enum, default_value_t = UpstreamPolicy::Lenient)]
    pub upstream_policy: UpstreamPolicy,

    /// Log level, overridden by RUST_LOG
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: BridgeCommand,
}

#[derive(clap::Subcommand, Debug, PartialEq)]
pub enum BridgeCommand {
    /// Start the webhook server
    Serve {
        /// The port to listen on
        #[arg(short, long, env = "HTTP_PORT", default_value_t = 8080)]
        port: u16,

        /// Token sent by Alertmanager in the webhook configuration
        #[arg(long, env = "PROMETHEUS_TOKEN", hide_env_values = true)]
        prometheus_token: Option<String>,

        /// Alert label holding the CachetHQ component name
        #[arg(long, env = "LABEL_NAME", default_value = DEFAULT_LABEL_NAME)]
        label_name: String,

        /// Open a new incident per alert, or update the latest open one
        #[arg(long, env = "INCIDENT_MODE", value_enum, default_value_t = IncidentMode::Create)]
        incident_mode: IncidentMode,

        /// Certificate (PEM) enabling HTTPS, used with --ssl-key-file
        #[arg(long, env = "SSL_CERT_FILE", requires = "ssl_key_file")]
        ssl_cert_file: Option<PathBuf>,

        /// Private key (PEM) enabling HTTPS, used with --ssl-cert-file
        #[arg(long, env = "SSL_KEY_FILE", requires = "ssl_cert_file")]
        ssl_key_file: Option<PathBuf>,
    },
    /// List CachetHQ components
    Components {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Look up the id of one CachetHQ component
    Component {
        /// Component name
        name: String,
    },
    /// List the incidents of a component, newest first
    Incidents {
        /// Component id
        component_id: ComponentId,

        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

impl Args {
    pub fn cachet_config(&self) -> CachetConfig {
        CachetConfig {
            url: self.cachethq_url.clone(),
            token: self.cachethq_token.clone(),
            root_ca: self.cachethq_root_ca.clone(),
            insecure: self.cachethq_insecure,
            timeout: Duration::from_secs(self.upstream_timeout),
            policy: self.upstream_policy,
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| format!("cachet_bridge={0},tower_http={0}", level)),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let client = CachetClient::new(args.cachet_config())?;

    match args.command {
        BridgeCommand::Serve {
            port,
            prometheus_token,
            label_name,
            incident_mode,
            ssl_cert_file,
            ssl_key_file,
        } => {
            info!(
                "forwarding alerts to {} (label={}, mode={}, policy={})",
                client.url(),
                label_name,
                incident_mode,
                args.upstream_policy
            );

            let synchronizer = IncidentSynchronizer::new(Arc::new(client), label_name, incident_mode);
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = TcpListener::bind(&addr).await?;

            let (tx, rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutting down");
                }
                tx.send(()).ok();
            });

            let config = ServerConfig {
                synchronizer: Arc::new(synchronizer),
                prometheus_token,
                prometheus_handle: setup_metrics(),
                tls_cert: ssl_cert_file,
                tls_key: ssl_key_file,
            };
            crate::server::start_server(listener, rx, config).await?;
        }
        BridgeCommand::Components { json } => {
            let components = ComponentResolver::new(&client).component_map().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&components)?);
            } else {
                let mut sorted: Vec<_> = components.into_iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                println!("Found {} components:", sorted.len());
                for (name, id) in sorted {
                    println!("  {:>6}  {}", id, name);
                }
            }
        }
        BridgeCommand::Component { name } => {
            let id = ComponentResolver::new(&client).resolve(&name).await?;
            println!("{}", id);
        }
        BridgeCommand::Incidents { component_id, json } => {
            let incidents = client.search_incidents(component_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&incidents)?);
            } else {
                println!("Found {} incidents:", incidents.len());
                for incident in incidents {
                    println!("  Id: {}", incident.id);
                    println!("  Name: {}", incident.name);
                    println!("  Status: {}", incident.status);
                    println!("  Visible: {}", incident.visible);
                    println!("  Message: {}", incident.message);
                    println!("  --------------------");
                }
            }
        }
    }

    Ok(())
}
