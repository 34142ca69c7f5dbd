use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier CLI: chat-to-LLM relay with a LAN-first actuator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config.json, SYSTEM.md).
    Init {
        /// Config file path (default: COURIER_CONFIG_PATH or ~/.courier/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (relay HTTP API, health probes, Telegram channel).
    Gateway {
        /// Config file path (default: COURIER_CONFIG_PATH or ~/.courier/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Send messages through the running gateway's relay (interactive).
    Chat {
        /// Config file path (default: COURIER_CONFIG_PATH or ~/.courier/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Sender id to relay as (default: first authorized id).
        #[arg(long, value_name = "ID")]
        sender: Option<String>,
    },

    /// Send one command straight to the actuator through the gateway, skipping the model.
    Command {
        /// Config file path (default: COURIER_CONFIG_PATH or ~/.courier/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Sender id to relay as (default: first authorized id).
        #[arg(long, value_name = "ID")]
        sender: Option<String>,

        /// Action name, e.g. set_alarm
        action: String,

        /// Command parameter as key=value (repeatable)
        #[arg(long = "param", short = 'P', value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Query the running gateway's /health endpoint.
    Health {
        /// Config file path (default: COURIER_CONFIG_PATH or ~/.courier/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("courier {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, sender }) => {
            if let Err(e) = run_chat(config, sender).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Command {
            config,
            sender,
            action,
            params,
        }) => {
            if let Err(e) = run_command(config, sender, action, params).await {
                eprintln!("command failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Health { config }) => {
            if let Err(e) = run_health(config).await {
                eprintln!("health check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    lib::gateway::run_gateway(config, path).await
}

/// Address and auth for talking to a running gateway.
struct GatewayClient {
    base: String,
    token: Option<String>,
    default_sender: Option<String>,
    http: reqwest::Client,
}

impl GatewayClient {
    fn from_config(config_path: Option<std::path::PathBuf>) -> anyhow::Result<Self> {
        let (config, _) = lib::config::load_config(config_path)?;
        let bind = config.gateway.bind.trim();
        // A wildcard bind is reachable on loopback.
        let host = if bind == "0.0.0.0" || bind == "::" { "127.0.0.1" } else { bind };
        Ok(Self {
            base: format!("http://{}:{}", host, config.gateway.port),
            token: lib::config::resolve_gateway_token(&config),
            default_sender: lib::config::resolve_authorized_ids(&config).into_iter().next(),
            http: reqwest::Client::new(),
        })
    }

    fn sender(&self, explicit: Option<String>) -> anyhow::Result<String> {
        explicit
            .or_else(|| self.default_sender.clone())
            .ok_or_else(|| anyhow::anyhow!("no sender id: pass --sender or configure relay.authorizedIds"))
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let mut req = self.http.post(format!("{}{}", self.base, path)).json(&body);
        if let Some(ref t) = self.token {
            req = req.bearer_auth(t);
        }
        let res = req.send().await?;
        let status = res.status();
        let json: serde_json::Value = res.json().await?;
        if !status.is_success() {
            let detail = json
                .get("detail")
                .and_then(|v| v.as_str())
                .unwrap_or("request failed");
            anyhow::bail!("{} ({})", detail, status);
        }
        Ok(json)
    }
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    sender: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let client = GatewayClient::from_config(config_path)?;
    let sender = client.sender(sender)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        let body = serde_json::json!({ "senderId": sender, "message": input });
        match client.post("/task", body).await {
            Ok(res) => {
                let reply = res.get("reply").and_then(|v| v.as_str()).unwrap_or("");
                println!("< {}", reply.trim());
            }
            Err(e) => {
                eprintln!("chat error: {}", e);
            }
        }
    }

    Ok(())
}

/// Parse repeated `key=value` arguments into a JSON params object.
fn parse_params(pairs: &[String]) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let mut params = serde_json::Map::new();
    for pair in pairs {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got {:?}", pair))?;
        let k = k.trim();
        if k.is_empty() {
            anyhow::bail!("empty parameter name in {:?}", pair);
        }
        params.insert(k.to_string(), serde_json::Value::String(v.to_string()));
    }
    Ok(params)
}

async fn run_command(
    config_path: Option<std::path::PathBuf>,
    sender: Option<String>,
    action: String,
    params: Vec<String>,
) -> anyhow::Result<()> {
    let client = GatewayClient::from_config(config_path)?;
    let sender = client.sender(sender)?;
    let body = serde_json::json!({
        "senderId": sender,
        "action": action,
        "params": parse_params(&params)?,
    });
    let res = client.post("/command", body).await?;
    let reply = res.get("reply").and_then(|v| v.as_str()).unwrap_or("");
    println!("{}", reply.trim());
    Ok(())
}

async fn run_health(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let client = GatewayClient::from_config(config_path)?;
    let res = client
        .http
        .get(format!("{}/health", client.base))
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await?;
    let status = res.status();
    let text = res.text().await?;
    println!("{}", text.trim());
    if !status.is_success() {
        anyhow::bail!("gateway returned {}", status);
    }
    Ok(())
}
