//! Command-line client for a vulp bouncer.
//!
//! Connects, logs in (resuming the previous session when one exists), prints
//! everything the bouncer sends and turns stdin lines into commands.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vulp_session::{
    connect_tcp, Client, ClientEvent, ConnectionState, DisconnectReason, IoStream, SendOutcome,
};
use vulp_wire::{build_debug_command, build_window_input, parse_status_text, PacketType};

mod config;
mod logging;

use config::ClientSettings;
use logging::VulpLogFormatter;

#[cfg(feature = "tls")]
use vulp_session::{connect_tls, make_client_config, TlsClientConfig};

/// Command-line client for a vulp bouncer
#[derive(Parser, Debug)]
#[command(name = "vulp-client", version, about = "Command-line client for a vulp bouncer")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "vulp.yaml")]
    config: PathBuf,

    /// Bouncer address, e.g. localhost:5454
    #[arg(long)]
    server: Option<String>,

    /// Protocol version announced at login
    #[arg(long)]
    protocol_version: Option<u32>,

    /// Delay before reconnecting after the stream drops, e.g. 5s
    #[arg(long)]
    reconnect_delay: Option<humantime::Duration>,

    /// Never reconnect automatically
    #[arg(long, conflicts_with = "reconnect_delay")]
    no_reconnect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    // TLS options
    /// Enable TLS
    #[arg(long)]
    tls: bool,

    /// Server name for TLS SNI
    #[arg(long)]
    tls_sni: Option<String>,

    /// Path to CA certificate file (PEM format)
    #[arg(long)]
    tls_ca: Option<PathBuf>,
}

impl Args {
    /// Layer flags over file and environment settings
    fn apply(&self, settings: &mut ClientSettings) {
        if let Some(server) = &self.server {
            settings.server = server.clone();
        }
        if let Some(version) = self.protocol_version {
            settings.protocol_version = version;
        }
        if let Some(delay) = self.reconnect_delay {
            settings.reconnect_delay = Some(delay.into());
        }
        if self.no_reconnect {
            settings.reconnect_delay = None;
        }
        if self.tls {
            settings.tls.enabled = true;
        }
        if let Some(sni) = &self.tls_sni {
            settings.tls.sni = Some(sni.clone());
        }
        if let Some(ca) = &self.tls_ca {
            settings.tls.ca_file = Some(ca.to_string_lossy().into_owned());
        }
    }
}

/// One line of user input
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Connect,
    Disconnect,
    Login,
    Quit,
    Status,
    Window { id: u32, text: &'a str },
    Debug(&'a str),
}

fn parse_command(line: &str) -> Result<Option<Command<'_>>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let command = match line.split_once(char::is_whitespace) {
        Some(("/win", rest)) => {
            let (id, text) = rest
                .trim_start()
                .split_once(char::is_whitespace)
                .context("usage: /win <id> <text>")?;
            let id = id
                .parse()
                .with_context(|| format!("invalid window id {:?}", id))?;
            Command::Window {
                id,
                text: text.trim_start(),
            }
        }
        _ => match line {
            "/connect" => Command::Connect,
            "/disconnect" => Command::Disconnect,
            "/login" => Command::Login,
            "/quit" => Command::Quit,
            "/status" => Command::Status,
            "/win" => anyhow::bail!("usage: /win <id> <text>"),
            other => Command::Debug(other),
        },
    };
    Ok(Some(command))
}

/// Opens transports for the client
#[derive(Clone)]
struct Connector {
    server: String,
    #[cfg(feature = "tls")]
    tls: Option<TlsClientConfig>,
}

impl Connector {
    async fn new(settings: &ClientSettings) -> Result<Self> {
        if settings.tls.enabled {
            #[cfg(not(feature = "tls"))]
            {
                anyhow::bail!(
                    "TLS requested but not compiled with TLS support. Build with --features tls"
                );
            }
        }

        #[cfg(feature = "tls")]
        let tls = if settings.tls.enabled {
            let ca_path = settings
                .tls
                .ca_file
                .as_deref()
                .context("TLS enabled but no CA file configured (--tls-ca or tls.ca_file)")?;
            info!("Loading TLS configuration from ca={:?}", ca_path);
            let ca_pem = tokio::fs::read_to_string(ca_path)
                .await
                .with_context(|| format!("Failed to read CA file {:?}", ca_path))?;
            let server_name = settings
                .tls
                .sni
                .clone()
                .unwrap_or_else(|| settings.server_host().to_string());
            Some(TlsClientConfig {
                client_config: make_client_config(&ca_pem)?,
                server_name,
            })
        } else {
            None
        };

        Ok(Self {
            server: settings.server.clone(),
            #[cfg(feature = "tls")]
            tls,
        })
    }

    /// Connect, attach and send the login
    async fn open(&self, client: &Client) -> Result<()> {
        let addr = tokio::net::lookup_host(&self.server)
            .await
            .with_context(|| format!("Failed to resolve {}", self.server))?
            .next()
            .with_context(|| format!("{} did not resolve to any address", self.server))?;

        component_info!("net", "Connecting to {} ({})", self.server, addr);
        let tcp = connect_tcp(addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;

        #[cfg(feature = "tls")]
        let stream = match &self.tls {
            Some(tls) => connect_tls(tls, tcp).await?,
            None => IoStream::Plain(tcp),
        };
        #[cfg(not(feature = "tls"))]
        let stream = IoStream::Plain(tcp);

        client.attach(stream).await;
        report_outcome("login", client.login().await?);
        Ok(())
    }
}

/// Reconnects after a delay whenever the stream drops
#[derive(Clone)]
struct Reconnector {
    client: Client,
    connector: Connector,
    delay: Option<Duration>,
}

impl Reconnector {
    fn schedule(&self) {
        let Some(delay) = self.delay else {
            return;
        };
        let this = self.clone();
        component_info!("net", "Reconnecting in {}", humantime::format_duration(delay));
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.client.state().await != ConnectionState::Disconnected {
                return;
            }
            if let Err(e) = this.connector.open(&this.client).await {
                component_warn!("net", "Reconnect failed: {:#}", e);
                this.schedule();
            }
        });
    }
}

fn report_outcome(what: &str, outcome: SendOutcome) {
    match outcome {
        SendOutcome::Written { sequence_id } => {
            component_debug!("session", "{} written (seq {:?})", what, sequence_id)
        }
        SendOutcome::Deferred { sequence_id } => {
            println!("* not logged in, {} queued as #{}", what, sequence_id)
        }
        SendOutcome::Suppressed => println!("* not logged in, {} dropped", what),
        SendOutcome::WriteFailed { error, .. } => println!("* {} failed: {}", what, error),
    }
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::Packet {
            packet_type,
            payload,
        } if *packet_type == PacketType::STATUS => match parse_status_text(payload) {
            Ok(text) => println!("{}", text),
            Err(e) => println!("* malformed status packet: {}", e),
        },
        ClientEvent::Packet {
            packet_type,
            payload,
        } => println!("* packet {} ({} bytes)", packet_type, payload.len()),
        ClientEvent::StateChanged(state) => println!("* {}", state),
        ClientEvent::AuthFailed => println!("* login rejected"),
        ClientEvent::WriteFailed { sequence_id, error } => match sequence_id {
            Some(id) => println!("* write of #{} failed: {} (kept for resync)", id, error),
            None => println!("* write failed: {}", error),
        },
        ClientEvent::Disconnected { reason } => println!("* disconnected: {}", reason),
    }
}

/// Run one command; returns `false` when the user asked to quit
async fn run_command(command: Command<'_>, reconnector: &Reconnector) -> Result<bool> {
    let client = &reconnector.client;
    match command {
        Command::Quit => return Ok(false),
        Command::Connect => reconnector.connector.open(client).await?,
        Command::Disconnect => client.disconnect().await,
        Command::Login => report_outcome("login", client.login().await?),
        Command::Status => println!(
            "* {} | key {:?} | last received #{} | {} unacknowledged",
            client.state().await,
            client.session_key().await,
            client.last_received_id().await,
            client.cache_len().await
        ),
        Command::Window { id, text } => report_outcome(
            "window input",
            client
                .send(PacketType::WINDOW_INPUT, build_window_input(id, text))
                .await?,
        ),
        Command::Debug(text) => report_outcome(
            "command",
            client
                .send(PacketType::DEBUG_COMMAND, build_debug_command(text))
                .await?,
        ),
    }
    Ok(true)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"))
        .add_directive(format!("vulp_client={}", args.log_level).parse()?)
        .add_directive(format!("vulp_session={}", args.log_level).parse()?)
        .add_directive(format!("vulp_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(VulpLogFormatter::new("vulp"))
        .init();

    info!("Starting vulp client v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = ClientSettings::load_from_file(&args.config);
    args.apply(&mut settings);
    info!(
        "Final configuration: server={}, protocol_version={}, reconnect={:?}, tls={}",
        settings.server, settings.protocol_version, settings.reconnect_delay, settings.tls.enabled
    );

    let (client, mut events) = Client::new(settings.client_config());
    let reconnector = Reconnector {
        client: client.clone(),
        connector: Connector::new(&settings).await?,
        delay: settings.reconnect_delay,
    };

    if let Err(e) = reconnector.connector.open(&client).await {
        component_warn!("net", "Connection failed: {:#}", e);
        reconnector.schedule();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(command)) => match run_command(command, &reconnector).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => println!("* {:#}", e),
                    },
                    Ok(None) => {}
                    Err(e) => println!("* {:#}", e),
                }
            }

            Some(event) = events.recv() => {
                print_event(&event);
                if let ClientEvent::Disconnected { reason } = &event {
                    if *reason != DisconnectReason::Local {
                        reconnector.schedule();
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    client.disconnect().await;
    info!("Client shut down");
    Ok(())
}
