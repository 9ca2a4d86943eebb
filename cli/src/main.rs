mod util;

use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{self, Context};

use ferrolink::{
    AuthScheme, AuthValidator, Client, Error, Handler, Message, Server, Socket, TlsConfig, VerifyMode,
    WsAuthenticate, WsRequestContext,
};

#[derive(Debug, Parser)]
#[clap(version, author, about = "Bidirectional RPC over TCP/TLS/WebSocket")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept inbound connections and echo back every request it receives.
    Serve(ServeArgs),
    /// Connect to a peer, optionally send one request or notification, then disconnect.
    Connect(ConnectArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportArg {
    Tcp,
    Ssl,
    Ws,
    Wss,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AuthSchemeArg {
    Basic,
    Digest,
}

impl From<AuthSchemeArg> for AuthScheme {
    fn from(value: AuthSchemeArg) -> Self {
        match value {
            AuthSchemeArg::Basic => AuthScheme::Basic,
            AuthSchemeArg::Digest => AuthScheme::Digest,
        }
    }
}

#[derive(Debug, clap::Args)]
struct ServeArgs {
    #[clap(long, value_enum, default_value = "tcp")]
    transport: TransportArg,
    #[clap(long, default_value = "0.0.0.0")]
    host: String,
    #[clap(long)]
    port: u16,
    /// PEM certificate chain, required for `ssl`/`wss`.
    #[clap(long, value_hint = clap::ValueHint::FilePath)]
    cert: Option<PathBuf>,
    /// PEM private key, required for `ssl`/`wss`.
    #[clap(long, value_hint = clap::ValueHint::FilePath)]
    key: Option<PathBuf>,
    /// Challenge inbound WS/WSS upgrades with Basic or Digest auth.
    #[clap(long, value_enum)]
    auth: Option<AuthSchemeArg>,
    #[clap(long, default_value = "ferrolink")]
    realm: String,
    #[clap(long, requires = "auth")]
    username: Option<String>,
    #[clap(long, requires = "auth")]
    password: Option<String>,
}

#[derive(Debug, clap::Args)]
struct ConnectArgs {
    #[clap(long, value_enum, default_value = "tcp")]
    transport: TransportArg,
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
    #[clap(long)]
    port: u16,
    /// WS/WSS upgrade target path.
    #[clap(long, default_value = "/rpc")]
    path: String,
    #[clap(long, default_value = "")]
    query: String,
    /// CA bundle to verify the server's certificate against, for `ssl`/`wss`.
    #[clap(long, value_hint = clap::ValueHint::FilePath)]
    ca: Option<PathBuf>,
    /// Skip certificate verification entirely. Never use this against an untrusted peer.
    #[clap(long)]
    insecure: bool,
    #[clap(long, value_enum, requires = "username")]
    auth: Option<AuthSchemeArg>,
    #[clap(long)]
    username: Option<String>,
    #[clap(long)]
    password: Option<String>,
    /// RPC method to call. With no method, connect/disconnect only.
    #[clap(long)]
    method: Option<String>,
    /// JSON-encoded params for `--method`.
    #[clap(long, default_value = "null")]
    params: String,
    /// Send `--method` as a Notify instead of a Request (no response is awaited).
    #[clap(long)]
    notify: bool,
    #[clap(long, default_value = "5")]
    timeout_secs: u64,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Connect(args) => run_connect(args),
    }
}

/// Handler for `serve`: logs every connect/disconnect and echoes requests
/// back verbatim, so `connect --method ping` against it always succeeds.
#[derive(Default)]
struct EchoHandler;

impl Handler for EchoHandler {
    fn on_connect(&self, socket: Socket) {
        tracing::info!(peer = ?socket.peer_addr(), "peer connected");
    }

    fn on_disconnect(&self, socket: Socket, reason: Error) {
        tracing::info!(peer = ?socket.peer_addr(), %reason, "peer disconnected");
    }

    fn on_message(&self, socket: Socket, message: Message) {
        match message {
            Message::Request { id, method, params } => {
                tracing::info!(%method, %params, "request, echoing back");
                let _ = socket.send(Message::Response { id, result: Ok(params) });
            },
            Message::Notify { method, params } => {
                tracing::info!(%method, %params, "notify");
            },
            Message::Response { .. } => {},
        }
    }
}

struct StaticCredential {
    username: String,
    password: String,
}

impl AuthValidator for StaticCredential {
    fn validate(&self, username: &str, _realm: &str, _method: &str, _uri: &str, password: &str) -> bool {
        username == self.username && password == self.password
    }

    fn ha1(&self, username: &str, realm: &str) -> Option<String> {
        (username == self.username).then(|| util::parse_md5_ha1(username, realm, &self.password))
    }
}

fn run_serve(args: ServeArgs) -> eyre::Result<()> {
    let handler = Arc::new(EchoHandler);

    let server = match args.transport {
        TransportArg::Tcp => Server::tcp(handler),
        TransportArg::Ws => Server::ws(handler),
        #[cfg(feature = "tls")]
        TransportArg::Ssl => Server::ssl(handler, server_tls_config(&args)?),
        #[cfg(feature = "tls")]
        TransportArg::Wss => Server::wss(handler, server_tls_config(&args)?),
        #[cfg(not(feature = "tls"))]
        TransportArg::Ssl | TransportArg::Wss => {
            eyre::bail!("this build was compiled without the `tls` feature")
        },
    };

    let server = match (args.auth, &args.username, &args.password) {
        (Some(scheme), Some(username), Some(password)) => {
            let validator = Arc::new(StaticCredential {
                username: username.clone(),
                password: password.clone(),
            });
            server.with_auth(scheme.into(), args.realm.clone(), validator)
        },
        (Some(_), _, _) => eyre::bail!("--auth requires both --username and --password"),
        (None, _, _) => server,
    };

    let server = Arc::new(server);
    server.start(&args.host, args.port).context("failed to start server")?;
    tracing::info!(host = %args.host, port = args.port, "listening");

    let ctrlc_rx = util::install_ctrlc_handler()?;
    ctrlc_rx.recv().ok();
    tracing::info!("shutting down");
    server.stop().ok();
    Ok(())
}

#[cfg(feature = "tls")]
fn server_tls_config(args: &ServeArgs) -> eyre::Result<TlsConfig> {
    Ok(TlsConfig {
        cert_file: Some(args.cert.clone().ok_or_else(|| eyre::eyre!("--cert is required for ssl/wss"))?),
        key_file: Some(args.key.clone().ok_or_else(|| eyre::eyre!("--key is required for ssl/wss"))?),
        ..Default::default()
    })
}

enum ClientEvent {
    Connected,
    Disconnected(String),
}

struct ClientHandler {
    events: mpsc::Sender<ClientEvent>,
}

impl Handler for ClientHandler {
    fn on_connect(&self, socket: Socket) {
        tracing::info!(peer = ?socket.peer_addr(), "connected");
        let _ = self.events.send(ClientEvent::Connected);
    }

    fn on_disconnect(&self, _socket: Socket, reason: Error) {
        tracing::info!(%reason, "disconnected");
        let _ = self.events.send(ClientEvent::Disconnected(reason.to_string()));
    }

    fn on_message(&self, _socket: Socket, message: Message) {
        if let Message::Notify { method, params } = message {
            tracing::info!(%method, %params, "notify pushed by peer");
        }
    }
}

fn run_connect(args: ConnectArgs) -> eyre::Result<()> {
    let (tx, rx) = mpsc::channel();
    let handler = Arc::new(ClientHandler { events: tx });

    let client = match args.transport {
        TransportArg::Tcp => Client::tcp(handler),
        TransportArg::Ws => Client::ws(handler),
        #[cfg(feature = "tls")]
        TransportArg::Ssl => Client::ssl(handler, client_tls_config(&args)),
        #[cfg(feature = "tls")]
        TransportArg::Wss => Client::wss(handler, client_tls_config(&args)),
        #[cfg(not(feature = "tls"))]
        TransportArg::Ssl | TransportArg::Wss => {
            eyre::bail!("this build was compiled without the `tls` feature")
        },
    };

    let ws_context = matches!(args.transport, TransportArg::Ws | TransportArg::Wss).then(|| WsRequestContext {
        path: args.path.clone(),
        query: args.query.clone(),
        headers: Vec::new(),
        authenticate: args.auth.zip(args.username.clone()).map(|(scheme, username)| WsAuthenticate {
            scheme: scheme.into(),
            username,
            password: args.password.clone().unwrap_or_default(),
        }),
    });

    let socket = client.create_socket_with_context(args.host.clone(), args.port, ws_context);
    let timeout = Duration::from_secs(args.timeout_secs);
    socket.connect_timeout(timeout).context("connect failed")?;

    match rx.recv_timeout(timeout + Duration::from_secs(1)) {
        Ok(ClientEvent::Connected) => {},
        Ok(ClientEvent::Disconnected(reason)) => eyre::bail!("connection failed: {reason}"),
        Err(_) => eyre::bail!("timed out waiting to connect"),
    }

    if let Some(method) = args.method {
        let params: serde_json::Value = serde_json::from_str(&args.params).context("--params is not valid JSON")?;
        if args.notify {
            socket.send(Message::Notify { method, params }).context("send failed")?;
        } else {
            let request = socket
                .send(Message::Request { id: 0, method, params })
                .context("send failed")?
                .expect("Request variant always yields a RequestFuture");
            let result = async_std::task::block_on(request.wait_timeout(timeout));
            match result {
                Ok(value) => println!("{value}"),
                Err(err) => eyre::bail!("request failed: {err}"),
            }
        }
    }

    socket.disconnect().ok();
    let _ = rx.recv_timeout(Duration::from_secs(1));
    Ok(())
}

#[cfg(feature = "tls")]
fn client_tls_config(args: &ConnectArgs) -> TlsConfig {
    TlsConfig {
        ca_file: args.ca.clone(),
        verify_mode: if args.insecure { VerifyMode::None } else { VerifyMode::VerifyPeer },
        ..Default::default()
    }
}
