//! wterm
//!
//! Command-line client for wterm servers.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use client::config::{default_config_path, ClientConfig};
use client::{
    logging, Connection, Dialect, Event, EventKind, HttpTransfer, PendingOperation, SessionId,
    TransportEvent, WebSocketTransport,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use protocol::{InfoLevel, TermSize};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// How often the local terminal size is checked for changes.
const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// wterm - multiplexed remote terminal client.
#[derive(Parser, Debug)]
#[command(name = "wterm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Connection options shared by the networked commands.
#[derive(clap::Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Server WebSocket URL (overrides the configuration)
    #[arg(long)]
    pub url: Option<String>,

    /// Wire dialect: standard or goTTYd
    #[arg(long)]
    pub dialect: Option<Dialect>,

    /// Answer to the server's authentication challenge.
    /// When omitted, the answer is read from the next line of stdin.
    #[arg(long)]
    pub password: Option<String>,

    /// Ask the server to remember the answer
    #[arg(long)]
    pub remember: bool,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Open an interactive shell
    Shell {
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// List a remote directory
    Ls {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Directory to list (defaults to the server's working directory)
        path: Option<String>,
    },

    /// Create a remote directory
    Mkdir {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Directory to create
        path: String,
    },

    /// Remove a remote file or directory
    Rm {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Path to remove
        path: String,
    },

    /// Rename a remote file or directory
    Mv {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Current path
        from: String,

        /// New path
        to: String,
    },

    /// Download a remote file
    Get {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Remote file
        remote: String,

        /// Local destination (defaults to the remote file name)
        local: Option<PathBuf>,
    },

    /// Upload a local file
    Put {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Local file
        local: PathBuf,

        /// Remote directory (defaults to the server's working directory)
        remote_dir: Option<String>,
    },

    /// Show the effective configuration
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = ClientConfig::load(&config_path)?;
    config.apply_env_overrides();
    if cli.verbose {
        config.logging.log_level = "debug".to_string();
    }

    let _log_guard = logging::init(&config.logging.log_level, config.logging.file.as_deref())?;
    tracing::debug!("Using config file: {:?}", config_path);

    match cli.command {
        Commands::Shell { connect } => {
            apply_connect_args(&mut config, &connect);
            config.validate()?;
            run_shell(&config, &connect).await
        }
        Commands::Ls { connect, path } => {
            apply_connect_args(&mut config, &connect);
            config.validate()?;
            run_ls(&config, &connect, path).await
        }
        Commands::Mkdir { connect, path } => {
            apply_connect_args(&mut config, &connect);
            config.validate()?;
            let mut session = FileSession::open(&config, &connect).await?;
            let pending = session.conn.mkdir(session.files, &path)?;
            let status = session.run(pending).await?;
            session.close()?;
            if let Some(error) = status.error() {
                bail!("mkdir {}: {}", path, error);
            }
            Ok(())
        }
        Commands::Rm { connect, path } => {
            apply_connect_args(&mut config, &connect);
            config.validate()?;
            let mut session = FileSession::open(&config, &connect).await?;
            let pending = session.conn.remove(session.files, &path)?;
            let status = session.run(pending).await?;
            session.close()?;
            if let Some(error) = status.error() {
                bail!("rm {}: {}", path, error);
            }
            Ok(())
        }
        Commands::Mv { connect, from, to } => {
            apply_connect_args(&mut config, &connect);
            config.validate()?;
            let mut session = FileSession::open(&config, &connect).await?;
            let pending = session.conn.rename(session.files, &from, &to)?;
            let status = session.run(pending).await?;
            session.close()?;
            if let Some(error) = status.error() {
                bail!("mv {} {}: {}", from, to, error);
            }
            Ok(())
        }
        Commands::Get {
            connect,
            remote,
            local,
        } => {
            apply_connect_args(&mut config, &connect);
            config.validate()?;
            run_get(&config, &connect, remote, local).await
        }
        Commands::Put {
            connect,
            local,
            remote_dir,
        } => {
            apply_connect_args(&mut config, &connect);
            config.validate()?;
            run_put(&config, &connect, local, remote_dir).await
        }
        Commands::Config { init, force } => {
            if init {
                if config_path.exists() && !force {
                    bail!(
                        "Config file already exists at {} (use --force to overwrite)",
                        config_path.display()
                    );
                }
                ClientConfig::default().save(&config_path)?;
                println!("Wrote default configuration to {}", config_path.display());
            } else {
                println!("# {}", config_path.display());
                print!("{}", config.to_toml()?);
            }
            Ok(())
        }
    }
}

fn apply_connect_args(config: &mut ClientConfig, args: &ConnectArgs) {
    if let Some(url) = &args.url {
        config.connection.server_url = url.clone();
    }
    if let Some(dialect) = args.dialect {
        config.connection.dialect = dialect;
    }
}

/// Opens a connection and forwards control events into a channel.
///
/// Terminal output is written straight to stdout and `info` messages to
/// stderr from inside the handlers.
fn connect(
    config: &ClientConfig,
) -> anyhow::Result<(
    Connection<WebSocketTransport>,
    mpsc::Receiver<TransportEvent>,
    mpsc::UnboundedReceiver<Event>,
)> {
    let (conn, events) = Connection::open(&config.connection.server_url, config.connection.dialect)
        .with_context(|| format!("Failed to connect to {}", config.connection.server_url))?;
    let mut conn = conn.with_policy(config.files.in_flight_policy);

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    for kind in [
        EventKind::Auth,
        EventKind::NewSession,
        EventKind::SessionClosed,
        EventKind::Closed,
    ] {
        let tx = control_tx.clone();
        conn.subscribe(kind, move |event: &Event| {
            tx.send(event.clone())
                .map_err(|_| anyhow::anyhow!("control channel closed"))
        });
    }

    conn.subscribe(EventKind::TermData, |event: &Event| {
        if let Event::TermData { data, .. } = event {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(data)?;
            stdout.flush()?;
        }
        Ok(())
    });

    conn.subscribe(EventKind::Info, |event: &Event| {
        if let Event::Info { info, .. } = event {
            let tag = match info.level {
                InfoLevel::Info => "info",
                InfoLevel::Error => "error",
            };
            eprint!("\r\n[{}] {}\r\n", tag, info.message);
        }
        Ok(())
    });

    Ok((conn, events, control_rx))
}

/// Answers an auth challenge from `--password` or the next stdin line.
async fn answer_auth(
    conn: &mut Connection<WebSocketTransport>,
    question: &str,
    args: &ConnectArgs,
) -> anyhow::Result<()> {
    let answer = match &args.password {
        Some(password) => password.clone(),
        None => {
            eprint!("{}: ", question);
            std::io::stderr().flush()?;
            let line = tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                std::io::stdin().read_line(&mut line).map(|_| line)
            })
            .await??;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    conn.authenticate(question, &answer, args.remember)?;
    Ok(())
}

/// Pumps events until the server answers the open request for `session`.
async fn wait_for_session(
    conn: &mut Connection<WebSocketTransport>,
    events: &mut mpsc::Receiver<TransportEvent>,
    control: &mut mpsc::UnboundedReceiver<Event>,
    session: SessionId,
    args: &ConnectArgs,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => conn.handle_transport_event(event),
                None => conn.teardown(),
            },
            Some(event) = control.recv() => match event {
                Event::Auth { question, .. } => answer_auth(conn, &question, args).await?,
                Event::NewSession { session_id, accepted } if session_id == session => {
                    if accepted {
                        return Ok(());
                    }
                    bail!("Server refused session {}", session);
                }
                Event::Closed { reason } => {
                    bail!("Connection closed: {}", reason.unwrap_or_else(|| "no reason given".to_string()));
                }
                _ => {}
            },
        }
    }
}

/// Restores cooked mode when dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> anyhow::Result<Self> {
        enable_raw_mode().context("Failed to enable raw terminal mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn terminal_size() -> Option<TermSize> {
    crossterm::terminal::size()
        .ok()
        .map(|(cols, rows)| TermSize::new(rows, cols))
}

fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 4096];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    });
    rx
}

async fn recv_input(input: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match input {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_shell(config: &ClientConfig, args: &ConnectArgs) -> anyhow::Result<()> {
    let (mut conn, mut events, mut control) = connect(config)?;
    let shell = conn.open_shell()?;

    wait_for_session(&mut conn, &mut events, &mut control, shell, args).await?;
    tracing::info!(session_id = shell, "Shell ready");

    let raw_mode = RawModeGuard::enable()?;
    let mut input = Some(spawn_stdin_reader());
    let mut size = terminal_size();
    if let Some(size) = size {
        conn.resize(shell, size)?;
    }
    let mut resize_tick = tokio::time::interval(RESIZE_POLL_INTERVAL);

    let mut reason = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => conn.handle_transport_event(event),
                None => conn.teardown(),
            },
            Some(event) = control.recv() => match event {
                Event::Auth { question, .. } => answer_auth(&mut conn, &question, args).await?,
                Event::SessionClosed { session_id } if session_id == shell => break,
                Event::Closed { reason: why } => {
                    reason = why;
                    break;
                }
                _ => {}
            },
            data = recv_input(&mut input) => match data {
                Some(data) => conn.send_terminal_data(shell, &data)?,
                None => {
                    input = None;
                    conn.close_session(shell)?;
                }
            },
            _ = resize_tick.tick() => {
                let current = terminal_size();
                if current != size {
                    size = current;
                    if let Some(size) = size {
                        conn.resize(shell, size)?;
                    }
                }
            }
        }
    }

    conn.teardown();
    drop(raw_mode);
    if let Some(reason) = reason {
        eprintln!("Connection closed: {}", reason);
    }
    Ok(())
}

/// An open file-transfer session on a fresh connection.
struct FileSession {
    conn: Connection<WebSocketTransport>,
    events: mpsc::Receiver<TransportEvent>,
    // Held so control handlers keep a live receiver.
    _control: mpsc::UnboundedReceiver<Event>,
    files: SessionId,
}

impl FileSession {
    async fn open(config: &ClientConfig, args: &ConnectArgs) -> anyhow::Result<Self> {
        let (mut conn, mut events, mut control) = connect(config)?;
        let files = conn.open_file_transfer()?;
        wait_for_session(&mut conn, &mut events, &mut control, files, args).await?;
        Ok(Self {
            conn,
            events,
            _control: control,
            files,
        })
    }

    /// Pumps the connection until the operation completes.
    async fn run<T>(&mut self, pending: PendingOperation<T>) -> anyhow::Result<T> {
        let result = self
            .conn
            .drive(&mut self.events, pending)
            .await
            .context("Connection closed before the server replied")?;
        Ok(result?)
    }

    async fn cwd(&mut self) -> anyhow::Result<String> {
        let pending = self.conn.getwd(self.files)?;
        self.run(pending).await
    }

    fn close(mut self) -> anyhow::Result<()> {
        self.conn.close_session(self.files)?;
        Ok(())
    }
}

async fn run_ls(config: &ClientConfig, args: &ConnectArgs, path: Option<String>) -> anyhow::Result<()> {
    let mut session = FileSession::open(config, args).await?;

    let dir = match path {
        Some(path) => path,
        None => session.cwd().await?,
    };
    let pending = session.conn.readdir(session.files, &dir)?;
    let entries = session.run(pending).await?;

    let mut stdout = std::io::stdout().lock();
    for entry in &entries {
        let kind = if entry.is_directory { 'd' } else { '-' };
        let suffix = if entry.is_directory { "/" } else { "" };
        writeln!(stdout, "{}{} {}{}", kind, entry.permissions(), entry.name, suffix)?;
    }
    drop(stdout);

    session.close()
}

async fn run_get(
    config: &ClientConfig,
    args: &ConnectArgs,
    remote: String,
    local: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut session = FileSession::open(config, args).await?;
    let pending = session.conn.download_file(session.files, &remote)?;
    let descriptor = session.run(pending).await?;
    if !descriptor.is_available() {
        session.close()?;
        bail!("Server refused to download {}", remote);
    }

    let dest = local.unwrap_or_else(|| PathBuf::from(&descriptor.name));
    let http = HttpTransfer::new(config.connection.http_base_url.as_str());
    let result = http.download(&descriptor, &dest).await;
    session.close()?;

    let bytes = result.with_context(|| format!("Failed to download {}", remote))?;
    println!("{} -> {} ({} bytes)", remote, dest.display(), bytes);
    Ok(())
}

async fn run_put(
    config: &ClientConfig,
    args: &ConnectArgs,
    local: PathBuf,
    remote_dir: Option<String>,
) -> anyhow::Result<()> {
    let name = local
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", local.display()))?
        .to_string();

    let mut session = FileSession::open(config, args).await?;
    let dir = match remote_dir {
        Some(dir) => dir,
        None => session.cwd().await?,
    };
    let remote = session.conn.join_remote_path(&dir, &name);

    let pending = session.conn.upload_file(session.files, &remote)?;
    let target = session.run(pending).await?;
    if target.is_empty() {
        session.close()?;
        bail!("Server refused to upload to {}", remote);
    }

    let http = HttpTransfer::new(config.connection.http_base_url.as_str());
    let result = http.upload(&target, &local).await;
    session.close()?;

    let bytes = result.with_context(|| format!("Failed to upload {}", local.display()))?;
    println!("{} -> {} ({} bytes)", local.display(), remote, bytes);
    Ok(())
}
