mod cli;

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast;

use switchboard::protocol::ImageAttachment;
use switchboard::{
    util, AgentId, ApiClient, ApiError, ChatSession, Config, SessionError, SessionEvent,
};

use crate::cli::{parse_command, render, Command, HELP};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Drive several remote coding agents over one live connection")]
struct Cli {
    /// Backend base URL (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// PIN to authenticate with; prompted for when neither PIN nor token is given
    #[arg(short, long)]
    pin: Option<String>,

    /// Reuse an existing session token instead of a PIN
    #[arg(short, long)]
    token: Option<String>,

    /// Working directory for the first agent
    #[arg(short = 'C', long)]
    cwd: Option<String>,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory (defaults to ~/.switchboard)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

type StdinLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to file (~/.switchboard/logs/switchboard.log)
    util::init_data_dir(cli.data_dir.clone());
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(server) = cli.server.clone() {
        config = config.with_server_url(server);
    }

    let api = ApiClient::new(config.server_url.clone())?;
    let (session, driver) = ChatSession::spawn(
        config.session_settings(),
        config.endpoint(),
        Arc::new(api.clone()),
    );
    let printer = tokio::spawn(print_events(session.clone(), session.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if let Some(token) = cli.token.clone() {
        api.set_token(token.clone());
        session.set_token(token)?;
        session.connect()?;
    } else {
        login(&session, &api, cli.pin.clone(), &mut lines).await?;
    }

    if let (Some(cwd), Some(id)) = (cli.cwd.as_deref(), session.active_agent_id()) {
        session.set_working_directory(&id, cwd)?;
    }

    println!("Connected to {} (type /help for commands)", config.server_url);
    repl(&session, &api, &mut lines).await?;

    printer.abort();
    session.disconnect()?;
    drop(session);
    if tokio::time::timeout(Duration::from_secs(2), driver).await.is_err() {
        tracing::warn!("Connection driver did not stop in time");
    }
    Ok(())
}

/// Authenticate with the given PIN, or keep prompting until one works
async fn login(
    session: &ChatSession,
    api: &ApiClient,
    mut pin: Option<String>,
    lines: &mut StdinLines,
) -> Result<()> {
    loop {
        let candidate = match pin.take() {
            Some(pin) => pin,
            None => {
                println!("PIN:");
                match lines.next_line().await? {
                    Some(line) => line.trim().to_string(),
                    None => bail!("stdin closed before authentication"),
                }
            }
        };

        match session.authenticate(api, &candidate).await {
            Ok(()) => return Ok(()),
            Err(SessionError::Api(e @ ApiError::InvalidPin { .. })) => println!("! {}", e),
            Err(e) => return Err(e.into()),
        }
    }
}

async fn repl(session: &ChatSession, api: &ApiClient, lines: &mut StdinLines) -> Result<()> {
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("! {}", e);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(e) = execute(session, api, command).await {
            println!("! {}", e);
        }
    }
    Ok(())
}

async fn execute(session: &ChatSession, api: &ApiClient, command: Command) -> Result<()> {
    let active = || session.active_agent_id().ok_or(SessionError::NoActiveAgent);

    match command {
        Command::Prompt(text) => session.send_to_active(text)?,
        Command::Attach { path, text } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path))?;
            let image = ImageAttachment::from_bytes(media_type_for(&path), &bytes);
            session.send_message(&active()?, text, vec![image])?;
        }
        Command::New(cwd) => {
            let id = session.create_agent()?;
            if let Some(cwd) = cwd {
                session.set_working_directory(&id, cwd)?;
            }
        }
        Command::Switch(position) => {
            let id = session
                .state()
                .agents()
                .get(position - 1)
                .map(|agent| agent.id.clone());
            match id {
                Some(id) => session.switch_to_agent(&id)?,
                None => println!("! No agent {}", position),
            }
        }
        Command::Close => session.close_agent(&active()?)?,
        Command::Agents => print_agents(session),
        Command::Cwd(dir) => session.set_working_directory(&active()?, dir)?,
        Command::Interrupt => session.interrupt(&active()?)?,
        Command::Stop => session.force_stop(&active()?)?,
        Command::Approve { request_id, pin } => {
            session.respond_permission(&active()?, &request_id, true, pin)?
        }
        Command::Deny { request_id } => {
            session.respond_permission(&active()?, &request_id, false, None)?
        }
        Command::Mode(mode) => {
            let id = active()?;
            let mode = match mode {
                Some(mode) => mode,
                None => session
                    .state()
                    .agent(&id)
                    .map(|agent| agent.mode.toggle())
                    .unwrap_or_default(),
            };
            session.set_mode(&id, mode)?
        }
        Command::Login(pin) => session.authenticate(api, &pin).await?,
        Command::Logout => {
            api.clear_token();
            session.logout()?;
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn media_type_for(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

fn print_agents(session: &ChatSession) {
    let state = session.state();
    for (i, agent) in state.agents().iter().enumerate() {
        let marker = if agent.is_foreground() { "*" } else { " " };
        println!(
            "{} {}. {} [{}] {} unread:{}",
            marker,
            i + 1,
            agent.cwd.as_deref().unwrap_or("(no directory)"),
            agent.status.as_str(),
            agent.mode.display_name(),
            agent.unread_count
        );
    }
}

/// Print finished messages as they land, plus connection notices
async fn print_events(session: ChatSession, mut events: broadcast::Receiver<SessionEvent>) {
    let mut printed: HashMap<AgentId, usize> = HashMap::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            SessionEvent::StatusChanged(status) => println!("-- connection: {}", status.as_str()),
            SessionEvent::AuthenticationRequired => {
                println!("-- authentication required, use /login PIN")
            }
            SessionEvent::ApiKeyLoaded { provider } => println!("-- using {} key", provider),
            SessionEvent::ForceStopAvailable(_) => {
                println!("-- agent did not stop, use /stop to force it")
            }
            SessionEvent::PermissionExpired { request_id, .. } => {
                println!("-- permission {} expired", request_id)
            }
            SessionEvent::Notice(text) => println!("! {}", text),
            SessionEvent::AgentRemoved(id) => {
                printed.remove(&id);
            }
            SessionEvent::AgentUpdated(id) => {
                let state = session.state();
                let Some(agent) = state.agent(&id) else {
                    continue;
                };
                let seen = printed.entry(id.clone()).or_default();
                if *seen > agent.messages.len() {
                    // History replaced the conversation
                    *seen = 0;
                }
                for message in &agent.messages[*seen..] {
                    let Some(text) = render(&message.kind) else {
                        break;
                    };
                    if agent.is_foreground() {
                        println!("{}", text);
                    }
                    *seen += 1;
                }
            }
            SessionEvent::AgentCreated(_) | SessionEvent::ForegroundChanged(_) => {}
        }
    }
}
