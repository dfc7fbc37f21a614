//! Line commands and message rendering for the terminal front end.

use switchboard::agent::{AgentMode, MessageKind};
use switchboard::protocol::decode_base64_image;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text: a prompt for the foreground agent
    Prompt(String),
    /// A prompt with an image file attached
    Attach { path: String, text: String },
    /// Create an agent, optionally bound to a working directory
    New(Option<String>),
    /// Switch to the agent at this 1-based position
    Switch(usize),
    Close,
    Agents,
    Cwd(String),
    Interrupt,
    Stop,
    Approve { request_id: String, pin: Option<String> },
    Deny { request_id: String },
    /// Requested mode; None toggles the current one
    Mode(Option<AgentMode>),
    Login(String),
    Logout,
    Quit,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: /{0} (try /help)")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
/attach FILE TEXT  send TEXT with an image attached
/new [DIR]         create an agent (and bind it to DIR)
/switch N          bring agent N to the foreground
/agents            list agents
/close             close the foreground agent
/cwd DIR           set the foreground agent's working directory
/interrupt         interrupt the current turn
/stop              force stop once the interrupt went unanswered
/approve ID [PIN]  approve a permission request
/deny ID           deny a permission request
/mode [coding|computer]  set the mode, or toggle it
/login PIN         authenticate again after the session expired
/logout            forget the session token
/quit";

pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Prompt(line.to_string())));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let command = match (name, args.as_slice()) {
        ("attach", [path, text @ ..]) if !text.is_empty() => Command::Attach {
            path: path.to_string(),
            text: text.join(" "),
        },
        ("attach", _) => return Err(CommandError::Usage("/attach FILE TEXT")),
        ("new", []) => Command::New(None),
        ("new", [dir]) => Command::New(Some(dir.to_string())),
        ("new", _) => return Err(CommandError::Usage("/new [DIR]")),
        ("switch", [n]) => match n.parse::<usize>() {
            Ok(n) if n > 0 => Command::Switch(n),
            _ => return Err(CommandError::Usage("/switch N")),
        },
        ("switch", _) => return Err(CommandError::Usage("/switch N")),
        ("close", []) => Command::Close,
        ("agents", []) => Command::Agents,
        ("cwd", [dir]) => Command::Cwd(dir.to_string()),
        ("cwd", _) => return Err(CommandError::Usage("/cwd DIR")),
        ("interrupt", []) => Command::Interrupt,
        ("stop", []) => Command::Stop,
        ("approve", [id]) => Command::Approve {
            request_id: id.to_string(),
            pin: None,
        },
        ("approve", [id, pin]) => Command::Approve {
            request_id: id.to_string(),
            pin: Some(pin.to_string()),
        },
        ("approve", _) => return Err(CommandError::Usage("/approve ID [PIN]")),
        ("deny", [id]) => Command::Deny {
            request_id: id.to_string(),
        },
        ("deny", _) => return Err(CommandError::Usage("/deny ID")),
        ("mode", []) => Command::Mode(None),
        ("mode", [mode]) => Command::Mode(Some(AgentMode::parse(mode))),
        ("mode", _) => return Err(CommandError::Usage("/mode [coding|computer]")),
        ("login", [pin]) => Command::Login(pin.to_string()),
        ("login", _) => return Err(CommandError::Usage("/login PIN")),
        ("logout", []) => Command::Logout,
        ("quit" | "exit" | "q", []) => Command::Quit,
        ("help" | "h", _) => Command::Help,
        (other, _) => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// One printable line (or block) for a message; None while it is still
/// streaming
pub fn render(kind: &MessageKind) -> Option<String> {
    let text = match kind {
        MessageKind::User { text, images } if images.is_empty() => format!("> {}", text),
        MessageKind::User { text, images } => format!("> {} [{} image(s)]", text, images.len()),
        MessageKind::Assistant {
            is_streaming: true,
            ..
        } => return None,
        MessageKind::Assistant { text, .. } => text.clone(),
        MessageKind::System { text } => format!("-- {}", text),
        MessageKind::ToolUse { tool, input, .. } => format!("[tool] {} {}", tool, input),
        MessageKind::ToolResult {
            content, is_error, ..
        } => {
            let marker = if *is_error { "[tool error]" } else { "[tool result]" };
            format!("{} {}", marker, truncate(content, 400))
        }
        MessageKind::PermissionRequest {
            request_id,
            tool,
            level,
            reason,
            status,
            ..
        } => {
            let how = if level.requires_pin() {
                format!("/approve {} PIN", request_id)
            } else {
                format!("/approve {}", request_id)
            };
            format!(
                "[permission:{}] {}{} ({:?}) -> {} or /deny {}",
                level.as_str(),
                tool,
                reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default(),
                status,
                how,
                request_id
            )
        }
        MessageKind::ComputerScreenshot {
            image,
            action,
            description,
            iteration,
        } => {
            let size = match decode_base64_image(image) {
                Ok((bytes, _)) => format!("{:.1} KB", bytes.len() as f64 / 1024.0),
                Err(_) => "unreadable".to_string(),
            };
            format!(
                "[screenshot #{}] {} ({})",
                iteration.unwrap_or_default(),
                description.as_deref().or(action.as_deref()).unwrap_or(""),
                size
            )
        }
        MessageKind::ComputerAction {
            tool,
            action,
            description,
            ..
        } => format!(
            "[computer] {} {}",
            action.as_deref().unwrap_or(tool),
            description.as_deref().unwrap_or("")
        ),
        MessageKind::SubAgent {
            task,
            status,
            preview,
            ..
        } => format!(
            "[sub-agent:{}] {}{}",
            status,
            task,
            preview.as_deref().map(|p| format!(" - {}", p)).unwrap_or_default()
        ),
    };
    Some(text)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}
