use std::path::PathBuf;

use crate::error::ClientError;

const SEND_USAGE: &str = "/send <nickname> <path>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat(String),
    // any other /keyword goes to the server as a control frame
    Control(String),
    Send { nickname: String, path: PathBuf },
    Accept,
    Reject,
    Quit,
}

// handle user inputted commands
pub fn parse_line(line: &str) -> Result<Option<Command>, ClientError> {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return Ok(None);
    }

    let rest = match line.strip_prefix('/') {
        Some(rest) => rest.trim(),
        None => return Ok(Some(Command::Chat(line.to_owned()))),
    };

    let mut parts = rest.splitn(3, ' ');
    let command = match parts.next().unwrap_or_default() {
        "quit" => Command::Quit,
        "accept" => Command::Accept,
        "reject" => Command::Reject,
        "send" => {
            let nickname = parts.next().filter(|n| !n.is_empty()).ok_or(ClientError::Usage(SEND_USAGE))?;
            let path = parts.next().map(str::trim).filter(|p| !p.is_empty()).ok_or(ClientError::Usage(SEND_USAGE))?;
            Command::Send { nickname: nickname.to_owned(), path: PathBuf::from(path) }
        }
        _ => Command::Control(rest.to_owned()),
    };

    Ok(Some(command))
}
