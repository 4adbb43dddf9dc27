//! Parley command-line client
//!
//! A thin shell around the session core: stdout is the presentation
//! sink, clap arguments plus an optional JSON settings file are the
//! configuration source, and stdin is the command line (`/join`,
//! `/volume`, plain text to chat).

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use tokio::sync::mpsc;

use parley_client::audio::device::CpalBackend;
use parley_client::audio::ptt::{FlagTalkKey, HotkeyTalkKey, TalkKey};
use parley_client::config::Settings;
use parley_client::net::session::ControlEvent;
use parley_client::session::ChatSession;
use parley_client::ui::PresentationSink;
use parley_common::{DEFAULT_PORT, validate_name};

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser)]
#[command(name = "parley", version, about = "Voice and text chat client")]
struct Args {
    /// Server host name or address
    #[arg(long)]
    server: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Nickname to connect as
    #[arg(long)]
    nickname: Option<String>,

    /// JSON settings file; command-line flags override it
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn load_settings(args: &Args) -> Result<Settings, String> {
    let mut settings = match &args.settings {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            serde_json::from_str(&text)
                .map_err(|e| format!("cannot parse {}: {}", path.display(), e))?
        }
        None => Settings::default(),
    };
    if let Some(server) = &args.server {
        settings.server = server.clone();
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(nickname) = &args.nickname {
        settings.nickname = nickname.clone();
    }
    if settings.port == 0 {
        settings.port = DEFAULT_PORT;
    }
    if settings.server.is_empty() {
        return Err("no server given; use --server or a settings file".to_string());
    }
    validate_name(&settings.nickname).map_err(|e| format!("bad nickname: {}", e))?;
    Ok(settings)
}

// =============================================================================
// Stdout Sink
// =============================================================================

/// Presentation sink printing to the terminal
struct StdoutSink;

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

impl PresentationSink for StdoutSink {
    fn status_text(&self, text: &str) {
        println!("[{}] * {}", timestamp(), text);
    }

    fn chat_line(&self, time_label: &str, body: &str) {
        if time_label.is_empty() {
            println!("[{}] {}", timestamp(), body);
        } else {
            println!("[{}] {}", time_label, body);
        }
    }

    fn set_user_list(&self, names: &[String]) {
        println!("[{}] * online: {}", timestamp(), names.join(", "));
    }

    fn clear_user_list(&self) {
        println!("[{}] * user list cleared", timestamp());
    }

    fn room_added(&self, room: &str) {
        println!("[{}] * room available: {}", timestamp(), room);
    }

    fn room_removed(&self, room: &str) {
        println!("[{}] * room removed: {}", timestamp(), room);
    }

    fn room_renamed(&self, old: &str, new: &str) {
        println!("[{}] * room {} is now {}", timestamp(), old, new);
    }

    fn peer_ping(&self, _name: &str, _rtt_ms: u32) {
        // Too chatty for a terminal; visible via /who instead
    }

    fn peer_talking(&self, name: &str, talking: bool) {
        if talking {
            println!("[{}] * {} is talking", timestamp(), name);
        }
    }

    fn mic_level(&self, _level_dbfs: f32) {}

    fn notice(&self, text: &str) {
        println!("[{}] *** {}", timestamp(), text);
    }

    fn request_room_password(&self, room: &str) {
        println!(
            "[{}] * room {} needs a password; use /join {} <password>",
            timestamp(),
            room,
            room
        );
    }

    fn connection_closed(&self) {
        println!("[{}] * disconnected", timestamp());
    }
}

// =============================================================================
// Command Loop
// =============================================================================

/// Apply one input line; returns false when the session should end
fn handle_line(session: &mut ChatSession, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    let mut parts = line.splitn(3, ' ');
    match parts.next().unwrap_or("") {
        "/quit" => return false,
        "/join" => match (parts.next(), parts.next()) {
            (Some(room), None) => report(session.enter_room(room)),
            (Some(room), Some(password)) => {
                report(session.enter_room_with_password(room, password))
            }
            _ => println!("usage: /join <room> [password]"),
        },
        "/volume" => match (parts.next(), parts.next().and_then(|p| p.parse::<u16>().ok())) {
            (Some(name), Some(percent)) => {
                if !session.set_peer_volume(name, percent) {
                    println!("no such user: {}", name);
                }
            }
            _ => println!("usage: /volume <user> <percent>"),
        },
        "/mute" => session.set_muted(true),
        "/unmute" => session.set_muted(false),
        "/monitor" => match parts.next() {
            Some("on") => session.set_monitor(true),
            Some("off") => session.set_monitor(false),
            _ => println!("usage: /monitor on|off"),
        },
        "/who" => {
            println!("online: {}", session.user_names().join(", "));
            for room in session.rooms() {
                println!("  {}: {}", room.name, room.members.join(", "));
            }
        }
        command if command.starts_with('/') => println!("unknown command: {}", command),
        _ => report(session.send_chat(line)),
    }
    true
}

fn report<E: std::fmt::Display>(result: Result<(), E>) {
    if let Err(e) = result {
        println!("error: {}", e);
    }
}

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let settings = match load_settings(&args) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("parley: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let sink = Arc::new(StdoutSink);
    let backend = Arc::new(CpalBackend::new());
    let key: Arc<dyn TalkKey> = match HotkeyTalkKey::new(&settings.ptt_key) {
        Ok(key) => Arc::new(key),
        Err(e) => {
            eprintln!("parley: push-to-talk unavailable ({}); voice key disabled", e);
            Arc::new(FlagTalkKey::new())
        }
    };

    let mut session = ChatSession::new(settings, sink, backend, key);
    let mut events = match session.connect().await {
        Ok(events) => events,
        Err(e) => {
            eprintln!("parley: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Blocking stdin reader feeding the async loop
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        session.handle_event(&event).await;
                        if matches!(
                            event,
                            ControlEvent::Closed { .. } | ControlEvent::ConnectionError(_)
                        ) {
                            break;
                        }
                    }
                    None => break,
                }
            }
            line = line_rx.recv() => {
                match line {
                    Some(line) => {
                        if !handle_line(&mut session, &line) {
                            break;
                        }
                    }
                    // Stdin closed: treat like /quit
                    None => break,
                }
            }
        }
    }

    session.disconnect().await;
    ExitCode::SUCCESS
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Args {
        Args::parse_from(std::iter::once("parley").chain(list.iter().copied()))
    }

    #[test]
    fn test_flags_override_defaults() {
        let settings = load_settings(&args(&[
            "--server",
            "chat.example.net",
            "--nickname",
            "alice",
            "--port",
            "7000",
        ]))
        .expect("settings");
        assert_eq!(settings.server, "chat.example.net");
        assert_eq!(settings.nickname, "alice");
        assert_eq!(settings.port, 7000);
    }

    #[test]
    fn test_missing_server_rejected() {
        let err = load_settings(&args(&["--nickname", "alice"])).expect_err("no server");
        assert!(err.contains("server"));
    }

    #[test]
    fn test_bad_nickname_rejected() {
        let err = load_settings(&args(&[
            "--server",
            "s",
            "--nickname",
            "not a valid name",
        ]))
        .expect_err("bad nickname");
        assert!(err.contains("nickname"));
    }
}
