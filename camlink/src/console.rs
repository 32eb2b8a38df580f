//! Line-oriented terminal front end

use crate::app::{AppSnapshot, CaptureApp};
use crate::event::{AppEvent, EventReceiver};
use crate::qr::render_qr;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Command summary printed by `help`
pub const HELP: &str = "\
Commands:
  login <user> <password>  open a session
  logout                   end the session and release everything
  webcam                   use the webcam
  screen                   share the screen
  mobile                   pair a phone camera through a QR code
  ipcam                    use an IP camera
  record                   start recording the current video
  stop                     stop recording and send the video for analysis
  release                  stop the current video
  status                   show the current state
  help                     show this list
  quit                     exit";

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a session
    Login {
        /// Username
        username: String,
        /// Password; may contain spaces
        password: String,
    },
    /// End the session
    Logout,
    /// Use the webcam
    Webcam,
    /// Share the screen
    Screen,
    /// Pair a phone camera
    Mobile,
    /// Use an IP camera
    IpCam,
    /// Start recording
    Record,
    /// Stop recording and analyze
    Stop,
    /// Release the current stream
    Release,
    /// Print the state
    Status,
    /// Print the command list
    Help,
    /// Exit
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "login" => {
                // Blank fields are passed through; the login gate reports them.
                let (username, password) = match rest.split_once(char::is_whitespace) {
                    Some((user, pass)) => (user.to_string(), pass.trim().to_string()),
                    None => (rest.to_string(), String::new()),
                };
                return Ok(Command::Login { username, password });
            }
            "logout" => Command::Logout,
            "webcam" => Command::Webcam,
            "screen" => Command::Screen,
            "mobile" => Command::Mobile,
            "ipcam" => Command::IpCam,
            "record" => Command::Record,
            "stop" => Command::Stop,
            "release" => Command::Release,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "" => return Err("empty command".to_string()),
            other => return Err(format!("unknown command '{}'", other)),
        };

        if !rest.is_empty() {
            return Err(format!("'{}' takes no arguments", word));
        }
        Ok(command)
    }
}

/// What a command printed and whether the console should exit
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Lines to print
    pub lines: Vec<String>,
    /// Leave the console
    pub quit: bool,
}

impl Reply {
    fn line(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
            quit: false,
        }
    }
}

/// Run one command. Failures are reported through [`AppEvent::Alert`], so they
/// add nothing to the reply.
pub async fn execute(app: &CaptureApp, command: Command) -> Reply {
    let result = match command {
        Command::Login { username, password } => app.login(&username, &password).await,
        Command::Logout => app.logout().await,
        Command::Webcam => app.use_webcam().await,
        Command::Screen => app.share_screen().await,
        Command::Mobile => app.connect_mobile().await.map(|_| ()),
        Command::IpCam => app.use_ip_camera().await,
        Command::Record => app.start_recording().await,
        Command::Stop => match app.stop_recording().await {
            Ok(None) => return Reply::line("Nothing is being recorded."),
            Ok(Some(_)) => Ok(()),
            Err(e) => Err(e),
        },
        Command::Release => app.stop_stream().await,
        Command::Status => {
            return Reply {
                lines: describe(&app.snapshot().await),
                quit: false,
            }
        }
        Command::Help => return Reply::line(HELP),
        Command::Quit => {
            return Reply {
                lines: Vec::new(),
                quit: true,
            }
        }
    };

    if let Err(e) = result {
        debug!("Command failed: {} ({})", e, e.error_code());
    }
    Reply::default()
}

/// Human-readable state summary
pub fn describe(snapshot: &AppSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    match &snapshot.username {
        Some(user) => lines.push(format!("Logged in as {}", user)),
        None => {
            lines.push("Not logged in".to_string());
            if let Some(error) = &snapshot.login_error {
                lines.push(format!("Login error: {}", error));
            }
        }
    }
    lines.push(match snapshot.stream {
        Some(source) => format!("Video: {}", source.label()),
        None => "Video: none".to_string(),
    });
    if let Some(pairing) = &snapshot.pairing {
        lines.push(format!(
            "Pairing: {} ({}) {}",
            pairing.session_id, pairing.state, pairing.url
        ));
    }
    lines.push(format!(
        "Recording: {}{}",
        if snapshot.recording { "yes" } else { "no" },
        if snapshot.can_record() {
            " (record available)"
        } else {
            ""
        }
    ));
    if !snapshot.status.is_empty() {
        lines.push(format!("Status: {}", snapshot.status));
    }
    lines
}

/// Text for an event, or `None` for events the console does not show
pub fn render_event(event: &AppEvent) -> Option<String> {
    match event {
        AppEvent::LoggedIn { username } => Some(format!("Logged in as {}", username)),
        AppEvent::LoginFailed { message } => Some(format!("Login failed: {}", message)),
        AppEvent::LoggedOut => Some("Logged out".to_string()),
        AppEvent::StatusChanged { status } if status.is_empty() => None,
        AppEvent::StatusChanged { status } => Some(status.clone()),
        AppEvent::Alert { message } => Some(format!("[!] {}", message)),
        AppEvent::StreamChanged { source: Some(source) } => {
            Some(format!("Showing {}", source.label()))
        }
        AppEvent::StreamChanged { source: None } => Some("Video released".to_string()),
        AppEvent::RecordingChanged { .. } => None,
        AppEvent::PairingStarted { session_id, url } => {
            let mut text = format!("Pairing session {}\n{}", session_id, url);
            match render_qr(url) {
                Ok(qr) => {
                    text.push('\n');
                    text.push_str(&qr);
                }
                Err(e) => warn!("Could not render QR code: {}", e),
            }
            Some(text)
        }
        AppEvent::PairingStateChanged { state } => Some(format!("Pairing {}", state)),
        AppEvent::PairingCleared => None,
    }
}

/// Read commands from `input` until `quit` or end of input, printing to stdout
pub async fn run<R>(app: CaptureApp, input: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    run_with_output(app, input, tokio::io::stdout()).await?;
    Ok(())
}

/// Like [`run`], writing replies and events to `output`, which is handed back
/// once every event raised by the final logout has been written.
pub async fn run_with_output<R, W>(app: CaptureApp, input: R, output: W) -> anyhow::Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (replies, reply_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_loop(app.events(), reply_rx, output));

    let _ = replies.send(HELP.to_string());
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                let _ = replies.send(format!("{} (type 'help' for the command list)", e));
                continue;
            }
        };
        let reply = execute(&app, command).await;
        for line in reply.lines {
            let _ = replies.send(line);
        }
        if reply.quit {
            break;
        }
    }

    if app.snapshot().await.username.is_some() {
        // Releases capture processes, the recorder and the pairing session.
        let _ = app.logout().await;
    }
    // Closing the reply channel tells the printer to flush queued events and stop.
    drop(replies);
    Ok(printer.await??)
}

async fn print_loop<W>(
    mut events: EventReceiver,
    mut replies: mpsc::UnboundedReceiver<String>,
    mut output: W,
) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => write_event(&mut output, &event).await?,
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            reply = replies.recv() => match reply {
                Some(line) => write_line(&mut output, &line).await?,
                None => {
                    loop {
                        match events.try_recv() {
                            Ok(event) => write_event(&mut output, &event).await?,
                            Err(TryRecvError::Lagged(skipped)) => {
                                warn!("Skipped {} events", skipped)
                            }
                            Err(_) => break,
                        }
                    }
                    break;
                }
            },
        }
    }
    output.flush().await?;
    Ok(output)
}

async fn write_event<W>(output: &mut W, event: &AppEvent) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match render_event(event) {
        Some(text) => {
            let stamped = format!("{} {}", chrono::Local::now().format("%H:%M:%S"), text);
            write_line(output, &stamped).await
        }
        None => Ok(()),
    }
}

async fn write_line<W>(output: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
