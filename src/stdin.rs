//! Transport commands typed on stdin.

use crate::{
    event::EventBus,
    playback::{PlaybackAction, Speed},
};
use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::{io::BufRead, path::Path, sync::Arc};
use tokio::sync::mpsc;

pub const HELP_TEXT: &str = r#"
Commands:
  analyze | a             re-read the source file and load a new trace
  play | pause | <enter>  start / stop auto-advance
  next | n, prev | p      step forward / back
  first, last             jump to the first / last step
  seek <step>             jump to a step (1-based)
  line <n>                jump to the first step on source line n
  speed <slow|normal|fast|turbo|ms>
  tts [on|off]            narration
  help | ?, quit | q"#;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Re-read the source file and request a new trace
    Analyze,
    Playback(PlaybackAction),
    Help,
    Quit,
}

lazy_static! {
    static ref COMMAND_RE: Regex =
        Regex::new(r"^(?P<cmd>[a-z?]+)(?:\s+(?P<arg>\S+))?$").unwrap();
}

/// Parses one line of input. An empty line toggles play/pause.
pub fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim().to_ascii_lowercase();
    if line.is_empty() {
        return Ok(Command::Playback(PlaybackAction::Toggle));
    }

    let captures = COMMAND_RE
        .captures(&line)
        .ok_or_else(|| anyhow!("Unrecognized command: {line}"))?;
    let cmd = &captures["cmd"];
    let arg = captures.name("arg").map(|arg| arg.as_str());

    let parse_number = |what: &str| -> Result<usize> {
        arg.ok_or_else(|| anyhow!("{cmd} needs a {what}"))?
            .parse()
            .map_err(|_| anyhow!("{cmd} needs a {what}"))
    };

    let action = match cmd {
        "analyze" | "a" => return Ok(Command::Analyze),
        "play" => PlaybackAction::Play,
        "pause" => PlaybackAction::Pause,
        "toggle" => PlaybackAction::Toggle,
        "next" | "n" => PlaybackAction::Next,
        "prev" | "p" => PlaybackAction::Prev,
        "first" | "home" => PlaybackAction::Seek { index: 0 },
        "last" | "end" => PlaybackAction::Seek { index: usize::MAX },
        "seek" => PlaybackAction::Seek {
            index: parse_number("step number")?.saturating_sub(1),
        },
        "line" => PlaybackAction::SeekLine {
            line: parse_number("line number")?,
        },
        "speed" => {
            let arg = arg.ok_or_else(|| anyhow!("speed needs slow, normal, fast, turbo or ms"))?;
            let ms = match Speed::from_name(arg) {
                Some(speed) => speed.millis(),
                None => arg
                    .parse()
                    .map_err(|_| anyhow!("Unknown speed: {arg}"))?,
            };
            PlaybackAction::SetSpeed { ms }
        }
        "tts" => match arg {
            None => PlaybackAction::ToggleNarration,
            Some("on") => PlaybackAction::SetNarration { enabled: true },
            Some("off") => PlaybackAction::SetNarration { enabled: false },
            Some(other) => return Err(anyhow!("tts takes on or off, not {other}")),
        },
        "help" | "?" => return Ok(Command::Help),
        "quit" | "q" | "exit" => return Ok(Command::Quit),
        other => return Err(anyhow!("Unknown command: {other}")),
    };

    Ok(Command::Playback(action))
}

pub async fn read_source(path: &Path) -> Result<Arc<String>> {
    let source = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(Arc::new(source))
}

/// Reads the current contents of `path` and requests a trace for them.
pub async fn analyze(bus: &EventBus, path: &Path, line_range: (usize, usize)) -> Result<()> {
    let source = read_source(path).await?;
    bus.playback(PlaybackAction::Analyze { source, line_range });

    Ok(())
}

/// Forwards stdin lines from a plain thread. A blocking read inside the
/// runtime would keep it from shutting down until the next newline.
pub fn spawn_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            };

            if tx.send(line).is_err() {
                break;
            }
        }
    });

    rx
}

/// Handles commands until the input closes or the user quits.
pub async fn run(
    bus: EventBus,
    path: &Path,
    line_range: (usize, usize),
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        match parse_command(&line) {
            Ok(Command::Analyze) => {
                if let Err(e) = analyze(&bus, path, line_range).await {
                    bus.notice(format!("{e:#}"));
                }
            }
            Ok(Command::Playback(action)) => bus.playback(action),
            Ok(Command::Help) => println!("{HELP_TEXT}"),
            Ok(Command::Quit) => break,
            Err(e) => println!("{e} (type help for commands)"),
        }
    }
}
