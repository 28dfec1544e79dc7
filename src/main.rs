#[macro_use]
extern crate log;

use anyhow::{anyhow, bail, Context, Result};
use std::{path::PathBuf, sync::Arc};
use trace_walker::{
    config,
    constants::DEFAULT_LINE_RANGE,
    event::{self, EventBus},
    gemini::GeminiClient,
    playback::{self, Playback, PlaybackAction},
    speech::SpeechPlayer,
    stdin, view,
};

const USAGE: &str = "usage: trace-walker <source-file> [from-line] [to-line]";

fn parse_args() -> Result<(PathBuf, (usize, usize))> {
    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(args.next().ok_or_else(|| anyhow!(USAGE))?);

    let mut parse_line = |default: usize| -> Result<usize> {
        match args.next() {
            Some(arg) => arg.parse().with_context(|| format!("{arg} is not a line number")),
            None => Ok(default),
        }
    };
    let from = parse_line(DEFAULT_LINE_RANGE.0)?;
    let to = parse_line(DEFAULT_LINE_RANGE.1.max(from))?;

    if from == 0 || to < from {
        bail!("Invalid line range {from}-{to}\n{USAGE}");
    }

    Ok((path, (from, to)))
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let (path, line_range) = parse_args()?;
    let source = stdin::read_source(&path).await?;

    let config = config::load().await?;
    if config.gemini.api_key.is_none() {
        warn!("No API key configured, analysis will fail until GEMINI_API_KEY is set");
    }

    let bus = EventBus::new();
    event::debug(&bus);
    view::init(&bus);

    let client = Arc::new(GeminiClient::new(config.gemini.clone())?);
    let speech = SpeechPlayer::new(
        &bus,
        client.clone(),
        config.playback.output_addr().map(str::to_string),
    );
    let playback = playback::init(
        &bus,
        Playback::new(&bus, client, speech, config.playback.speed_ms),
    );

    if config.playback.narration {
        bus.playback(PlaybackAction::SetNarration { enabled: true });
    }

    info!(
        "Walking {} ({} lines)",
        path.display(),
        source.lines().count()
    );
    println!("{}", stdin::HELP_TEXT);

    bus.playback(PlaybackAction::Analyze { source, line_range });

    tokio::select! {
        _ = stdin::run(bus.clone(), &path, line_range, stdin::spawn_reader()) => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    // Stop narration and drop the controller, which disarms its timer
    playback.write().await.pause();
    drop(playback);

    Ok(())
}
