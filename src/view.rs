//! Terminal rendering of the trace: a line-numbered code window centred on
//! the current step's line, plus explanation, variables and status.

use crate::{
    constants::CODE_WINDOW_HEIGHT,
    event::{Event, EventBus},
    playback::PlaybackState,
    trace::ExecutionStep,
};
use itertools::Itertools;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum ViewAction {
    /// A new trace replaced the previous one. `source` is the text it was
    /// produced from and what following steps are shown against.
    TraceLoaded {
        source: Arc<String>,
        summary: String,
        total: usize,
    },

    /// The cursor moved to `index`
    ShowStep {
        index: usize,
        total: usize,
        step: ExecutionStep,
    },

    /// Playback state changed
    State { state: PlaybackState },

    /// Auto-advance period changed
    Speed { ms: u64 },

    /// Narration was switched on or off
    Narration { enabled: bool },

    /// Narration audio started or finished
    Speaking { speaking: bool },

    /// User-visible failure notice
    Notice { text: String },
}

/// Renders up to `height` numbered lines of `source`, centred on
/// `active_line` (1-based) and clamped to the start and end of the file.
/// Without an active line the top of the file is shown.
pub fn render_code_window(source: &str, active_line: Option<usize>, height: usize) -> Vec<String> {
    let lines: Vec<&str> = source.lines().collect();
    let total = lines.len();
    if total == 0 || height == 0 {
        return vec![];
    }

    let active = active_line.filter(|line| (1..=total).contains(line));
    let start = match active {
        Some(line) => (line - 1)
            .saturating_sub(height / 2)
            .min(total.saturating_sub(height)),
        None => 0,
    };
    let end = (start + height).min(total);
    let width = total.to_string().len();

    lines[start..end]
        .iter()
        .enumerate()
        .map(|(offset, text)| {
            let line_number = start + offset + 1;
            let marker = if Some(line_number) == active { '>' } else { ' ' };
            format!("{marker} {line_number:>width$} | {text}")
        })
        .collect()
}

/// One `name = value` line per simulated variable.
pub fn render_variables(step: &ExecutionStep) -> Vec<String> {
    if let Some(error) = &step.variable_state_error {
        return vec![format!("(variable state unavailable: {error})")];
    }

    match &step.variable_state {
        Some(state) if !state.is_empty() => state
            .iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect(),
        Some(_) => vec!["(no variables)".to_string()],
        None => vec!["(no variables in current scope)".to_string()],
    }
}

pub fn render_step(source: &str, index: usize, total: usize, step: &ExecutionStep) -> String {
    let important = if step.is_important() { " [!]" } else { "" };
    let header = format!(
        "── step {}/{} · line {}{important} ──",
        index + 1,
        total,
        step.line_number
    );

    let code = render_code_window(source, Some(step.line_number), CODE_WINDOW_HEIGHT);
    let variables = render_variables(step)
        .into_iter()
        .map(|line| format!("  {line}"))
        .join("\n");

    format!(
        "{header}\n{}\n\n{}\n\nvariables:\n{variables}",
        code.join("\n"),
        step.explanation
    )
}

pub fn init(bus: &EventBus) {
    let mut subscriber = bus.subscribe();

    tokio::spawn(async move {
        let mut source: Arc<String> = Arc::default();

        while let Some(event) = subscriber.recv().await {
            if let Event::View(action) = event {
                if let ViewAction::TraceLoaded { source: loaded, .. } = &action {
                    source = loaded.clone();
                }
                if let Some(text) = render_action(&source, &action) {
                    println!("{text}");
                }
            }
        }
    });
}

fn render_action(source: &str, action: &ViewAction) -> Option<String> {
    let text = match action {
        ViewAction::TraceLoaded { summary, total, .. } => {
            format!("Program overview ({total} steps): {summary}")
        }
        ViewAction::ShowStep { index, total, step } => render_step(source, *index, *total, step),
        ViewAction::State { state } => format!("[{state}]"),
        ViewAction::Speed { ms } => format!("Speed: {:.1}s per step", *ms as f64 / 1000.0),
        ViewAction::Narration { enabled } => {
            format!("Narration {}", if *enabled { "on" } else { "off" })
        }
        // Only announce the start, the end would interleave with step output
        ViewAction::Speaking { speaking: true } => "(speaking…)".to_string(),
        ViewAction::Speaking { speaking: false } => return None,
        ViewAction::Notice { text } => format!("!! {text}"),
    };

    Some(text)
}
