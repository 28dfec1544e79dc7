use crate::{
    constants::DEFAULT_SPEED_MS,
    event::{Event, EventBus},
    gemini::AnalysisClient,
    speech::SpeechPlayer,
    trace::{ExecutionStep, RawTrace, TraceData},
    view::ViewAction,
};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::RwLock,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum PlaybackState {
    /// No trace loaded
    #[default]
    Idle,

    /// Waiting for the analysis response
    Loading,

    /// Advancing automatically on every timer tick
    Playing,

    /// Trace loaded, cursor only moves on request
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "IDLE",
            PlaybackState::Loading => "LOADING",
            PlaybackState::Playing => "PLAYING",
            PlaybackState::Paused => "PAUSED",
        };
        f.write_str(name)
    }
}

/// Auto-advance presets offered by the speed selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Speed {
    Slow,
    Normal,
    Fast,
    Turbo,
}

impl Speed {
    pub const ALL: [Speed; 4] = [Speed::Slow, Speed::Normal, Speed::Fast, Speed::Turbo];

    pub fn millis(self) -> u64 {
        match self {
            Speed::Slow => 3000,
            Speed::Normal => 1500,
            Speed::Fast => 800,
            Speed::Turbo => 400,
        }
    }

    pub fn from_name(name: &str) -> Option<Speed> {
        match name.to_ascii_lowercase().as_str() {
            "slow" => Some(Speed::Slow),
            "normal" => Some(Speed::Normal),
            "fast" => Some(Speed::Fast),
            "turbo" => Some(Speed::Turbo),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackAction {
    /// Requests a new trace for `source`, replacing the current one
    Analyze {
        source: Arc<String>,
        line_range: (usize, usize),
    },

    /// Starts auto-advance
    Play,

    /// Stops auto-advance and narration
    Pause,

    /// Play if paused, pause if playing
    Toggle,

    /// Step forward
    Next,

    /// Step back
    Prev,

    /// Moves the cursor to a step, clamped to the trace
    Seek { index: usize },

    /// Moves the cursor to the first step on a source line
    SeekLine { line: usize },

    /// Changes the auto-advance period
    SetSpeed { ms: u64 },

    /// Switches narration on or off
    SetNarration { enabled: bool },

    /// Switches narration on if off, off if on
    ToggleNarration,

    /// Auto-advance timer fired
    Tick { timer: u64 },
}

struct Timer {
    id: u64,
    cancel: CancellationToken,
}

pub struct Playback {
    bus: EventBus,
    analyzer: Arc<dyn AnalysisClient>,
    speech: SpeechPlayer,
    state: PlaybackState,
    /// Source text of the trace being loaded or shown
    source: Arc<String>,
    trace: Option<Arc<TraceData>>,
    cursor: Option<usize>,
    speed_ms: u64,
    timer: Option<Timer>,
    next_timer_id: u64,
}

impl Playback {
    pub fn new(
        bus: &EventBus,
        analyzer: Arc<dyn AnalysisClient>,
        speech: SpeechPlayer,
        speed_ms: u64,
    ) -> Playback {
        let speed_ms = if speed_ms == 0 {
            warn!("Auto-advance period of 0ms requested, using {DEFAULT_SPEED_MS}ms");
            DEFAULT_SPEED_MS
        } else {
            speed_ms
        };

        Playback {
            bus: bus.clone(),
            analyzer,
            speech,
            state: PlaybackState::Idle,
            source: Arc::default(),
            trace: None,
            cursor: None,
            speed_ms,
            timer: None,
            next_timer_id: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn source(&self) -> &Arc<String> {
        &self.source
    }

    pub fn trace(&self) -> Option<&Arc<TraceData>> {
        self.trace.as_ref()
    }

    /// Current step index, `None` while no trace is loaded.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current_step(&self) -> Option<&ExecutionStep> {
        self.trace.as_ref()?.step(self.cursor?)
    }

    /// Line to highlight, `None` while no trace is loaded.
    pub fn current_line(&self) -> Option<usize> {
        self.current_step().map(|step| step.line_number)
    }

    pub fn speed_ms(&self) -> u64 {
        self.speed_ms
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn speech(&self) -> &SpeechPlayer {
        &self.speech
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!("Playback state {} -> {}", self.state, state);
            self.state = state;
            self.bus.view(ViewAction::State { state });
        }
    }

    /// Enters [PlaybackState::Loading] for `source`, dropping the current trace.
    pub fn begin_loading(&mut self, source: Arc<String>) -> Result<()> {
        if self.state == PlaybackState::Loading {
            self.bus.notice("Analysis already in progress");
            bail!("Analysis already in progress");
        }

        self.disarm_timer();
        self.speech.stop();
        self.source = source;
        self.trace = None;
        self.cursor = None;
        self.set_state(PlaybackState::Loading);

        Ok(())
    }

    /// Applies the outcome of the analysis request started by [Self::begin_loading].
    pub fn finish_loading(&mut self, result: Result<RawTrace>) -> Result<Arc<TraceData>> {
        if self.state != PlaybackState::Loading {
            bail!("No analysis in progress");
        }

        match result.and_then(TraceData::from_raw) {
            Ok(trace) => Ok(self.load_trace(trace)),
            Err(e) => {
                error!("Failed to analyze code: {e:#}");
                self.set_state(PlaybackState::Idle);
                self.bus.notice(format!("Analysis failed: {e:#}"));
                Err(e)
            }
        }
    }

    /// Replaces the trace wholesale and moves to its first step, paused.
    pub fn load_trace(&mut self, trace: TraceData) -> Arc<TraceData> {
        self.disarm_timer();

        let trace = Arc::new(trace);
        info!(
            "Loaded trace with {} steps: {}",
            trace.len(),
            trace.summary
        );

        self.trace = Some(trace.clone());
        self.cursor = None;
        self.set_state(PlaybackState::Paused);
        self.bus.view(ViewAction::TraceLoaded {
            source: self.source.clone(),
            summary: trace.summary.clone(),
            total: trace.len(),
        });
        self.set_cursor(0);

        trace
    }

    pub fn play(&mut self) {
        if self.trace.is_none() {
            warn!("Play requested without a trace, ignoring");
            return;
        }
        if self.state == PlaybackState::Playing {
            return;
        }

        info!("Playback resumed");
        self.set_state(PlaybackState::Playing);
        self.arm_timer();
    }

    pub fn pause(&mut self) {
        self.disarm_timer();
        self.speech.stop();

        if self.trace.is_some() {
            info!("Playback paused");
            self.set_state(PlaybackState::Paused);
        }
    }

    pub fn toggle(&mut self) {
        if self.state == PlaybackState::Playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Steps forward. At the last step this only stops auto-advance.
    pub fn advance(&mut self) {
        let (Some(last), Some(cursor)) = (self.trace.as_ref().map(|t| t.last_index()), self.cursor)
        else {
            return;
        };

        if cursor >= last {
            if self.state == PlaybackState::Playing {
                info!("Reached end of trace");
            }
            self.disarm_timer();
            self.set_state(PlaybackState::Paused);
        } else {
            self.set_cursor(cursor + 1);
        }
    }

    pub fn retreat(&mut self) {
        if let Some(cursor) = self.cursor.filter(|cursor| *cursor > 0) {
            self.set_cursor(cursor - 1);
        }
    }

    /// Moves the cursor to `index`, clamped to the trace.
    pub fn seek(&mut self, index: usize) {
        let Some(last) = self.trace.as_ref().map(|trace| trace.last_index()) else {
            return;
        };

        self.set_cursor(index.min(last));
    }

    pub fn seek_line(&mut self, line: usize) {
        let index = self
            .trace
            .as_ref()
            .and_then(|trace| trace.first_step_on_line(line));

        match index {
            Some(index) => self.seek(index),
            None => debug!("No step on line {line}"),
        }
    }

    /// Changes the auto-advance period. A running timer restarts from zero.
    pub fn set_speed(&mut self, ms: u64) -> Result<()> {
        if ms == 0 {
            bail!("Speed must be a positive number of milliseconds");
        }

        self.speed_ms = ms;
        self.bus.view(ViewAction::Speed { ms });

        if self.state == PlaybackState::Playing {
            self.arm_timer();
        }

        Ok(())
    }

    /// Switches narration on or off. Turning it on narrates the current step.
    pub async fn set_narration(&mut self, enabled: bool) {
        self.speech.set_enabled(enabled).await;
        self.bus.view(ViewAction::Narration { enabled });

        if enabled {
            self.narrate_current_step();
        }
    }

    pub fn tick(&mut self, timer: u64) {
        let is_armed = self.timer.as_ref().is_some_and(|t| t.id == timer);

        if is_armed && self.state == PlaybackState::Playing {
            self.advance();
        } else {
            trace!("Ignoring tick from stale timer {timer}");
        }
    }

    fn set_cursor(&mut self, index: usize) {
        if self.cursor == Some(index) {
            return;
        }

        self.cursor = Some(index);

        if let (Some(trace), Some(step)) = (&self.trace, self.current_step()) {
            self.bus.view(ViewAction::ShowStep {
                index,
                total: trace.len(),
                step: step.clone(),
            });
        }

        self.narrate_current_step();
    }

    fn narrate_current_step(&self) {
        if let Some(step) = self.current_step() {
            // The narration runs detached, the controller never waits for it
            let _ = self.speech.start_speaking(step.explanation.clone());
        }
    }

    fn arm_timer(&mut self) {
        self.disarm_timer();

        self.next_timer_id += 1;
        let id = self.next_timer_id;
        let cancel = CancellationToken::new();
        let period = Duration::from_millis(self.speed_ms);

        start_timer_loop(self.bus.clone(), id, period, cancel.clone());
        self.timer = Some(Timer { id, cancel });
    }

    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel.cancel();
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.disarm_timer();
    }
}

fn start_timer_loop(bus: EventBus, id: u64, period: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => bus.playback(PlaybackAction::Tick { timer: id }),
            }
        }
    });
}

/// Type alias for shared playback state
pub type SharedPlayback = Arc<RwLock<Playback>>;

/// Requests a new trace and loads it. The lock is released while the
/// analysis request is in flight.
pub async fn start(
    playback: &SharedPlayback,
    source: &str,
    line_range: (usize, usize),
) -> Result<Arc<TraceData>> {
    let source = Arc::new(source.to_owned());
    let analyzer = {
        let mut playback = playback.write().await;
        playback.begin_loading(source.clone())?;
        playback.analyzer.clone()
    };

    info!(
        "Requesting analysis of {} lines, focusing on {}-{}",
        source.lines().count(),
        line_range.0,
        line_range.1
    );

    let result = analyzer.analyze(&source, line_range).await;

    playback.write().await.finish_loading(result)
}

/// Starts the event loop for `playback`. The loop only holds a weak
/// reference: dropping the returned handle drops the controller, which
/// disarms its timer, and the loop exits on the next event.
pub fn init(bus: &EventBus, playback: Playback) -> SharedPlayback {
    let playback = Arc::new(RwLock::new(playback));

    handle_incoming_event_loop(bus.clone(), Arc::downgrade(&playback));

    playback
}

fn handle_incoming_event_loop(bus: EventBus, playback: Weak<RwLock<Playback>>) {
    let mut subscriber = bus.subscribe();

    tokio::spawn(async move {
        while let Some(event) = subscriber.recv().await {
            let Event::Playback(action) = event else {
                continue;
            };
            let Some(playback) = playback.upgrade() else {
                break;
            };

            handle_incoming_event(&bus, &playback, action).await;
        }

        debug!("Playback event loop stopped");
    });
}

pub async fn handle_incoming_event(
    bus: &EventBus,
    playback: &SharedPlayback,
    action: PlaybackAction,
) {
    match action {
        PlaybackAction::Analyze { source, line_range } => {
            // Analysis runs alongside the loop so transport actions keep flowing
            let playback = playback.clone();
            tokio::spawn(async move {
                if let Err(e) = start(&playback, &source, line_range).await {
                    debug!("Analysis request ended with error: {e:#}");
                }
            });
        }
        action => {
            let mut playback = playback.write().await;
            apply_action(bus, &mut playback, action).await;
        }
    }
}

async fn apply_action(bus: &EventBus, playback: &mut Playback, action: PlaybackAction) {
    match action {
        PlaybackAction::Analyze { .. } => {
            warn!("Analyze must go through playback::start");
        }
        PlaybackAction::Play => playback.play(),
        PlaybackAction::Pause => playback.pause(),
        PlaybackAction::Toggle => playback.toggle(),
        PlaybackAction::Next => playback.advance(),
        PlaybackAction::Prev => playback.retreat(),
        PlaybackAction::Seek { index } => playback.seek(index),
        PlaybackAction::SeekLine { line } => playback.seek_line(line),
        PlaybackAction::SetSpeed { ms } => {
            if let Err(e) = playback.set_speed(ms) {
                bus.notice(format!("{e:#}"));
            }
        }
        PlaybackAction::SetNarration { enabled } => playback.set_narration(enabled).await,
        PlaybackAction::ToggleNarration => {
            let enabled = !playback.speech().is_enabled();
            playback.set_narration(enabled).await;
        }
        PlaybackAction::Tick { timer } => playback.tick(timer),
    }
}
