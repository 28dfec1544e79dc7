//! Test infrastructure for trace-walker integration tests.
//!
//! Provides fake remote clients, a test harness, and helper functions
//! for testing the playback controller and narration without network access.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

// Re-export key types from the main crate
pub use trace_walker::event::{Event, EventBus, Subscriber};
pub use trace_walker::gemini::{AnalysisClient, SpeechClient};
pub use trace_walker::output::AudioOutput;
pub use trace_walker::playback::{Playback, PlaybackAction, PlaybackState, SharedPlayback};
pub use trace_walker::speech::SpeechPlayer;
pub use trace_walker::trace::{RawStep, RawTrace};
pub use trace_walker::view::ViewAction;

/// Creates a raw step for `line` with the given explanation.
pub fn raw_step(line: usize, explanation: &str) -> RawStep {
    RawStep {
        line_number: line,
        explanation: explanation.to_string(),
        variable_state_json: None,
        important_change: None,
    }
}

/// Creates a raw trace with one step per entry of `lines`.
pub fn raw_trace(lines: &[usize]) -> RawTrace {
    RawTrace {
        summary: "Test program".to_string(),
        steps: lines
            .iter()
            .map(|line| raw_step(*line, &format!("explains line {line}")))
            .collect(),
    }
}

/// The two step trace over lines 3 and 5.
pub fn demo_trace() -> RawTrace {
    RawTrace {
        summary: "Adds two numbers".to_string(),
        steps: vec![raw_step(3, "x is set"), raw_step(5, "y is set")],
    }
}

pub const DEMO_SOURCE: &str = "# demo\n\nx = 1\n\ny = x + 1\nprint(y)\n";

/// Encodes `samples` as base64 16-bit little-endian PCM.
pub fn pcm_base64(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

/// Analysis client returning a canned response.
pub struct FakeAnalysisClient {
    response: Mutex<Result<RawTrace, String>>,
    delay: Duration,
    calls: Mutex<Vec<(usize, usize)>>,
}

impl FakeAnalysisClient {
    pub fn new(trace: RawTrace) -> Arc<Self> {
        Self::with_response(Ok(trace), Duration::ZERO)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::with_response(Err(message.to_string()), Duration::ZERO)
    }

    pub fn with_response(response: Result<RawTrace, String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(response),
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Changes what the next analysis returns.
    pub fn respond_with(&self, response: Result<RawTrace, String>) {
        *self.response.lock().unwrap() = response;
    }

    /// Line ranges of every analysis request so far.
    pub fn calls(&self) -> Vec<(usize, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisClient for FakeAnalysisClient {
    async fn analyze(&self, _source: &str, line_range: (usize, usize)) -> anyhow::Result<RawTrace> {
        self.calls.lock().unwrap().push(line_range);
        tokio::time::sleep(self.delay).await;

        self.response
            .lock()
            .unwrap()
            .clone()
            .map_err(|e| anyhow::anyhow!(e))
    }
}

/// Speech client recording the requested texts.
pub struct FakeSpeechClient {
    audio: Mutex<Result<Option<String>, String>>,
    delays: Mutex<VecDeque<Duration>>,
    texts: Mutex<Vec<String>>,
}

impl FakeSpeechClient {
    /// Responds with `samples` of audio for every request.
    pub fn with_samples(samples: usize) -> Arc<Self> {
        Self::with_audio(Ok(Some(pcm_base64(&vec![1000; samples]))))
    }

    pub fn silent() -> Arc<Self> {
        Self::with_audio(Ok(None))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::with_audio(Err(message.to_string()))
    }

    pub fn with_audio(audio: Result<Option<String>, String>) -> Arc<Self> {
        Arc::new(Self {
            audio: Mutex::new(audio),
            delays: Mutex::new(VecDeque::new()),
            texts: Mutex::new(Vec::new()),
        })
    }

    /// Delays for the next requests, in order. Later requests answer at once.
    pub fn delay_next(&self, delays: &[Duration]) {
        self.delays.lock().unwrap().extend(delays.iter().copied());
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechClient for FakeSpeechClient {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Option<String>> {
        self.texts.lock().unwrap().push(text.to_string());
        let delay = self.delays.lock().unwrap().pop_front().unwrap_or_default();
        tokio::time::sleep(delay).await;

        self.audio
            .lock()
            .unwrap()
            .clone()
            .map_err(|e| anyhow::anyhow!(e))
    }
}

/// Test harness wiring a controller to fake clients on a fresh bus.
pub struct TestHarness {
    pub bus: EventBus,
    pub analyzer: Arc<FakeAnalysisClient>,
    pub speech_client: Arc<FakeSpeechClient>,
    pub output: AudioOutput,
    pub speech: SpeechPlayer,
}

impl TestHarness {
    /// Creates a harness whose analysis returns `trace` and whose narration
    /// produces one second of audio.
    pub async fn new(trace: RawTrace) -> Self {
        Self::with_clients(
            FakeAnalysisClient::new(trace),
            FakeSpeechClient::with_samples(24_000),
        )
        .await
    }

    pub async fn with_clients(
        analyzer: Arc<FakeAnalysisClient>,
        speech_client: Arc<FakeSpeechClient>,
    ) -> Self {
        let bus = EventBus::new();
        let output = AudioOutput::start(None).await.unwrap();
        let speech = SpeechPlayer::with_output(&bus, speech_client.clone(), output.clone());

        Self {
            bus,
            analyzer,
            speech_client,
            output,
            speech,
        }
    }

    /// Creates a controller with the given auto-advance period.
    pub fn playback(&self, speed_ms: u64) -> Playback {
        Playback::new(&self.bus, self.analyzer.clone(), self.speech.clone(), speed_ms)
    }

    /// Creates a shared controller that is not attached to the bus.
    pub fn shared_playback(&self, speed_ms: u64) -> SharedPlayback {
        Arc::new(tokio::sync::RwLock::new(self.playback(speed_ms)))
    }

    pub fn subscribe(&self) -> Subscriber {
        self.bus.subscribe()
    }

    pub fn send_playback(&self, action: PlaybackAction) {
        self.bus.playback(action);
    }
}

/// Collects all events from a subscriber within a timeout period.
/// Returns events in the order they were received.
pub async fn collect_events(subscriber: &mut Subscriber, timeout: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match subscriber.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) => {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(TryRecvError::Lagged(n)) => {
                eprintln!("Warning: subscriber lagged, missed {n} events");
            }
            Err(TryRecvError::Closed) => break,
        }
    }

    events
}

/// Waits for a specific type of event within a timeout.
pub async fn wait_for_event<F>(
    subscriber: &mut Subscriber,
    timeout: Duration,
    matches: F,
) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match subscriber.try_recv() {
            Ok(event) if matches(&event) => return Some(event),
            Ok(_) => continue,
            Err(TryRecvError::Empty) => {
                if tokio::time::Instant::now() >= deadline {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => return None,
        }
    }
}

/// Polls `condition` every 10ms until it holds or the timeout passes.
pub async fn eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    condition()
}

/// Filters view events.
pub fn filter_view_events(events: &[Event]) -> Vec<&ViewAction> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::View(action) => Some(action),
            _ => None,
        })
        .collect()
}

/// Step indices of every ShowStep event, in order.
pub fn shown_steps(events: &[Event]) -> Vec<usize> {
    filter_view_events(events)
        .into_iter()
        .filter_map(|action| match action {
            ViewAction::ShowStep { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

/// Texts of every failure notice.
pub fn notices(events: &[Event]) -> Vec<&str> {
    filter_view_events(events)
        .into_iter()
        .filter_map(|action| match action {
            ViewAction::Notice { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Asserts that a specific event type was received.
#[macro_export]
macro_rules! assert_event_received {
    ($events:expr, $pattern:pat) => {
        assert!(
            $events.iter().any(|e| matches!(e, $pattern)),
            "Expected event matching {} not found in {:?}",
            stringify!($pattern),
            $events
        );
    };
}

/// Asserts that a specific event type was NOT received.
#[macro_export]
macro_rules! assert_event_not_received {
    ($events:expr, $pattern:pat) => {
        assert!(
            !$events.iter().any(|e| matches!(e, $pattern)),
            "Unexpected event matching {} found in {:?}",
            stringify!($pattern),
            $events
        );
    };
}
