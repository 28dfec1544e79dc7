//! Narration of trace steps.
//!
//! Every call to [SpeechPlayer::speak] starts a new narration generation and
//! supersedes the previous one: its audio is halted, and a synthesis response
//! that arrives for an older generation is dropped instead of played.

use crate::{
    constants::{NARRATION_CHANNELS, NARRATION_SAMPLE_RATE},
    event::EventBus,
    gemini::SpeechClient,
    output::{self, AudioOutput, Sample},
    pcm,
    view::ViewAction,
};
use anyhow::Result;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::{sync::OnceCell, task::JoinHandle};

struct Inner {
    bus: EventBus,
    client: Arc<dyn SpeechClient>,
    output: OnceCell<AudioOutput>,
    output_addr: Option<String>,
    enabled: AtomicBool,
    speaking: AtomicBool,
    /// Newest narration generation. Held while starting or superseding audio
    /// so that a stale narration can never slip in after a newer one.
    generation: Mutex<u64>,
}

/// Cheap to clone handle shared between the playback controller and the
/// tasks it spawns.
#[derive(Clone)]
pub struct SpeechPlayer {
    inner: Arc<Inner>,
}

impl SpeechPlayer {
    /// Creates a player whose audio output is started on first use.
    pub fn new(bus: &EventBus, client: Arc<dyn SpeechClient>, output_addr: Option<String>) -> Self {
        Self::with_cell(bus, client, OnceCell::new(), output_addr)
    }

    /// Creates a player on top of an already running audio output.
    pub fn with_output(bus: &EventBus, client: Arc<dyn SpeechClient>, output: AudioOutput) -> Self {
        Self::with_cell(bus, client, OnceCell::from(output), None)
    }

    fn with_cell(
        bus: &EventBus,
        client: Arc<dyn SpeechClient>,
        output: OnceCell<AudioOutput>,
        output_addr: Option<String>,
    ) -> Self {
        SpeechPlayer {
            inner: Arc::new(Inner {
                bus: bus.clone(),
                client,
                output,
                output_addr,
                enabled: AtomicBool::new(false),
                speaking: AtomicBool::new(false),
                generation: Mutex::new(0),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.inner.speaking.load(Ordering::SeqCst)
    }

    /// The audio output, if it has been started yet.
    pub fn output(&self) -> Option<&AudioOutput> {
        self.inner.output.get()
    }

    async fn get_or_start_output(&self) -> Result<&AudioOutput> {
        self.inner
            .output
            .get_or_try_init(|| AudioOutput::start(self.inner.output_addr.as_deref()))
            .await
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.inner
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.lock_generation() == generation
    }

    fn set_speaking(&self, speaking: bool) {
        let was_speaking = self.inner.speaking.swap(speaking, Ordering::SeqCst);
        if was_speaking != speaking {
            self.inner.bus.view(ViewAction::Speaking { speaking });
        }
    }

    /// Switches narration on or off. Enabling starts the audio output if it
    /// isn't running yet, disabling stops any narration.
    pub async fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);

        if enabled {
            if let Err(e) = self.get_or_start_output().await {
                warn!("Failed to start audio output: {e:#}");
            }
        } else {
            self.stop();
        }
    }

    /// Halts the current narration, if any, and invalidates narrations that
    /// are still waiting for audio.
    pub fn stop(&self) {
        let mut generation = self.lock_generation();
        *generation += 1;

        if let Some(id) = self.output().and_then(AudioOutput::stop) {
            debug!("Stopped narration {id}");
        }

        self.set_speaking(false);
    }

    /// Starts narrating `text` and waits until its audio has started playing
    /// (or turned out not to exist). Does nothing while narration is disabled.
    pub async fn speak(&self, text: impl Into<String>) {
        if let Some(handle) = self.start_speaking(text) {
            if let Err(e) = handle.await {
                error!("Narration task failed: {e}");
            }
        }
    }

    /// Supersedes the current narration right away and fetches the new one in
    /// the background. Calls made in order take effect in order.
    pub fn start_speaking(&self, text: impl Into<String>) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }

        let generation = {
            let mut generation = self.lock_generation();
            *generation += 1;

            if let Some(id) = self.output().and_then(AudioOutput::stop) {
                debug!("Narration {id} superseded by {}", *generation);
            }

            self.set_speaking(true);
            *generation
        };

        let player = self.clone();
        let text = text.into();
        Some(tokio::spawn(async move {
            player.narrate(generation, text).await;
        }))
    }

    async fn narrate(&self, generation: u64, text: String) {
        let result = self.synthesize(&text).await;

        if !self.is_current(generation) {
            debug!("Discarding stale narration {generation}");
            return;
        }

        let samples = match result {
            Ok(Some(samples)) => samples,
            Ok(None) => {
                debug!("No narration audio produced for generation {generation}");
                self.finish(generation);
                return;
            }
            Err(e) => {
                warn!("Speech generation error: {e:#}");
                self.finish(generation);
                return;
            }
        };

        let output = match self.get_or_start_output().await {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to start audio output: {e:#}");
                self.finish(generation);
                return;
            }
        };

        let handle = {
            let current = self.lock_generation();
            if *current != generation {
                debug!("Discarding stale narration {generation}");
                return;
            }

            output.play(samples, generation)
        };

        debug!("Playing narration {generation}");

        let player = self.clone();
        tokio::spawn(async move {
            if handle.ended().await {
                player.finish(generation);
            }
        });
    }

    /// Fetches and decodes narration audio. `None` if the model produced none.
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<Sample>>> {
        let Some(data) = self.inner.client.synthesize(text).await? else {
            return Ok(None);
        };

        let audio = pcm::decode_base64_pcm16(&data, NARRATION_SAMPLE_RATE, NARRATION_CHANNELS)?;
        if audio.is_empty() {
            return Ok(None);
        }

        let samples = tokio::task::spawn_blocking(move || output::prepare(&audio)).await??;
        Ok(Some(samples))
    }

    /// Clears the speaking flag, unless a newer narration has taken over.
    fn finish(&self, generation: u64) {
        let current = self.lock_generation();
        if *current == generation {
            self.set_speaking(false);
        }
    }
}
