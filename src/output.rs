//! Audio output for narration.
//!
//! Holds at most one active source in a [PlaybackBuffer] which a clock task
//! drains at real-time rate. Every chunk is published on a watch channel and
//! streamed as an endless 48kHz stereo WAV to whoever connects to the TCP
//! listener, e.g. `mpv tcp://127.0.0.1:7878`.

use crate::{
    buffer::PlaybackBuffer,
    constants::{OUTPUT_BIT_DEPTH, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE},
    pcm::AudioBuffer,
};
use anyhow::{Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use hound::{SampleFormat, WavSpec};
use rubato::{FftFixedIn, Resampler};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::{oneshot, watch},
};
use tokio_util::sync::{CancellationToken, DropGuard};

const TARGET_CHUNK_SIZE: usize = 480;
const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// A stereo sample pair (left, right) as 16-bit signed integers.
pub type Sample = (i16, i16);
pub type OutputStream = watch::Receiver<Vec<Sample>>;

struct ActiveSource {
    id: u64,
    ended: oneshot::Sender<()>,
}

#[derive(Default)]
struct OutputState {
    buffer: PlaybackBuffer,
    active: Option<ActiveSource>,
}

struct Shared {
    state: Mutex<OutputState>,
    tx: watch::Sender<Vec<Sample>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self, count: usize) -> Vec<Sample> {
        let mut state = self.lock();
        let samples = state.buffer.pull_samples(count);

        if state.buffer.is_drained() {
            if let Some(source) = state.active.take() {
                trace!("Audio source {} played to completion", source.id);
                state.buffer.clear();
                // Receiver gone means nobody waits for completion
                let _ = source.ended.send(());
            }
        }

        samples
    }
}

/// Handle to a source started with [AudioOutput::play].
pub struct SourceHandle {
    pub id: u64,
    ended: oneshot::Receiver<()>,
}

impl SourceHandle {
    /// Resolves once the source is gone. `true` if it played to the end,
    /// `false` if it was stopped or replaced.
    pub async fn ended(self) -> bool {
        self.ended.await.is_ok()
    }
}

/// The audio output context. Cheap to clone; the clock and listener tasks
/// stop once the last clone is dropped.
#[derive(Clone)]
pub struct AudioOutput {
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    _shutdown: Arc<DropGuard>,
}

impl AudioOutput {
    /// Starts the output clock and, if `addr` is given, the WAV stream listener.
    pub async fn start(addr: Option<&str>) -> Result<AudioOutput> {
        let (tx, _rx) = watch::channel(Vec::new());
        let shared = Arc::new(Shared {
            state: Mutex::new(OutputState::default()),
            tx,
        });
        let shutdown = CancellationToken::new();

        let local_addr = match addr {
            Some(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind narration stream to {addr}"))?;
                let local_addr = listener.local_addr()?;
                info!("Streaming narration audio as WAV on tcp://{local_addr}");

                start_listen_loop(listener, shared.tx.subscribe(), shutdown.clone());
                Some(local_addr)
            }
            None => None,
        };

        start_clock_loop(shared.clone(), shutdown.clone());

        Ok(AudioOutput {
            shared,
            local_addr,
            _shutdown: Arc::new(shutdown.drop_guard()),
        })
    }

    /// Address of the WAV stream listener, if one is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Receives every chunk the clock emits.
    pub fn subscribe(&self) -> OutputStream {
        self.shared.tx.subscribe()
    }

    /// Replaces whatever is playing with `samples`, tagged with `id`.
    pub fn play(&self, samples: Vec<Sample>, id: u64) -> SourceHandle {
        let (tx, rx) = oneshot::channel();
        let mut state = self.shared.lock();

        if let Some(previous) = state.active.take() {
            debug!("Audio source {} replaced by {id}", previous.id);
        }

        state.buffer.clear();
        state.buffer.push_samples(samples);
        state.buffer.set_eof(true);
        state.active = Some(ActiveSource { id, ended: tx });

        SourceHandle { id, ended: rx }
    }

    /// Halts the active source immediately. Returns its id, if there was one.
    pub fn stop(&self) -> Option<u64> {
        let mut state = self.shared.lock();
        state.buffer.clear();
        state.active.take().map(|source| source.id)
    }

    pub fn active_source(&self) -> Option<u64> {
        self.shared.lock().active.as_ref().map(|source| source.id)
    }

    pub fn is_playing(&self) -> bool {
        self.active_source().is_some()
    }

    /// Samples left for the active source
    pub fn pending_samples(&self) -> usize {
        self.shared.lock().buffer.buffer_level()
    }

    /// Pulls `count` samples as the clock would. Exposed so the output can be
    /// driven without waiting on wall-clock time.
    pub fn tick(&self, count: usize) -> Vec<Sample> {
        self.shared.tick(count)
    }
}

/// Converts decoded narration into output samples: channels are mixed down
/// to mono, resampled to [OUTPUT_SAMPLE_RATE] and duplicated to stereo.
pub fn prepare(audio: &AudioBuffer) -> Result<Vec<Sample>> {
    if audio.is_empty() || audio.sample_rate == 0 {
        return Ok(vec![]);
    }

    let channel_count = audio.channel_count() as f64;
    let mono: Vec<f64> = (0..audio.frame_count())
        .map(|i| {
            audio
                .channels
                .iter()
                .map(|channel| channel.get(i).copied().unwrap_or_default() as f64)
                .sum::<f64>()
                / channel_count
        })
        .collect();

    let resampled = if audio.sample_rate == OUTPUT_SAMPLE_RATE {
        mono
    } else {
        resample(&mono, audio.sample_rate)?
    };

    Ok(resampled
        .into_iter()
        .map(|sample| {
            let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            (s, s)
        })
        .collect())
}

/// Resample normalized mono audio from `sample_rate` to [OUTPUT_SAMPLE_RATE].
fn resample(input: &[f64], sample_rate: u32) -> Result<Vec<f64>> {
    let mut resampler = FftFixedIn::<f64>::new(
        sample_rate as usize,
        OUTPUT_SAMPLE_RATE as usize,
        RESAMPLER_CHUNK_SIZE,
        2, // sub-chunks
        1, // mono
    )
    .context("Failed to create narration resampler")?;

    let chunk_size = resampler.input_frames_max();
    let delay = resampler.output_delay();
    let expected_len = input.len() * OUTPUT_SAMPLE_RATE as usize / sample_rate as usize;
    let mut output = Vec::with_capacity(expected_len + delay + resampler.output_frames_max());

    // One trailing chunk of silence flushes the resampler's delay line
    let flush = vec![0.0; chunk_size];
    for chunk in input.chunks(chunk_size).chain(std::iter::once(&flush[..])) {
        // Pad last chunk if needed
        let mut chunk = vec![chunk.to_vec()];
        chunk[0].resize(chunk_size, 0.0);

        let resampled = resampler
            .process(&chunk, None)
            .context("Failed to resample narration")?;

        if let Some(channel) = resampled.into_iter().next() {
            output.extend(channel);
        }

        if output.len() >= expected_len + delay {
            break;
        }
    }

    Ok(output.into_iter().skip(delay).take(expected_len).collect())
}

fn start_clock_loop(shared: Arc<Shared>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let start_time = Instant::now();
        let mut sample_send_count: u64 = 0;

        let sleep_time = Duration::from_micros(
            ((TARGET_CHUNK_SIZE as f64 / OUTPUT_SAMPLE_RATE as f64) * 1_000_000.0) as u64,
        );

        loop {
            let expected_sent_samples = ((start_time.elapsed() + sleep_time).as_secs_f64()
                * OUTPUT_SAMPLE_RATE as f64) as u64;

            let chunk_size = expected_sent_samples.saturating_sub(sample_send_count) as usize;
            let chunk = shared.tick(chunk_size);

            shared.tx.send_replace(chunk);
            sample_send_count += chunk_size as u64;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep_time) => {}
            }
        }

        debug!("Audio output clock stopped");
    });
}

fn start_listen_loop(listener: TcpListener, stream: OutputStream, shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, addr)) => {
                    info!("Narration listener connected from {addr}");
                    tokio::spawn(stream_wav(socket, stream.clone(), shutdown.clone()));
                }
                Err(e) => error!("Failed to accept narration listener: {e}"),
            }
        }
    });
}

async fn stream_wav(mut socket: TcpStream, mut stream: OutputStream, shutdown: CancellationToken) {
    let spec = WavSpec {
        channels: OUTPUT_CHANNELS,
        sample_rate: OUTPUT_SAMPLE_RATE,
        bits_per_sample: OUTPUT_BIT_DEPTH,
        sample_format: SampleFormat::Int,
    };

    // A header for an infinite file lets players start right away
    let header = spec.into_header_for_infinite_file();
    if let Err(e) = socket.write_all(&header[..]).await {
        warn!("Failed to write wav header: {e}");
        return;
    }

    loop {
        let changed = tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = stream.changed() => changed,
        };
        if changed.is_err() {
            break;
        }

        let samples = stream.borrow_and_update().clone();
        let mut wav_data: Vec<u8> = Vec::with_capacity(samples.len() * 4);

        for (left, right) in samples {
            // Writes into a Vec cannot fail
            let _ = WriteBytesExt::write_i16::<LittleEndian>(&mut wav_data, left);
            let _ = WriteBytesExt::write_i16::<LittleEndian>(&mut wav_data, right);
        }

        if let Err(e) = socket.write_all(&wav_data).await {
            info!("Narration listener disconnected: {e}");
            break;
        }
    }
}
