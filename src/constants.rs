use std::time::Duration;

// Narration audio as returned by the speech endpoint
pub const NARRATION_SAMPLE_RATE: u32 = 24000; // 24 kHz
pub const NARRATION_CHANNELS: u16 = 1; // Mono

// Audio output stream parameters
pub const OUTPUT_SAMPLE_RATE: u32 = 48000; // 48 kHz
pub const OUTPUT_BIT_DEPTH: u16 = 16; // 16 bits per sample
pub const OUTPUT_CHANNELS: u16 = 2; // Stereo

/// Only this many characters of the source are sent for analysis.
pub const MAX_SOURCE_CHARS: usize = 15_000;

pub const DEFAULT_LINE_RANGE: (usize, usize) = (1, 100);
pub const DEFAULT_SPEED_MS: u64 = 1500;
pub const DEFAULT_OUTPUT_ADDR: &str = "127.0.0.1:7878";
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_SPEECH_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_VOICE_NAME: &str = "Kore";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Number of source lines shown around the highlighted line.
pub const CODE_WINDOW_HEIGHT: usize = 15;
