// All tunable parameters in one place.
// Grouped by subsystem for clarity.

// ── Network ──────────────────────────────────────────────────────────────

/// TCP port the control server listens on.
pub const CONTROL_PORT: u16 = 1235;
/// TCP port every client's voice-note listener binds.
pub const VOICE_NOTE_PORT: u16 = 9786;
/// First UDP port handed out by the call coordinator.
pub const MEDIA_PORT_BASE: u16 = 5001;
/// Max accepted control-line length (bytes). Longer lines drop the peer.
pub const MAX_LINE_LEN: usize = 8192;

// ── Audio ────────────────────────────────────────────────────────────────

/// Live-call sample rate (Hz).
pub const SAMPLE_RATE: u32 = 16_000;
/// Voice-note sample rate (Hz).
pub const NOTE_SAMPLE_RATE: u32 = 8_000;
/// Mono everywhere.
pub const AUDIO_CHANNELS: u16 = 1;
/// One call frame: 10 ms of 16-bit mono at 16 kHz.
pub const FRAME_BYTES: usize = 320;
/// Samples per call frame.
pub const FRAME_SAMPLES: usize = FRAME_BYTES / 2;
/// Silence written to the sink when a jitter buffer runs dry (bytes).
pub const SILENCE_BYTES: usize = FRAME_BYTES / 4;
/// Headroom factor applied before dividing by the source count when mixing.
pub const MIX_HEADROOM: f64 = 0.7;

// ── Jitter ───────────────────────────────────────────────────────────────

/// Jitter window for private calls (packets).
pub const JITTER_WINDOW_PRIVATE: usize = 10;
/// Jitter window per sender in group calls (packets).
pub const JITTER_WINDOW_GROUP: usize = 5;
/// UDP receive timeout driving the playback tick (milliseconds).
pub const RECV_TIMEOUT_MS: u64 = 10;

// ── Calls ────────────────────────────────────────────────────────────────

/// Bound on joining media threads during call teardown (milliseconds).
pub const TEARDOWN_JOIN_MS: u64 = 1000;
/// How long the sender thread waits for a capture frame before re-checking
/// its stop flag (milliseconds).
pub const CAPTURE_RECV_TIMEOUT_MS: u64 = 100;

// ── Voice notes ──────────────────────────────────────────────────────────

/// File payload is streamed in chunks of this size (bytes).
pub const NOTE_CHUNK: usize = 4096;
/// Envelopes claiming more than this are discarded (2 GiB).
pub const MAX_NOTE_BYTES: u64 = 2 * 1024 * 1024 * 1024;
/// Directory received notes persist in.
pub const RECEIVED_NOTES_DIR: &str = "received_voice_notes";

// ── Chat ─────────────────────────────────────────────────────────────────

/// Max messages kept per chat tab in the TUI.
pub const MAX_MESSAGE_HISTORY: usize = 500;
