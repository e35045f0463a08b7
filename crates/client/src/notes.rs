//! Voice-note recording, storage, and playback.
//!
//! Outgoing recordings are captured at 8 kHz mono into a per-user scratch
//! directory that disappears when the client exits; received notes persist
//! under `received_voice_notes/`. Notes are standard RIFF/WAVE files with
//! 16-bit PCM inside.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use parley_shared::config;

use crate::audio;
use crate::transfer;

/// Recorder plus the lifecycle of the outgoing-notes scratch directory.
pub struct VoiceNotes {
    username: String,
    scratch_dir: PathBuf,
    active: Option<ActiveRecording>,
}

struct ActiveRecording {
    _stream: cpal::Stream,
    frames: std_mpsc::Receiver<Vec<u8>>,
}

impl VoiceNotes {
    pub fn new(username: &str) -> Result<Self> {
        let tag: String = username
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let scratch_dir = std::env::temp_dir().join(format!("parley_{}_voice_notes", tag));
        std::fs::create_dir_all(&scratch_dir)
            .with_context(|| format!("failed to create {}", scratch_dir.display()))?;
        Ok(Self {
            username: username.to_string(),
            scratch_dir,
            active: None,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Start capturing a note. An in-progress recording is finalized and
    /// discarded first, so the new one starts clean.
    pub fn start_recording(&mut self, input_device: Option<&str>) -> Result<()> {
        if self.active.is_some() {
            let _ = self.stop_recording();
        }
        let (stream, frames) =
            audio::start_capture(input_device, config::NOTE_SAMPLE_RATE, config::FRAME_BYTES)?;
        self.active = Some(ActiveRecording {
            _stream: stream,
            frames,
        });
        Ok(())
    }

    /// Stop the microphone and write the captured audio as a WAV file in
    /// the scratch directory. Returns `None` when nothing was recorded.
    pub fn stop_recording(&mut self) -> Result<Option<PathBuf>> {
        let Some(recording) = self.active.take() else {
            return Ok(None);
        };
        let ActiveRecording { _stream, frames } = recording;
        // Dropping the stream stops capture; everything already produced
        // is sitting in the channel.
        drop(_stream);

        let mut data = Vec::new();
        while let Ok(frame) = frames.try_recv() {
            data.extend_from_slice(&frame);
        }
        if data.is_empty() {
            return Ok(None);
        }

        let path = self.scratch_dir.join(format!(
            "voice_note_{}_{}.wav",
            self.username,
            transfer::timestamp_millis()
        ));
        write_wav(&path, config::NOTE_SAMPLE_RATE, &data)?;
        tracing::info!(bytes = data.len(), "voice note recorded: {}", path.display());
        Ok(Some(path))
    }
}

impl Drop for VoiceNotes {
    fn drop(&mut self) {
        // The scratch directory holds outgoing recordings only; received
        // notes live elsewhere and survive.
        let _ = std::fs::remove_dir_all(&self.scratch_dir);
    }
}

/// WAV files under the received-notes directory, sorted by name (the
/// embedded timestamps make that chronological).
pub fn received_notes() -> Vec<PathBuf> {
    let mut notes: Vec<PathBuf> = std::fs::read_dir(config::RECEIVED_NOTES_DIR)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|e| e == "wav"))
        .collect();
    notes.sort();
    notes
}

/// A note being played back. Hold it; drop it to cut playback short.
pub struct NotePlayback {
    _stream: cpal::Stream,
    pub path: PathBuf,
    finished_at: Instant,
}

impl NotePlayback {
    pub fn is_finished(&self) -> bool {
        Instant::now() >= self.finished_at
    }
}

/// Play one WAV file through the configured output device. The whole file
/// is queued up front; the returned handle reports when it has drained.
pub fn play_note(path: &Path, output_device: Option<&str>) -> Result<NotePlayback> {
    let (sample_rate, data) = read_wav(path)?;
    let (stream, tx) = audio::start_playback(output_device, sample_rate, None)?;
    for chunk in data.chunks(config::NOTE_CHUNK) {
        tx.send(chunk.to_vec())
            .map_err(|_| anyhow::anyhow!("playback stream closed"))?;
    }
    let samples = data.len() / 2;
    let duration = Duration::from_secs_f64(samples as f64 / sample_rate as f64)
        + Duration::from_millis(250);
    Ok(NotePlayback {
        _stream: stream,
        path: path.to_path_buf(),
        finished_at: Instant::now() + duration,
    })
}

// ── WAV container ────────────────────────────────────────────────────────

const WAV_HEADER_LEN: u32 = 44;

fn write_wav(path: &Path, sample_rate: u32, data: &[u8]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_wav_header(&mut writer, sample_rate, data.len() as u32)?;
    writer.write_all(data)?;
    writer.flush()?;
    Ok(())
}

/// Canonical 44-byte PCM-16 mono header.
fn write_wav_header<W: Write>(writer: &mut W, sample_rate: u32, data_len: u32) -> std::io::Result<()> {
    let channels: u16 = config::AUDIO_CHANNELS;
    let byte_rate = sample_rate * channels as u32 * 2;
    let block_align = channels * 2;

    writer.write_all(b"RIFF")?;
    writer.write_all(&(data_len + WAV_HEADER_LEN - 8).to_le_bytes())?;
    writer.write_all(b"WAVEfmt ")?;
    writer.write_all(&16u32.to_le_bytes())?;
    writer.write_all(&1u16.to_le_bytes())?;
    writer.write_all(&channels.to_le_bytes())?;
    writer.write_all(&sample_rate.to_le_bytes())?;
    writer.write_all(&byte_rate.to_le_bytes())?;
    writer.write_all(&block_align.to_le_bytes())?;
    writer.write_all(&16u16.to_le_bytes())?;
    writer.write_all(b"data")?;
    writer.write_all(&data_len.to_le_bytes())?;
    Ok(())
}

/// Read a PCM-16 WAV file, returning its sample rate and raw sample bytes.
/// Walks the chunk list rather than assuming the canonical 44-byte layout.
fn read_wav(path: &Path) -> Result<(u32, Vec<u8>)> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        bail!("{} is not a RIFF/WAVE file", path.display());
    }

    let mut sample_rate = None;
    let mut data = None;
    let mut offset = 12usize;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body_start = offset + 8;
        let body_end = (body_start + size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    bail!("{}: fmt chunk too short", path.display());
                }
                let format = u16::from_le_bytes([body[0], body[1]]);
                let channels = u16::from_le_bytes([body[2], body[3]]);
                let bits = u16::from_le_bytes([body[14], body[15]]);
                if format != 1 || bits != 16 || channels != 1 {
                    bail!(
                        "{}: unsupported WAV format (format={}, channels={}, bits={})",
                        path.display(),
                        format,
                        channels,
                        bits
                    );
                }
                sample_rate = Some(u32::from_le_bytes([body[4], body[5], body[6], body[7]]));
            }
            b"data" => {
                data = Some(body.to_vec());
            }
            _ => {}
        }
        // Chunks are word-aligned; odd sizes carry a pad byte.
        offset = body_start + size + (size & 1);
    }

    match (sample_rate, data) {
        (Some(rate), Some(data)) => Ok((rate, data)),
        _ => bail!("{}: missing fmt or data chunk", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scratch_wav(tag: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "parley-notes-test-{}-{}-{}.wav",
            tag,
            std::process::id(),
            n
        ))
    }

    #[test]
    fn wav_round_trip() {
        let path = scratch_wav("roundtrip");
        let data: Vec<u8> = (0..1600u32).flat_map(|i| ((i % 251) as i16).to_le_bytes()).collect();
        write_wav(&path, config::NOTE_SAMPLE_RATE, &data).unwrap();

        let (rate, read_back) = read_wav(&path).unwrap();
        assert_eq!(rate, config::NOTE_SAMPLE_RATE);
        assert_eq!(read_back, data);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn wav_header_layout() {
        let mut header = Vec::new();
        write_wav_header(&mut header, 8000, 16000).unwrap();
        assert_eq!(header.len(), WAV_HEADER_LEN as usize);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        // PCM format tag and mono channel count.
        assert_eq!(u16::from_le_bytes([header[20], header[21]]), 1);
        assert_eq!(u16::from_le_bytes([header[22], header[23]]), 1);
        // byte rate = 8000 Hz * 1 ch * 2 bytes.
        assert_eq!(u32::from_le_bytes([header[28], header[29], header[30], header[31]]), 16000);
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn read_rejects_non_wav() {
        let path = scratch_wav("garbage");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(read_wav(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
