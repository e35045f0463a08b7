//! Voice-note transfer: framed TCP file push and the always-on listener.
//!
//! Delivery is best-effort at the application layer: the sender gets a
//! success boolean and nobody acknowledges anything. The listener runs for
//! the life of the client and isolates each connection in its own task, so
//! one malformed envelope never takes the listener down.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use parley_shared::config;
use parley_shared::NoteEnvelope;

/// Push a voice-note file to `ip:port`. Returns whether the whole file
/// went out; failures are logged and reported to the caller only.
pub async fn send_note(ip: &str, port: u16, path: &Path, sender: Option<&str>) -> bool {
    match try_send(ip, port, path, sender).await {
        Ok(bytes) => {
            tracing::info!(%ip, bytes, "voice note sent");
            true
        }
        Err(e) => {
            tracing::warn!(%ip, "voice note send failed: {:#}", e);
            false
        }
    }
}

async fn try_send(ip: &str, port: u16, path: &Path, sender: Option<&str>) -> Result<u64> {
    let file_len = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();

    let mut stream = TcpStream::connect((ip, port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", ip, port))?;

    let envelope = NoteEnvelope {
        sender: sender.map(str::to_string),
        file_len,
    };
    stream.write_all(&envelope.encode()).await?;

    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; config::NOTE_CHUNK];
    let mut written = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    stream.flush().await?;
    Ok(written)
}

/// Accept voice-note connections forever, persisting received files into
/// `dest_dir`.
pub async fn run_listener(listener: TcpListener, dest_dir: PathBuf) -> Result<()> {
    tokio::fs::create_dir_all(&dest_dir).await?;
    tracing::info!(
        "voice-note listener on {}",
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("voice-note accept error: {}", e);
                continue;
            }
        };
        let dest_dir = dest_dir.clone();
        tokio::spawn(async move {
            match receive_note(stream, &dest_dir).await {
                Ok(path) => {
                    tracing::info!(%peer_addr, "received voice note: {}", path.display());
                }
                Err(e) => {
                    // Discard the connection; the listener keeps running.
                    tracing::warn!(%peer_addr, "voice note discarded: {:#}", e);
                }
            }
        });
    }
}

async fn receive_note(mut stream: TcpStream, dest_dir: &Path) -> Result<PathBuf> {
    // Accumulate the variable-length header, then validate it through the
    // shared codec, which enforces the size limit and UTF-8 name.
    let mut header = vec![stream.read_u8().await.context("empty envelope")?];
    if header[0] != 0 {
        let mut len_bytes = [0u8; 2];
        stream.read_exact(&mut len_bytes).await.context("short envelope")?;
        header.extend_from_slice(&len_bytes);
        let name_len = u16::from_be_bytes(len_bytes) as usize;
        let mut name = vec![0u8; name_len];
        stream.read_exact(&mut name).await.context("short envelope")?;
        header.extend_from_slice(&name);
    }
    let mut len_bytes = [0u8; 8];
    stream.read_exact(&mut len_bytes).await.context("short envelope")?;
    header.extend_from_slice(&len_bytes);

    let (envelope, _) = NoteEnvelope::decode(&header)?;
    let sender = envelope
        .sender
        .as_deref()
        .map(sanitize_file_tag)
        .unwrap_or_else(|| "unknown".to_string());

    let final_path = dest_dir.join(format!("note_{}_{}.wav", sender, timestamp_millis()));
    let part_path = final_path.with_extension("part");

    let mut file = tokio::fs::File::create(&part_path).await?;
    let copied = tokio::io::copy(&mut (&mut stream).take(envelope.file_len), &mut file).await?;
    file.flush().await?;
    drop(file);

    if copied != envelope.file_len {
        let _ = tokio::fs::remove_file(&part_path).await;
        anyhow::bail!(
            "payload truncated: got {} of {} bytes",
            copied,
            envelope.file_len
        );
    }

    tokio::fs::rename(&part_path, &final_path).await?;
    Ok(final_path)
}

/// Millisecond timestamp used to keep persisted note names unique.
pub fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// The sender tag comes off the wire; keep only characters safe in a
/// file name.
fn sanitize_file_tag(tag: &str) -> String {
    let cleaned: String = tag
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scratch_dir(tag: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "parley-transfer-test-{}-{}-{}",
            tag,
            std::process::id(),
            n
        ))
    }

    async fn wait_for_note(dir: &Path) -> Option<PathBuf> {
        for _ in 0..40 {
            if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let path = entry.path();
                    if path.extension().is_some_and(|e| e == "wav") {
                        return Some(path);
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        None
    }

    #[tokio::test]
    async fn note_round_trip_is_byte_identical() {
        let dir = scratch_dir("roundtrip");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(run_listener(listener, dir.clone()));

        let payload: Vec<u8> = (0..10_000u32).flat_map(|i| (i as u16).to_le_bytes()).collect();
        let src = dir.join("outgoing.bin");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(&src, &payload).await.unwrap();

        assert!(send_note("127.0.0.1", port, &src, Some("alice")).await);

        let received = wait_for_note(&dir).await.expect("note never arrived");
        let got = tokio::fs::read(&received).await.unwrap();
        assert_eq!(got, payload);
        let name = received.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("note_alice_"), "unexpected name {}", name);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn malformed_envelope_does_not_kill_the_listener() {
        let dir = scratch_dir("malformed");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(run_listener(listener, dir.clone()));

        // Claims a sender name far longer than the bytes that follow.
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(&[1, 0xFF, 0xFF, b'x']).await.unwrap();
        drop(stream);

        // An oversized declared length is discarded too.
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let bad = NoteEnvelope {
            sender: None,
            file_len: config::MAX_NOTE_BYTES + 1,
        };
        stream.write_all(&bad.encode()).await.unwrap();
        drop(stream);

        // The listener still accepts a well-formed note afterwards.
        let src = dir.join("after.bin");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(&src, b"still alive").await.unwrap();
        assert!(send_note("127.0.0.1", port, &src, None).await);

        let received = wait_for_note(&dir).await.expect("note never arrived");
        assert_eq!(tokio::fs::read(&received).await.unwrap(), b"still alive");
        let name = received.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("note_unknown_"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn file_tags_are_sanitized() {
        assert_eq!(sanitize_file_tag("alice"), "alice");
        assert_eq!(sanitize_file_tag("../../etc"), "______etc");
        assert_eq!(sanitize_file_tag(""), "unknown");
    }
}
