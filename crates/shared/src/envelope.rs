//! Voice-note wire envelope.
//!
//! A voice note travels as one TCP push: a fixed-layout header followed by
//! the raw file bytes.
//!
//! ```text
//! [has_sender:1]  [name_len:2 BE][name:UTF-8]?  [file_len:8 BE]  [payload]
//! ```
//!
//! The name block is present only when `has_sender` is 1.

use crate::config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope header truncated")]
    Truncated,
    #[error("sender name is not valid UTF-8")]
    BadName,
    #[error("declared file length {0} exceeds the 2 GiB limit")]
    TooLarge(u64),
}

/// Parsed voice-note header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteEnvelope {
    pub sender: Option<String>,
    pub file_len: u64,
}

impl NoteEnvelope {
    /// Serialize the header that precedes the file payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        match &self.sender {
            Some(name) => {
                buf.push(1);
                let bytes = name.as_bytes();
                buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                buf.extend_from_slice(bytes);
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&self.file_len.to_be_bytes());
        buf
    }

    /// Parse a header from the front of `buf`, returning the envelope and
    /// the number of header bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), EnvelopeError> {
        let (&has_sender, rest) = buf.split_first().ok_or(EnvelopeError::Truncated)?;
        let (sender, offset) = if has_sender != 0 {
            if rest.len() < 2 {
                return Err(EnvelopeError::Truncated);
            }
            let name_len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            if rest.len() < 2 + name_len {
                return Err(EnvelopeError::Truncated);
            }
            let name = std::str::from_utf8(&rest[2..2 + name_len])
                .map_err(|_| EnvelopeError::BadName)?;
            (Some(name.to_string()), 1 + 2 + name_len)
        } else {
            (None, 1)
        };
        if buf.len() < offset + 8 {
            return Err(EnvelopeError::Truncated);
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&buf[offset..offset + 8]);
        let file_len = u64::from_be_bytes(len_bytes);
        if file_len > config::MAX_NOTE_BYTES {
            return Err(EnvelopeError::TooLarge(file_len));
        }
        Ok((NoteEnvelope { sender, file_len }, offset + 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_sender() {
        let env = NoteEnvelope {
            sender: Some("alice".into()),
            file_len: 12_345,
        };
        let wire = env.encode();
        assert_eq!(wire[0], 1);
        let (decoded, consumed) = NoteEnvelope::decode(&wire).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn round_trip_anonymous() {
        let env = NoteEnvelope {
            sender: None,
            file_len: 44,
        };
        let wire = env.encode();
        assert_eq!(wire.len(), 9);
        let (decoded, consumed) = NoteEnvelope::decode(&wire).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(consumed, 9);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let env = NoteEnvelope {
            sender: Some("alice".into()),
            file_len: 100,
        };
        let wire = env.encode();
        for cut in 0..wire.len() {
            assert!(matches!(
                NoteEnvelope::decode(&wire[..cut]),
                Err(EnvelopeError::Truncated)
            ));
        }
    }

    #[test]
    fn oversized_length_is_rejected() {
        let env = NoteEnvelope {
            sender: None,
            file_len: config::MAX_NOTE_BYTES + 1,
        };
        assert!(matches!(
            NoteEnvelope::decode(&env.encode()),
            Err(EnvelopeError::TooLarge(_))
        ));
    }
}
