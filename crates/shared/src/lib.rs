//! Shared substrate for the parley VoIP chat system: the frozen control-plane
//! line protocol, the PCM media frame definition, the voice-note envelope,
//! and the tunable constants both binaries agree on.

pub mod config;
pub mod envelope;
pub mod media;
pub mod protocol;

pub use envelope::{EnvelopeError, NoteEnvelope};
pub use media::{mix_frames, silence, MediaPacket};
pub use protocol::{
    split_csv, ClientDirective, IpScope, ProtocolError, ServerDirective, NAME_ACCEPTED,
    NAME_EMPTY, NAME_TAKEN,
};
