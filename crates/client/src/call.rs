//! Live-call media pipelines and the client-side call state machine.
//!
//! A call session owns two std threads next to the cpal streams: the
//! sender (capture → sequence → UDP fan-out) and the receiver (UDP →
//! jitter buffer → mix → playback). Control stays on the async side;
//! media never touches the server.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use parley_shared::config;
use parley_shared::{media, MediaPacket};

use crate::audio;
use crate::jitter::JitterBuffer;

/// What kind of conversation this session is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Private { peer: String },
    Group { name: String },
    Global,
}

impl CallKind {
    /// The target named in the `CALL ENDED` directive for this session.
    pub fn hangup_target(&self) -> &str {
        match self {
            CallKind::Private { peer } => peer,
            CallKind::Group { name } => name,
            CallKind::Global => "global",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CallKind::Private { peer } => format!("call with {}", peer),
            CallKind::Group { name } => format!("group call #{}", name),
            CallKind::Global => "global call".to_string(),
        }
    }
}

/// Client-side call state. At most one session exists per client; a new
/// `CALL ACCEPTED` while in a call implicitly tears the old session down.
pub enum CallState {
    Idle,
    /// `Call <target>` sent, no `CALL ACCEPTED` seen yet.
    Pending { target: String },
    InCall(CallSession),
}

impl CallState {
    pub fn is_in_call(&self) -> bool {
        matches!(self, CallState::InCall(_))
    }

    /// Swap the current state out for `Idle`, handing ownership of any
    /// live session to the caller for teardown.
    pub fn take(&mut self) -> CallState {
        std::mem::replace(self, CallState::Idle)
    }
}

/// A running call: the two media threads plus the audio streams keeping
/// the devices open.
pub struct CallSession {
    pub kind: CallKind,
    pub local_port: u16,
    sender: PipelineHandle,
    receiver: PipelineHandle,
    _capture_stream: cpal::Stream,
    _playback_stream: cpal::Stream,
}

impl CallSession {
    /// Stop both pipelines and wait for them, bounded. Both threads are
    /// signalled before either is joined; the audio streams drop last so
    /// the playback sink can drain.
    pub fn teardown(self) {
        self.sender.signal();
        self.receiver.signal();
        let timeout = Duration::from_millis(config::TEARDOWN_JOIN_MS);
        self.sender.join_within(timeout);
        self.receiver.join_within(timeout);
    }
}

/// Audio device selection for a session.
#[derive(Default, Clone, Copy)]
pub struct AudioDevices<'a> {
    pub input: Option<&'a str>,
    pub output: Option<&'a str>,
}

/// Start a private call: one destination, one jitter buffer.
pub fn start_private(
    peer: String,
    remote_ip: &str,
    remote_port: u16,
    local_port: u16,
    devices: AudioDevices<'_>,
) -> Result<CallSession> {
    start_session(
        CallKind::Private { peer },
        vec![(remote_ip.to_string(), remote_port)],
        local_port,
        true,
        devices,
    )
}

/// Start a group or global call against the disclosed endpoint table.
pub fn start_conference(
    kind: CallKind,
    destinations: Vec<(String, u16)>,
    local_port: u16,
    devices: AudioDevices<'_>,
) -> Result<CallSession> {
    start_session(kind, destinations, local_port, false, devices)
}

fn start_session(
    kind: CallKind,
    destinations: Vec<(String, u16)>,
    local_port: u16,
    is_private: bool,
    devices: AudioDevices<'_>,
) -> Result<CallSession> {
    // Audio hardware first: a missing device is fatal to the call and
    // nothing else should have been started yet.
    let (capture_stream, capture_rx) =
        audio::start_capture(devices.input, config::SAMPLE_RATE, config::FRAME_BYTES)?;
    let playback_cap = config::SAMPLE_RATE as usize / 2;
    let (playback_stream, playback_tx) =
        audio::start_playback(devices.output, config::SAMPLE_RATE, Some(playback_cap))?;

    let recv_socket = UdpSocket::bind(("0.0.0.0", local_port))
        .with_context(|| format!("failed to bind media port {}", local_port))?;
    recv_socket.set_read_timeout(Some(Duration::from_millis(config::RECV_TIMEOUT_MS)))?;
    let send_socket = UdpSocket::bind(("0.0.0.0", 0)).context("failed to bind send socket")?;

    tracing::info!(
        local_port,
        destinations = destinations.len(),
        private = is_private,
        "media pipelines starting"
    );

    let sender = spawn_sender(send_socket, destinations, capture_rx);
    let receiver = spawn_receiver(recv_socket, local_port, is_private, playback_tx);

    Ok(CallSession {
        kind,
        local_port,
        sender,
        receiver,
        _capture_stream: capture_stream,
        _playback_stream: playback_stream,
    })
}

// ── Pipeline plumbing ────────────────────────────────────────────────────

struct PipelineHandle {
    stop: Arc<AtomicBool>,
    done_rx: std_mpsc::Receiver<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PipelineHandle {
    fn spawn<F: FnOnce() + Send + 'static>(stop: Arc<AtomicBool>, body: F) -> Self {
        let (done_tx, done_rx) = std_mpsc::channel();
        let thread = thread::spawn(move || {
            // Dropped on every exit path, including panics, so the
            // teardown join sees the thread finish.
            let _done = done_tx;
            body();
        });
        Self {
            stop,
            done_rx,
            thread: Some(thread),
        }
    }

    fn signal(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn join_within(mut self, timeout: Duration) {
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.thread.take() {
                    let _ = handle.join();
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!("media thread still running after {:?}, detaching", timeout);
            }
        }
    }
}

fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    match (host, port).to_socket_addrs() {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            tracing::warn!("failed to resolve {}: {}", host, e);
            None
        }
    }
}

/// Capture → sequence-stamp → fan out one datagram per destination.
/// The sequence number advances exactly once per frame no matter how many
/// destinations there are.
fn spawn_sender(
    socket: UdpSocket,
    destinations: Vec<(String, u16)>,
    capture_rx: std_mpsc::Receiver<Vec<u8>>,
) -> PipelineHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    PipelineHandle::spawn(stop, move || {
        let mut socket = socket;
        let mut resolved: Vec<Option<SocketAddr>> = destinations
            .iter()
            .map(|(host, port)| resolve(host, *port))
            .collect();
        let mut sequence: u32 = 0;

        while !stop_flag.load(Ordering::Relaxed) {
            let frame = match capture_rx
                .recv_timeout(Duration::from_millis(config::CAPTURE_RECV_TIMEOUT_MS))
            {
                Ok(f) => f,
                Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            };
            // Anything but a full frame is a short read; skip it.
            if frame.len() != config::FRAME_BYTES {
                continue;
            }

            let packet = MediaPacket { sequence, frame }.encode();
            let mut sent = 0usize;
            let mut failed = 0usize;
            for (i, (host, port)) in destinations.iter().enumerate() {
                if resolved[i].is_none() {
                    resolved[i] = resolve(host, *port);
                }
                let Some(addr) = resolved[i] else { continue };
                match socket.send_to(&packet, addr) {
                    Ok(_) => sent += 1,
                    Err(e) => {
                        tracing::warn!("send to {} failed: {}", host, e);
                        failed += 1;
                        // The address may have gone stale; look it up again
                        // and carry on with the rest.
                        resolved[i] = resolve(host, *port);
                    }
                }
            }
            if failed > 0 && sent == 0 {
                // Every destination errored; treat the socket as wedged.
                match UdpSocket::bind(("0.0.0.0", 0)) {
                    Ok(fresh) => socket = fresh,
                    Err(e) => tracing::warn!("send socket rebind failed: {}", e),
                }
            }
            sequence = sequence.wrapping_add(1);
        }
    })
}

fn spawn_receiver(
    socket: UdpSocket,
    local_port: u16,
    is_private: bool,
    playback_tx: std_mpsc::Sender<Vec<u8>>,
) -> PipelineHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    PipelineHandle::spawn(stop, move || {
        if is_private {
            run_private_receiver(socket, local_port, playback_tx, stop_flag);
        } else {
            run_group_receiver(socket, local_port, playback_tx, stop_flag);
        }
    })
}

fn is_recv_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn rebind(local_port: u16) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(("0.0.0.0", local_port))?;
    socket.set_read_timeout(Some(Duration::from_millis(config::RECV_TIMEOUT_MS)))?;
    Ok(socket)
}

/// Single-peer receive loop: drain in order on every arrival; on a receive
/// timeout play the oldest buffered frame (lossy catch-up) or a sliver of
/// silence to keep the audio clock moving.
fn run_private_receiver(
    mut socket: UdpSocket,
    local_port: u16,
    playback: std_mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) {
    let mut buffer = JitterBuffer::private();
    let mut buf = [0u8; config::FRAME_BYTES + 8];

    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, _src)) => {
                let packet = MediaPacket::decode(&buf[..len]);
                buffer.insert(packet.sequence, packet.frame);
                loop {
                    match buffer.pop_expected() {
                        Some(frame) => {
                            if playback.send(frame).is_err() {
                                return;
                            }
                        }
                        None => break,
                    }
                }
            }
            Err(e) if is_recv_timeout(&e) => {
                let out = buffer
                    .pop_oldest()
                    .unwrap_or_else(|| media::silence(config::SILENCE_BYTES));
                if playback.send(out).is_err() {
                    return;
                }
            }
            Err(e) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                tracing::warn!("media receive error: {}", e);
                match rebind(local_port) {
                    Ok(fresh) => socket = fresh,
                    Err(e) => {
                        tracing::warn!("media port rebind failed: {}", e);
                        thread::sleep(Duration::from_millis(config::RECV_TIMEOUT_MS));
                    }
                }
            }
        }
    }
}

/// Multi-peer receive loop: one jitter buffer per datagram source, one
/// mixed frame per tick across all of them.
fn run_group_receiver(
    mut socket: UdpSocket,
    local_port: u16,
    playback: std_mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) {
    // Keyed by source address *and* port, so flows sharing a NAT address
    // still get separate buffers.
    let mut buffers: HashMap<String, JitterBuffer> = HashMap::new();
    let mut buf = [0u8; config::FRAME_BYTES + 8];

    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                let packet = MediaPacket::decode(&buf[..len]);
                buffers
                    .entry(src.to_string())
                    .or_insert_with(JitterBuffer::group)
                    .insert(packet.sequence, packet.frame);
                if !group_tick(&mut buffers, &playback) {
                    return;
                }
            }
            Err(e) if is_recv_timeout(&e) => {
                if !group_tick(&mut buffers, &playback) {
                    return;
                }
            }
            Err(e) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                tracing::warn!("media receive error: {}", e);
                match rebind(local_port) {
                    Ok(fresh) => socket = fresh,
                    Err(e) => {
                        tracing::warn!("media port rebind failed: {}", e);
                        thread::sleep(Duration::from_millis(config::RECV_TIMEOUT_MS));
                    }
                }
            }
        }
    }
}

/// Pull at most one frame per sender (expected first, oldest as fallback),
/// mix whatever arrived, and keep the sink fed with silence otherwise.
/// Returns false once the playback side is gone.
fn group_tick(
    buffers: &mut HashMap<String, JitterBuffer>,
    playback: &std_mpsc::Sender<Vec<u8>>,
) -> bool {
    let mut to_mix = Vec::new();
    for buffer in buffers.values_mut() {
        if let Some(frame) = buffer.pop_expected().or_else(|| buffer.pop_oldest()) {
            if !frame.is_empty() {
                to_mix.push(frame);
            }
        }
    }
    let out = if to_mix.is_empty() {
        media::silence(config::SILENCE_BYTES)
    } else {
        media::mix_frames(&to_mix)
    };
    playback.send(out).is_ok()
}
