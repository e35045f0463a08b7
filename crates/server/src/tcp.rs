use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use parley_shared::config;
use parley_shared::{
    ClientDirective, IpScope, ServerDirective, NAME_ACCEPTED, NAME_EMPTY, NAME_TAKEN,
};

use crate::state::{ServerState, PEER_QUEUE_CAPACITY};

/// Accept control connections forever.
pub async fn run_control_server(state: ServerState, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("accept error: {}, retrying", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                continue;
            }
        };
        tracing::info!(%peer_addr, "new control connection");

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_peer(stream, peer_addr, state).await {
                tracing::warn!(%peer_addr, "peer error: {}", e);
            }
        });
    }
}

async fn handle_peer(stream: TcpStream, peer_addr: SocketAddr, state: ServerState) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // Writer task: drains queued lines to this peer. Handshake replies go
    // through the same queue so every line reaches the socket in order.
    let (tx, rx) = mpsc::channel::<String>(PEER_QUEUE_CAPACITY);
    let writer_handle = tokio::spawn(writer_task(writer, rx));

    // Handshake: read display names until one is non-empty and unclaimed.
    // The claim is atomic, so two peers racing the same name cannot both
    // see "Username accepted."
    let name = loop {
        let Some(line) = lines.next_line().await? else {
            drop(tx);
            let _ = writer_handle.await;
            return Ok(());
        };
        guard_line_len(&line)?;
        let candidate = line.trim();
        if candidate.is_empty() {
            let _ = tx.send(NAME_EMPTY.to_string()).await;
        } else if state.try_claim(candidate, tx.clone()).await {
            let _ = tx.send(NAME_ACCEPTED.to_string()).await;
            break candidate.to_string();
        } else {
            let _ = tx.send(NAME_TAKEN.to_string()).await;
        }
    };

    // The peer follows up with the address it wants disclosed for media
    // and voice-note traffic.
    match lines.next_line().await {
        Ok(Some(ip_line)) => {
            state
                .complete_registration(&name, ip_line.trim().to_string())
                .await;
        }
        Ok(None) | Err(_) => {
            state.remove(&name).await;
            drop(tx);
            let _ = writer_handle.await;
            return Ok(());
        }
    }

    // Main dispatch loop.
    let result = async {
        while let Some(line) = lines.next_line().await? {
            guard_line_len(&line)?;
            let directive = match ClientDirective::parse(&line) {
                Ok(d) => d,
                Err(e) => {
                    // Malformed directives are dropped, not fatal.
                    tracing::warn!(%name, "ignoring line: {}", e);
                    continue;
                }
            };
            if !dispatch(&state, &name, directive).await {
                return Ok::<(), anyhow::Error>(());
            }
        }
        Ok(())
    }
    .await;

    if state.remove(&name).await {
        tracing::info!(%peer_addr, %name, "peer disconnected");
    }
    // Dropping the last queue sender lets the writer drain everything
    // still pending (the terminate line included) before it exits.
    drop(tx);
    let _ = writer_handle.await;
    result
}

async fn writer_task<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        let framed = format!("{}\n", line);
        if let Err(e) = writer.write_all(framed.as_bytes()).await {
            tracing::debug!("writer stopped: {}", e);
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
}

fn guard_line_len(line: &str) -> Result<()> {
    if line.len() > config::MAX_LINE_LEN {
        anyhow::bail!("control line too long ({} bytes)", line.len());
    }
    Ok(())
}

/// Route one directive. Returns false when the peer asked to leave.
async fn dispatch(state: &ServerState, name: &str, directive: ClientDirective) -> bool {
    match directive {
        ClientDirective::Exit => {
            state.send_to(name, "Exiting chat...").await;
            state.remove(name).await;
            return false;
        }

        ClientDirective::Chat(text) => {
            // A lone "@name" reaches here; there is no whisper to route.
            if text.starts_with('@') {
                state.send_to(name, "No message attached").await;
            } else {
                tracing::info!(%name, "global message");
                state
                    .broadcast_except(Some(name), &format!("{}: {}", name, text))
                    .await;
            }
        }

        ClientDirective::Whisper { to, msg } => {
            if !state.is_registered(&to).await {
                state.send_to(name, "Client not found").await;
            } else if msg.is_empty() {
                state.send_to(name, "No message attached").await;
            } else {
                tracing::info!(%name, "private message sent");
                let line = ServerDirective::Whisper {
                    from: name.to_string(),
                    msg,
                }
                .encode();
                state.send_to(&to, &line).await;
            }
        }

        ClientDirective::CreateGroup { name: group, members } => {
            tracing::info!(%name, %group, members = members.len(), "group created");
            state.create_group(&group, members.clone()).await;
            let line = ServerDirective::JoinGroup {
                name: group,
                members: members.clone(),
            }
            .encode();
            for member in &members {
                if member != name {
                    state.send_to(member, &line).await;
                }
            }
        }

        ClientDirective::GroupMessage { group, msg } => {
            // Messages to unknown groups vanish silently.
            let Some(members) = state.group_members(&group).await else {
                return true;
            };
            tracing::info!(%name, %group, "group message");
            let line = ServerDirective::GroupMessage {
                from: name.to_string(),
                group,
                msg,
            }
            .encode();
            for member in &members {
                if member != name {
                    state.send_to(member, &line).await;
                }
            }
        }

        ClientDirective::GetIps(scope) => {
            disclose_ips(state, name, scope).await;
        }

        ClientDirective::Call { target } => {
            tracing::info!(%name, %target, "call initiated");
            initiate_call(state, name, &target).await;
        }

        ClientDirective::CallEnded { target } => {
            tracing::info!(%name, %target, "call ended");
            hangup(state, name, &target).await;
        }
    }
    true
}

/// Answer `/getIps` with the addresses a voice-note fan-out should target.
/// Requests that resolve to nobody get no reply.
async fn disclose_ips(state: &ServerState, name: &str, scope: IpScope) {
    let ips: Vec<String> = match &scope {
        IpScope::Global => state
            .peers_with_ips()
            .await
            .into_iter()
            .filter(|(peer, _)| peer != name)
            .map(|(_, ip)| ip)
            .collect(),
        IpScope::Group(group) => {
            let Some(members) = state.group_members(group).await else {
                return;
            };
            let mut ips = Vec::new();
            for member in &members {
                if member != name {
                    if let Some(ip) = state.peer_ip(member).await {
                        ips.push(ip);
                    }
                }
            }
            ips
        }
        IpScope::Peer(peer) => match state.peer_ip(peer).await {
            Some(ip) => vec![ip],
            None => return,
        },
    };
    if ips.is_empty() {
        return;
    }
    let line = ServerDirective::VoiceNoteIps {
        ips,
        scope: scope.label().to_string(),
    }
    .encode();
    state.send_to(name, &line).await;
}

/// Port assignment and `CALL ACCEPTED` fan-out.
///
/// Global and group calls walk the registry in registration order handing
/// out ports from [`config::MEDIA_PORT_BASE`]; every participant receives
/// the same endpoint list and picks out its own entry by claimed address.
/// Private calls pin the target to the base port and the initiator to the
/// next one.
async fn initiate_call(state: &ServerState, caller: &str, target: &str) {
    if target.eq_ignore_ascii_case("global") {
        let endpoints = assign_ports(state.peers_with_ips().await);
        announce_conference(state, caller, endpoints).await;
        return;
    }

    if let Some(members) = state.group_members(target).await {
        let eligible: Vec<(String, String)> = state
            .peers_with_ips()
            .await
            .into_iter()
            .filter(|(peer, _)| peer == caller || members.contains(peer))
            .collect();
        let endpoints = assign_ports(eligible);
        announce_conference(state, caller, endpoints).await;
        return;
    }

    if target == caller {
        state.send_to(caller, "CALL FAILED: Cannot call yourself").await;
        return;
    }

    match (state.peer_ip(caller).await, state.peer_ip(target).await) {
        (Some(caller_ip), Some(target_ip)) => {
            let to_target = ServerDirective::CallAcceptedPrivate {
                peer_ip: caller_ip,
                port: config::MEDIA_PORT_BASE,
                peer_name: caller.to_string(),
            };
            let to_caller = ServerDirective::CallAcceptedPrivate {
                peer_ip: target_ip,
                port: config::MEDIA_PORT_BASE + 1,
                peer_name: target.to_string(),
            };
            state.send_to(target, &to_target.encode()).await;
            state.send_to(caller, &to_caller.encode()).await;
        }
        _ => {
            state.send_to(caller, "CALL FAILED: User not found").await;
        }
    }
}

fn assign_ports(peers: Vec<(String, String)>) -> Vec<(String, String, u16)> {
    peers
        .into_iter()
        .zip(config::MEDIA_PORT_BASE..)
        .map(|((name, ip), port)| (name, ip, port))
        .collect()
}

async fn announce_conference(
    state: &ServerState,
    caller: &str,
    endpoints: Vec<(String, String, u16)>,
) {
    if endpoints.len() < 2 {
        state
            .send_to(caller, "CALL FAILED: No other users online")
            .await;
        return;
    }
    let line = ServerDirective::CallAcceptedGlobal {
        endpoints: endpoints
            .iter()
            .map(|(_, ip, port)| (ip.clone(), *port))
            .collect(),
    }
    .encode();
    for (name, _, _) in &endpoints {
        state.send_to(name, &line).await;
    }
}

/// Relay a hangup. Group and global teardowns are local to each client;
/// only private calls notify the remote side.
async fn hangup(state: &ServerState, from: &str, target: &str) {
    if target.eq_ignore_ascii_case("global") || state.group_members(target).await.is_some() {
        return;
    }
    if state.is_registered(target).await {
        let line = ServerDirective::CallEnded {
            name: from.to_string(),
        }
        .encode();
        state.send_to(target, &line).await;
    } else {
        state
            .send_to(from, "PRIVATE CALL HANGUP FAILED: User not found")
            .await;
    }
}
