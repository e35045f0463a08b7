use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;

mod audio;
mod call;
mod jitter;
mod network;
mod notes;
mod settings;
mod transfer;
mod tui;

use call::{CallKind, CallState};
use parley_shared::config;
use parley_shared::{ClientDirective, IpScope, ServerDirective};
use tui::{Action, ConnectionState, TabKind};

#[derive(Parser)]
#[command(name = "parley-client", about = "parley voice chat client")]
struct Args {
    /// Server address (host or host:port)
    #[arg(long)]
    server: Option<String>,

    /// Display name
    #[arg(long)]
    name: Option<String>,

    /// Address disclosed to peers for media and voice notes
    /// (defaults to the control socket's local address)
    #[arg(long)]
    claimed_ip: Option<String>,

    /// Voice-note listener port
    #[arg(long, default_value_t = config::VOICE_NOTE_PORT)]
    note_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log to file so it doesn't mess up the TUI
    if let Ok(file) = std::fs::File::create("/tmp/parley-client.log") {
        tracing_subscriber::fmt()
            .with_writer(file)
            .with_env_filter("parley_client=debug")
            .init();
    }

    let args = Args::parse();

    let user_settings = settings::UserSettings::load();
    let server_addr = args
        .server
        .or(user_settings.server)
        .unwrap_or_else(|| format!("127.0.0.1:{}", config::CONTROL_PORT));

    let mut app = tui::App::new(server_addr);
    app.name = args
        .name
        .or(user_settings.name)
        .map(|n| sanitize_name(&n))
        .filter(|n| !n.is_empty());
    app.claimed_override = args.claimed_ip.or(user_settings.claimed_ip);
    app.input_device = user_settings.input_device;
    app.output_device = user_settings.output_device;

    let mut terminal = tui::init_terminal()?;

    // The voice-note listener runs for the life of the client.
    match tokio::net::TcpListener::bind(("0.0.0.0", args.note_port)).await {
        Ok(listener) => {
            tokio::spawn(transfer::run_listener(
                listener,
                PathBuf::from(config::RECEIVED_NOTES_DIR),
            ));
            app.add_global(format!("voice-note listener on port {}", args.note_port));
        }
        Err(e) => {
            app.add_global(format!(
                "voice-note listener failed to bind port {}: {}",
                args.note_port, e
            ));
        }
    }

    let mut conn: Option<network::ServerConnection> = None;
    let mut server_rx: Option<mpsc::UnboundedReceiver<Option<ServerDirective>>> = None;
    let mut notes_store: Option<notes::VoiceNotes> = None;

    if app.name.is_some() {
        app.add_global(format!("connecting to {}...", app.server_addr));
        terminal.draw(|f| tui::draw(f, &app))?;
        try_connect(&mut conn, &mut server_rx, &mut notes_store, &mut app).await;
    } else {
        app.add_global("no display name set — use /name <name>, then /reconnect".into());
    }

    loop {
        // Drop finished note playback so the device closes.
        if app.playing.as_ref().is_some_and(|p| p.is_finished()) {
            app.playing = None;
            app.add_global("note playback finished".into());
        }

        if app.dirty {
            terminal.draw(|f| tui::draw(f, &app))?;
            app.dirty = false;
        }

        // Adaptive poll timeout: fast while media is moving, slow when idle
        let poll_timeout = if app.call.is_in_call() || app.recording || app.playing.is_some() {
            Duration::from_millis(50)
        } else {
            Duration::from_millis(200)
        };

        match tui::poll_event(&mut app, poll_timeout) {
            Action::Command(input) => {
                handle_command(&input, &mut conn, &mut server_rx, &mut notes_store, &mut app).await;
            }
            Action::Quit => break,
            Action::None => {}
        }

        // Drain server directives
        let mut dropped = false;
        if let Some(ref mut rx) = server_rx {
            while let Ok(msg) = rx.try_recv() {
                app.dirty = true;
                match msg {
                    Some(directive) => {
                        handle_server_directive(directive, &mut conn, &mut app);
                    }
                    None => {
                        dropped = true;
                        break;
                    }
                }
            }
        }
        if dropped {
            // A dead control channel ends the session: tear the call down
            // and leave. Media and notes never outlive the directory.
            end_active_call(&mut app, &mut conn, false);
            conn = None;
            server_rx = None;
            app.conn_state = ConnectionState::Disconnected;
            app.add_global("control connection lost, shutting down".into());
            app.should_quit = true;
        }

        if app.should_quit {
            break;
        }
    }

    // Cleanup: hang up, say goodbye, release the scratch directory.
    end_active_call(&mut app, &mut conn, true);
    if let Some(ref c) = conn {
        let _ = c.send(ClientDirective::Exit);
    }
    drop(notes_store);
    tui::restore_terminal();
    Ok(())
}

async fn try_connect(
    conn: &mut Option<network::ServerConnection>,
    server_rx: &mut Option<mpsc::UnboundedReceiver<Option<ServerDirective>>>,
    notes_store: &mut Option<notes::VoiceNotes>,
    app: &mut tui::App,
) {
    let Some(name) = app.name.clone() else {
        app.add_global("set a display name first: /name <name>".into());
        return;
    };
    match network::connect(&app.server_addr, &name, app.claimed_override.as_deref()).await {
        Ok(connected) => {
            app.claimed_ip = Some(connected.claimed_ip);
            app.conn_state = ConnectionState::Connected;
            app.add_global("connected!".into());
            *conn = Some(connected.conn);
            *server_rx = Some(connected.rx);
            if notes_store.is_none() {
                match notes::VoiceNotes::new(&name) {
                    Ok(store) => *notes_store = Some(store),
                    Err(e) => app.add_global(format!("voice notes unavailable: {:#}", e)),
                }
            }
            save_settings(app);
        }
        Err(e) => {
            app.conn_state = ConnectionState::Disconnected;
            // The handshake rejection line comes through verbatim
            // ("Username already taken." etc.).
            app.add_global(format!("connection failed: {:#}", e));
        }
    }
}

fn send_or_disconnect(
    conn: &mut Option<network::ServerConnection>,
    app: &mut tui::App,
    directive: ClientDirective,
) {
    if let Some(ref c) = conn {
        if c.send(directive).is_err() {
            *conn = None;
            app.conn_state = ConnectionState::Disconnected;
            app.add_global("disconnected from server".into());
        }
    }
}

/// Tear down the active call, optionally notifying the other side.
fn end_active_call(
    app: &mut tui::App,
    conn: &mut Option<network::ServerConnection>,
    emit_hangup: bool,
) {
    if !app.call.is_in_call() {
        return;
    }
    if let CallState::InCall(session) = app.call.take() {
        if emit_hangup {
            send_or_disconnect(
                conn,
                app,
                ClientDirective::CallEnded {
                    target: session.kind.hangup_target().to_string(),
                },
            );
        }
        let description = session.kind.describe();
        session.teardown();
        app.add_global(format!("{} ended", description));
    }
}

async fn handle_command(
    input: &str,
    conn: &mut Option<network::ServerConnection>,
    server_rx: &mut Option<mpsc::UnboundedReceiver<Option<ServerDirective>>>,
    notes_store: &mut Option<notes::VoiceNotes>,
    app: &mut tui::App,
) {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let arg = parts.get(1).map(|s| s.trim()).unwrap_or("");

    // Commands that work without a connection
    match parts[0] {
        "/name" | "/n" => {
            let new_name = sanitize_name(arg);
            if new_name.is_empty() {
                app.add_global("usage: /name <name>".into());
            } else {
                app.name = Some(new_name.clone());
                save_settings(app);
                if app.conn_state.is_connected() {
                    app.add_global(format!("name set to {} (takes effect on reconnect)", new_name));
                } else {
                    app.add_global(format!("name set to {}", new_name));
                }
            }
            return;
        }
        "/server" | "/s" => {
            if arg.is_empty() {
                app.add_global(format!("current server: {}", app.server_addr));
            } else {
                app.server_addr = if arg.contains(':') {
                    arg.to_string()
                } else {
                    format!("{}:{}", arg, config::CONTROL_PORT)
                };
                save_settings(app);
                app.add_global(format!("server address set to {}", app.server_addr));
            }
            return;
        }
        "/reconnect" | "/r" => {
            end_active_call(app, conn, true);
            if let Some(ref c) = conn {
                let _ = c.send(ClientDirective::Exit);
            }
            conn.take();
            server_rx.take();
            app.online.clear();
            app.conn_state = ConnectionState::Disconnected;
            app.add_global(format!("connecting to {}...", app.server_addr));
            try_connect(conn, server_rx, notes_store, app).await;
            return;
        }
        "/devices" => {
            list_devices(app);
            return;
        }
        "/input" => {
            select_device(app, arg, true);
            return;
        }
        "/output" => {
            select_device(app, arg, false);
            return;
        }
        "/notes" => {
            let found = notes::received_notes();
            if found.is_empty() {
                app.add_global("no received voice notes".into());
            } else {
                app.add_global("── received voice notes ──".into());
                for (i, path) in found.iter().enumerate() {
                    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                    app.add_global(format!("  {}. {}", i + 1, name.unwrap_or_default()));
                }
                app.add_global("play one with /play <number>".into());
            }
            return;
        }
        "/play" => {
            let found = notes::received_notes();
            match arg.parse::<usize>().ok().and_then(|n| found.get(n.wrapping_sub(1))) {
                Some(path) => match notes::play_note(path, app.output_device.as_deref()) {
                    Ok(playback) => {
                        app.add_global(format!("playing {}", playback.path.display()));
                        app.playing = Some(playback);
                    }
                    Err(e) => app.add_global(format!("playback failed: {:#}", e)),
                },
                None => app.add_global("usage: /play <number> (see /notes)".into()),
            }
            return;
        }
        "/tab" => {
            match arg.parse::<usize>() {
                Ok(n) if n >= 1 && n <= app.tabs.len() => app.select_tab(n - 1),
                _ => app.add_global(format!("usage: /tab <1-{}>", app.tabs.len())),
            }
            return;
        }
        "/help" | "/h" => {
            print_help(app);
            return;
        }
        "/quit" | "/exit" | "/q" => {
            app.should_quit = true;
            return;
        }
        _ => {}
    }

    // Everything below talks to the server.
    if app.conn_state.is_disconnected() {
        app.add_global("not connected — use /server <ip> and /reconnect".into());
        return;
    }

    match parts[0] {
        "/creategroup" | "/cg" => {
            let mut pieces = arg.splitn(2, ' ');
            let group = pieces.next().unwrap_or("").trim().to_string();
            let members = parley_shared::split_csv(pieces.next().unwrap_or(""));
            if group.is_empty() {
                app.add_global("usage: /creategroup <name> <member,member,...>".into());
                return;
            }
            app.groups.insert(group.clone(), members.clone());
            app.ensure_tab(TabKind::Group(group.clone()));
            app.add_to(
                TabKind::Group(group.clone()),
                format!("group created with members: {}", members.join(", ")),
            );
            send_or_disconnect(
                conn,
                app,
                ClientDirective::CreateGroup { name: group, members },
            );
        }
        "/call" | "/c" => {
            if arg.is_empty() {
                app.add_global("usage: /call <peer|group|global>".into());
                return;
            }
            end_active_call(app, conn, true);
            app.call = CallState::Pending {
                target: arg.to_string(),
            };
            send_or_disconnect(
                conn,
                app,
                ClientDirective::Call {
                    target: arg.to_string(),
                },
            );
            app.add_global(format!("calling {}...", arg));
        }
        "/hangup" => match &app.call {
            CallState::InCall(_) => end_active_call(app, conn, true),
            CallState::Pending { .. } => {
                app.call = CallState::Idle;
                app.add_global("call cancelled".into());
            }
            CallState::Idle => app.add_global("no active call".into()),
        },
        "/record" => {
            if notes_store.is_none() {
                if let Some(name) = app.name.clone() {
                    match notes::VoiceNotes::new(&name) {
                        Ok(store) => *notes_store = Some(store),
                        Err(e) => {
                            app.add_global(format!("voice notes unavailable: {:#}", e));
                            return;
                        }
                    }
                }
            }
            let Some(store) = notes_store.as_mut() else {
                return;
            };
            match store.start_recording(app.input_device.as_deref()) {
                Ok(()) => {
                    app.recording = true;
                    app.add_global("recording... finish with /stop <peer|group|Global>".into());
                }
                Err(e) => app.add_global(format!("recording failed: {:#}", e)),
            }
        }
        "/stop" => {
            let Some(store) = notes_store.as_mut() else {
                app.add_global("not recording".into());
                return;
            };
            if !store.is_recording() {
                app.add_global("not recording".into());
                return;
            }
            app.recording = false;
            match store.stop_recording() {
                Ok(Some(path)) => {
                    app.add_global(format!(
                        "voice note recorded: {}",
                        path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
                    ));
                    app.pending_note = Some(path);
                    if arg.is_empty() {
                        app.add_global("note kept — send it with /send <target>".into());
                    } else {
                        let scope = resolve_note_scope(app, arg);
                        send_or_disconnect(conn, app, ClientDirective::GetIps(scope));
                    }
                }
                Ok(None) => app.add_global("voice note recording was empty".into()),
                Err(e) => app.add_global(format!("recording failed: {:#}", e)),
            }
        }
        "/send" => {
            if app.pending_note.is_none() {
                app.add_global("no recorded note to send — /record first".into());
                return;
            }
            if arg.is_empty() {
                app.add_global("usage: /send <peer|group|Global>".into());
                return;
            }
            let scope = resolve_note_scope(app, arg);
            send_or_disconnect(conn, app, ClientDirective::GetIps(scope));
        }
        _ => {
            if let Some(rest) = input.strip_prefix('@') {
                // Explicit whisper, regardless of the active tab.
                let mut pieces = rest.splitn(2, ' ');
                let to = pieces.next().unwrap_or("").to_string();
                let msg = pieces.next().unwrap_or("").to_string();
                if to.is_empty() || msg.is_empty() {
                    app.add_global("usage: @<name> <message>".into());
                    return;
                }
                app.add_to(TabKind::Whisper(to.clone()), format!("you: {}", msg));
                send_or_disconnect(conn, app, ClientDirective::Whisper { to, msg });
            } else if !input.starts_with('/') {
                // Plain text goes to whatever conversation is active.
                let directive = match app.active_kind().clone() {
                    TabKind::Global => ClientDirective::Chat(input.to_string()),
                    TabKind::Whisper(peer) => ClientDirective::Whisper {
                        to: peer,
                        msg: input.to_string(),
                    },
                    TabKind::Group(name) => ClientDirective::GroupMessage {
                        group: name,
                        msg: input.to_string(),
                    },
                };
                app.add_active(format!("you: {}", input));
                send_or_disconnect(conn, app, directive);
            } else {
                app.add_global(format!("unknown command: {} (try /help)", parts[0]));
            }
        }
    }
}

fn handle_server_directive(
    directive: ServerDirective,
    conn: &mut Option<network::ServerConnection>,
    app: &mut tui::App,
) {
    match directive {
        ServerDirective::Online(names) => {
            app.online = names;
        }
        ServerDirective::Leaving(name) => {
            app.online.retain(|n| n != &name);
        }
        ServerDirective::Text(text) => {
            app.add_global(text);
        }
        ServerDirective::Whisper { from, msg } => {
            app.add_to(TabKind::Whisper(from.clone()), format!("{}: {}", from, msg));
        }
        ServerDirective::JoinGroup { name, members } => {
            app.groups.insert(name.clone(), members.clone());
            app.add_to(
                TabKind::Group(name),
                format!("added to group with members: {}", members.join(", ")),
            );
        }
        ServerDirective::GroupMessage { from, group, msg } => {
            app.add_to(TabKind::Group(group), format!("{}: {}", from, msg));
        }
        ServerDirective::VoiceNoteIps { ips, scope } => {
            send_pending_note(app, conn, ips, scope);
        }
        ServerDirective::CallAcceptedPrivate {
            peer_ip,
            port,
            peer_name,
        } => {
            setup_private_call(app, conn, peer_ip, port, peer_name);
        }
        ServerDirective::CallAcceptedGlobal { endpoints } => {
            setup_conference_call(app, conn, endpoints);
        }
        ServerDirective::CallEnded { name } => {
            // Remote hangup: local teardown only, no echo back.
            if app.call.is_in_call() {
                end_active_call(app, conn, false);
            } else {
                app.call = CallState::Idle;
            }
            app.add_global(format!("{} ended the call", name));
        }
        ServerDirective::Terminate => {
            app.add_global("server closed the session".into());
            app.should_quit = true;
        }
    }
}

/// Bind the receive port named in our own `CALL ACCEPTED (private)` line
/// and send to its partner port on the remote side.
fn setup_private_call(
    app: &mut tui::App,
    conn: &mut Option<network::ServerConnection>,
    peer_ip: String,
    port: u16,
    peer_name: String,
) {
    end_active_call(app, conn, true);

    let local_port = port;
    let remote_port = if port == config::MEDIA_PORT_BASE {
        config::MEDIA_PORT_BASE + 1
    } else {
        config::MEDIA_PORT_BASE
    };

    let devices = call::AudioDevices {
        input: app.input_device.as_deref(),
        output: app.output_device.as_deref(),
    };
    match call::start_private(peer_name.clone(), &peer_ip, remote_port, local_port, devices) {
        Ok(session) => {
            app.add_to(
                TabKind::Whisper(peer_name.clone()),
                format!("in call with {} (udp {})", peer_name, session.local_port),
            );
            app.call = CallState::InCall(session);
        }
        Err(e) => {
            app.call = CallState::Idle;
            app.add_global(format!("call setup failed: {:#}", e));
        }
    }
}

/// Pick our own entry out of the conference endpoint list (by claimed
/// address) and target everyone else.
fn setup_conference_call(
    app: &mut tui::App,
    conn: &mut Option<network::ServerConnection>,
    endpoints: Vec<(String, u16)>,
) {
    // Whether this is a group or global call is only knowable when we
    // initiated it; callees see the same setup line either way.
    let kind = match &app.call {
        CallState::Pending { target } if !target.eq_ignore_ascii_case("global") => {
            if app.groups.contains_key(target) {
                CallKind::Group {
                    name: target.clone(),
                }
            } else {
                CallKind::Global
            }
        }
        _ => CallKind::Global,
    };

    end_active_call(app, conn, true);

    let Some(my_ip) = app.claimed_ip.clone() else {
        app.call = CallState::Idle;
        app.add_global("call setup arrived before registration finished".into());
        return;
    };

    let mut local_port = None;
    let mut destinations = Vec::new();
    for (ip, port) in endpoints {
        if local_port.is_none() && ip == my_ip {
            local_port = Some(port);
        } else {
            destinations.push((ip, port));
        }
    }
    let Some(local_port) = local_port else {
        app.call = CallState::Idle;
        app.add_global("call setup did not include this client, ignoring".into());
        return;
    };

    let devices = call::AudioDevices {
        input: app.input_device.as_deref(),
        output: app.output_device.as_deref(),
    };
    match call::start_conference(kind, destinations, local_port, devices) {
        Ok(session) => {
            app.add_global(format!(
                "{} connected (udp {})",
                session.kind.describe(),
                session.local_port
            ));
            app.call = CallState::InCall(session);
        }
        Err(e) => {
            app.call = CallState::Idle;
            app.add_global(format!("call setup failed: {:#}", e));
        }
    }
}

/// Second phase of a voice-note send: the server disclosed the recipient
/// addresses, push the file to each and follow up with the courtesy line.
fn send_pending_note(
    app: &mut tui::App,
    conn: &mut Option<network::ServerConnection>,
    ips: Vec<String>,
    scope: String,
) {
    let Some(path) = app.pending_note.clone() else {
        app.add_global("received addresses but no note is selected".into());
        return;
    };
    if ips.is_empty() {
        app.add_global("nobody to send the voice note to".into());
        return;
    }

    let courtesy = if scope == "Global" {
        ClientDirective::Chat("sent a voice note".into())
    } else if app.groups.contains_key(&scope) {
        ClientDirective::GroupMessage {
            group: scope.clone(),
            msg: "sent a voice note".into(),
        }
    } else {
        ClientDirective::Whisper {
            to: scope.clone(),
            msg: "sent a voicenote".into(),
        }
    };

    app.add_global(format!(
        "sending voice note to {} recipient(s) [{}]",
        ips.len(),
        scope
    ));

    let sender = app.name.clone();
    let conn_handle = conn.clone();
    tokio::spawn(async move {
        let mut delivered = 0usize;
        for ip in &ips {
            if transfer::send_note(ip, config::VOICE_NOTE_PORT, &path, sender.as_deref()).await {
                delivered += 1;
            }
        }
        tracing::info!("voice note fan-out: {}/{} delivered", delivered, ips.len());
        if delivered > 0 {
            if let Some(c) = conn_handle {
                let _ = c.send(courtesy);
            }
        }
    });
}

fn resolve_note_scope(app: &tui::App, target: &str) -> IpScope {
    if target.eq_ignore_ascii_case("global") {
        IpScope::Global
    } else if app.groups.contains_key(target) {
        IpScope::Group(target.to_string())
    } else {
        IpScope::Peer(target.to_string())
    }
}

fn list_devices(app: &mut tui::App) {
    for is_input in [true, false] {
        let (heading, selected) = if is_input {
            ("── input devices ──", app.input_device.clone())
        } else {
            ("── output devices ──", app.output_device.clone())
        };
        app.add_global(heading.into());
        match audio::list_devices(is_input) {
            Ok(entries) => {
                for entry in entries {
                    let marker = if selected.as_deref() == Some(&entry.name) {
                        " [selected]"
                    } else if entry.is_default {
                        " [default]"
                    } else {
                        ""
                    };
                    app.add_global(format!("  {}. {}{}", entry.index, entry.name, marker));
                }
            }
            Err(e) => app.add_global(format!("  error: {}", e)),
        }
    }
}

fn select_device(app: &mut tui::App, arg: &str, is_input: bool) {
    let label = if is_input { "input" } else { "output" };
    let Ok(idx) = arg.parse::<usize>() else {
        app.add_global(format!("usage: /{} <N> (see /devices)", label));
        return;
    };
    match audio::list_devices(is_input) {
        Ok(entries) => {
            if let Some(entry) = entries.into_iter().find(|e| e.index == idx) {
                app.add_global(format!("{} device set to: {}", label, entry.name));
                if is_input {
                    app.input_device = Some(entry.name);
                } else {
                    app.output_device = Some(entry.name);
                }
                save_settings(app);
            } else {
                app.add_global(format!("no {} device with index {}", label, idx));
            }
        }
        Err(e) => app.add_global(format!("error listing devices: {}", e)),
    }
}

fn print_help(app: &mut tui::App) {
    app.add_global("── commands (short aliases in parens) ──".into());
    app.add_global("  <text>                 message the active tab".into());
    app.add_global("  @<name> <msg>          whisper a peer".into());
    app.add_global("  /creategroup (/cg) <name> <a,b,c>  create a group".into());
    app.add_global("  /call (/c) <target>    call a peer, group, or global".into());
    app.add_global("  /hangup                end the current call".into());
    app.add_global("  /record                start recording a voice note".into());
    app.add_global("  /stop <target>         finish recording and send it".into());
    app.add_global("  /send <target>         re-send the last recorded note".into());
    app.add_global("  /notes                 list received voice notes".into());
    app.add_global("  /play <n>              play a received note".into());
    app.add_global("  /devices               list audio devices".into());
    app.add_global("  /input /output <N>     select audio devices".into());
    app.add_global("  /name (/n) <name>      set your display name".into());
    app.add_global("  /server (/s) <ip>      set server address".into());
    app.add_global("  /reconnect (/r)        reconnect to the server".into());
    app.add_global("  /tab <n>               switch chat tab".into());
    app.add_global("  /quit (/q)             exit".into());
    app.add_global("── keys ──".into());
    app.add_global("  Tab                    cycle chat tabs".into());
    app.add_global("  Up/Down                command history".into());
    app.add_global("  PageUp/PageDown        scroll messages".into());
    app.add_global("  Ctrl+C / Esc           quit".into());
}

fn sanitize_name(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '@' && *c != ':')
        .collect()
}

fn save_settings(app: &tui::App) {
    let default_server = format!("127.0.0.1:{}", config::CONTROL_PORT);
    settings::UserSettings {
        server: if app.server_addr != default_server {
            Some(app.server_addr.clone())
        } else {
            None
        },
        name: app.name.clone(),
        claimed_ip: app.claimed_override.clone(),
        input_device: app.input_device.clone(),
        output_device: app.output_device.clone(),
    }
    .save();
}
