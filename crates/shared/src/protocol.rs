//! Control-plane wire protocol.
//!
//! The control channel is line-oriented UTF-8 over TCP: one directive per
//! `\n`-terminated line, recognized by literal prefix. The byte layout is
//! frozen: `encode` must produce exactly the strings `parse` accepts, so
//! both directions live here together with their tests.

use thiserror::Error;

/// Handshake reply sent when a display name is accepted.
pub const NAME_ACCEPTED: &str = "Username accepted.";
/// Handshake reply for an empty display name.
pub const NAME_EMPTY: &str = "Username cannot be empty.";
/// Handshake reply for a display name already in use.
pub const NAME_TAKEN: &str = "Username already taken.";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed {directive} directive: {line:?}")]
    Malformed {
        directive: &'static str,
        line: String,
    },
}

fn malformed(directive: &'static str, line: &str) -> ProtocolError {
    ProtocolError::Malformed {
        directive,
        line: line.to_string(),
    }
}

/// Split a comma-separated list, dropping empty items.
pub fn split_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Target of an address-disclosure request (`/getIps`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpScope {
    /// Every other connected peer.
    Global,
    /// Members of a named group.
    Group(String),
    /// A single peer.
    Peer(String),
}

impl IpScope {
    /// The scope label echoed back in `receivedIPs voicenote:…@<scope>`.
    pub fn label(&self) -> &str {
        match self {
            IpScope::Global => "Global",
            IpScope::Group(name) => name,
            IpScope::Peer(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientDirective {
    /// Plain text, broadcast to every other peer.
    Chat(String),
    /// `@<name> <msg>` private whisper.
    Whisper { to: String, msg: String },
    /// `/creategroup@<name>-<csv-members>`
    CreateGroup { name: String, members: Vec<String> },
    /// `/groupmsg@<name>-<msg>`
    GroupMessage { group: String, msg: String },
    /// `/getIps @Global` | `/getIps @<group>` | `/getIps <peer>`
    GetIps(IpScope),
    /// `Call <target>` where target is `global`, a group name, or a peer name.
    Call { target: String },
    /// `CALL ENDED: <target>`
    CallEnded { target: String },
    /// `/exit`
    Exit,
}

impl ClientDirective {
    /// Parse one trimmed control line from a client.
    ///
    /// Prefix checks happen in the same order the server dispatches them;
    /// anything unrecognized is a global chat broadcast. A leading `@`
    /// without a space is chat too; the registry replies "No message
    /// attached" for those rather than guessing a recipient.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line == "/exit" {
            return Ok(ClientDirective::Exit);
        }
        if let Some(rest) = line.strip_prefix('@') {
            if let Some(space) = rest.find(' ') {
                return Ok(ClientDirective::Whisper {
                    to: rest[..space].to_string(),
                    msg: rest[space + 1..].to_string(),
                });
            }
            return Ok(ClientDirective::Chat(line.to_string()));
        }
        if let Some(rest) = line.strip_prefix("/creategroup") {
            let (name, csv) = split_group_payload(rest).ok_or_else(|| malformed("creategroup", line))?;
            return Ok(ClientDirective::CreateGroup {
                name: name.to_string(),
                members: split_csv(csv),
            });
        }
        if let Some(rest) = line.strip_prefix("/groupmsg") {
            let (name, msg) = split_group_payload(rest).ok_or_else(|| malformed("groupmsg", line))?;
            return Ok(ClientDirective::GroupMessage {
                group: name.to_string(),
                msg: msg.to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("/getIps ") {
            let rest = rest.trim();
            return Ok(match rest.strip_prefix('@') {
                Some("Global") => ClientDirective::GetIps(IpScope::Global),
                Some(group) => ClientDirective::GetIps(IpScope::Group(group.to_string())),
                None => ClientDirective::GetIps(IpScope::Peer(rest.to_string())),
            });
        }
        if let Some(rest) = line.strip_prefix("Call ") {
            return Ok(ClientDirective::Call {
                target: rest.trim().to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("CALL ENDED") {
            let target = rest
                .strip_prefix(':')
                .ok_or_else(|| malformed("call-ended", line))?;
            return Ok(ClientDirective::CallEnded {
                target: target.trim().to_string(),
            });
        }
        Ok(ClientDirective::Chat(line.to_string()))
    }

    /// Render the exact wire line (no trailing newline).
    pub fn encode(&self) -> String {
        match self {
            ClientDirective::Chat(text) => text.clone(),
            ClientDirective::Whisper { to, msg } => format!("@{} {}", to, msg),
            ClientDirective::CreateGroup { name, members } => {
                format!("/creategroup@{}-{}", name, members.join(","))
            }
            ClientDirective::GroupMessage { group, msg } => {
                format!("/groupmsg@{}-{}", group, msg)
            }
            ClientDirective::GetIps(scope) => match scope {
                IpScope::Global => "/getIps @Global".to_string(),
                IpScope::Group(name) => format!("/getIps @{}", name),
                IpScope::Peer(name) => format!("/getIps {}", name),
            },
            ClientDirective::Call { target } => format!("Call {}", target),
            ClientDirective::CallEnded { target } => format!("CALL ENDED: {}", target),
            ClientDirective::Exit => "/exit".to_string(),
        }
    }
}

/// Split a `@<name>-<rest>` payload shared by the group directives.
/// The name may not contain `-`; the rest may.
fn split_group_payload(payload: &str) -> Option<(&str, &str)> {
    let rest = payload.strip_prefix('@')?;
    let dash = rest.find('-')?;
    Some((&rest[..dash], &rest[dash + 1..]))
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerDirective {
    /// `ONLINE:<csv-names>` directory snapshot in registry order.
    Online(Vec<String>),
    /// `LEAVING: <name>`
    Leaving(String),
    /// `Whisper from <name>: <msg>`
    Whisper { from: String, msg: String },
    /// `Join Group: @<name>-<csv-members>`
    JoinGroup { name: String, members: Vec<String> },
    /// `Group message from /<sender>: @<group>-<msg>`
    GroupMessage {
        from: String,
        group: String,
        msg: String,
    },
    /// `receivedIPs voicenote:<csv-ips>@<scope>`
    VoiceNoteIps { ips: Vec<String>, scope: String },
    /// `CALL ACCEPTED (private): <peer_ip>:<port>:<peer_name>`
    CallAcceptedPrivate {
        peer_ip: String,
        port: u16,
        peer_name: String,
    },
    /// `CALL ACCEPTED (global): <csv of "ip: port">`
    CallAcceptedGlobal { endpoints: Vec<(String, u16)> },
    /// `CALL ENDED:<name>`
    CallEnded { name: String },
    /// `terminate` (server requests client shutdown).
    Terminate,
    /// Anything else, displayed as plain chat text.
    Text(String),
}

impl ServerDirective {
    /// Parse one line from the server. Unrecognized lines become `Text`,
    /// so display always has somewhere to go; structurally broken variants
    /// of known prefixes are errors the client logs and skips.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        if let Some(rest) = line.strip_prefix("ONLINE:") {
            return Ok(ServerDirective::Online(split_csv(rest)));
        }
        if let Some(rest) = line.strip_prefix("LEAVING:") {
            return Ok(ServerDirective::Leaving(rest.trim().to_string()));
        }
        if let Some(rest) = line.strip_prefix("Whisper from ") {
            let colon = rest.find(": ").ok_or_else(|| malformed("whisper", line))?;
            return Ok(ServerDirective::Whisper {
                from: rest[..colon].to_string(),
                msg: rest[colon + 2..].to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("Join Group: ") {
            let (name, csv) = split_group_payload(rest).ok_or_else(|| malformed("join-group", line))?;
            return Ok(ServerDirective::JoinGroup {
                name: name.to_string(),
                members: split_csv(csv),
            });
        }
        if let Some(rest) = line.strip_prefix("Group message from /") {
            let colon = rest.find(": ").ok_or_else(|| malformed("group-message", line))?;
            let from = rest[..colon].to_string();
            let (group, msg) =
                split_group_payload(&rest[colon + 2..]).ok_or_else(|| malformed("group-message", line))?;
            return Ok(ServerDirective::GroupMessage {
                from,
                group: group.to_string(),
                msg: msg.to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("receivedIPs voicenote:") {
            let at = rest.find('@').ok_or_else(|| malformed("voice-note-ips", line))?;
            return Ok(ServerDirective::VoiceNoteIps {
                ips: split_csv(&rest[..at]),
                scope: rest[at + 1..].to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("CALL ACCEPTED (private): ") {
            let name_sep = rest.rfind(':').ok_or_else(|| malformed("call-accepted", line))?;
            let peer_name = rest[name_sep + 1..].to_string();
            let addr = &rest[..name_sep];
            let port_sep = addr.rfind(':').ok_or_else(|| malformed("call-accepted", line))?;
            let port = addr[port_sep + 1..]
                .trim()
                .parse()
                .map_err(|_| malformed("call-accepted", line))?;
            return Ok(ServerDirective::CallAcceptedPrivate {
                peer_ip: addr[..port_sep].to_string(),
                port,
                peer_name,
            });
        }
        if let Some(rest) = line.strip_prefix("CALL ACCEPTED (global): ") {
            let mut endpoints = Vec::new();
            for pair in rest.split(',') {
                let sep = pair.find(':').ok_or_else(|| malformed("call-accepted", line))?;
                let port = pair[sep + 1..]
                    .trim()
                    .parse()
                    .map_err(|_| malformed("call-accepted", line))?;
                endpoints.push((pair[..sep].trim().to_string(), port));
            }
            return Ok(ServerDirective::CallAcceptedGlobal { endpoints });
        }
        if let Some(rest) = line.strip_prefix("CALL ENDED") {
            let name = rest
                .strip_prefix(':')
                .ok_or_else(|| malformed("call-ended", line))?;
            return Ok(ServerDirective::CallEnded {
                name: name.trim().to_string(),
            });
        }
        if line == "terminate" {
            return Ok(ServerDirective::Terminate);
        }
        Ok(ServerDirective::Text(line.to_string()))
    }

    /// Render the exact wire line (no trailing newline).
    pub fn encode(&self) -> String {
        match self {
            ServerDirective::Online(names) => format!("ONLINE:{}", names.join(",")),
            ServerDirective::Leaving(name) => format!("LEAVING: {}", name),
            ServerDirective::Whisper { from, msg } => {
                format!("Whisper from {}: {}", from, msg)
            }
            ServerDirective::JoinGroup { name, members } => {
                format!("Join Group: @{}-{}", name, members.join(","))
            }
            ServerDirective::GroupMessage { from, group, msg } => {
                format!("Group message from /{}: @{}-{}", from, group, msg)
            }
            ServerDirective::VoiceNoteIps { ips, scope } => {
                format!("receivedIPs voicenote:{}@{}", ips.join(","), scope)
            }
            ServerDirective::CallAcceptedPrivate {
                peer_ip,
                port,
                peer_name,
            } => format!("CALL ACCEPTED (private): {}:{}:{}", peer_ip, port, peer_name),
            ServerDirective::CallAcceptedGlobal { endpoints } => {
                let pairs: Vec<String> = endpoints
                    .iter()
                    .map(|(ip, port)| format!("{}: {}", ip, port))
                    .collect();
                format!("CALL ACCEPTED (global): {}", pairs.join(","))
            }
            ServerDirective::CallEnded { name } => format!("CALL ENDED:{}", name),
            ServerDirective::Terminate => "terminate".to_string(),
            ServerDirective::Text(text) => text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_is_the_fallback() {
        assert_eq!(
            ClientDirective::parse("hello everyone").unwrap(),
            ClientDirective::Chat("hello everyone".into())
        );
    }

    #[test]
    fn whisper_splits_on_first_space() {
        assert_eq!(
            ClientDirective::parse("@alice how are you").unwrap(),
            ClientDirective::Whisper {
                to: "alice".into(),
                msg: "how are you".into()
            }
        );
    }

    #[test]
    fn whisper_without_message_stays_chat() {
        // The registry answers "No message attached" for these.
        assert_eq!(
            ClientDirective::parse("@alice").unwrap(),
            ClientDirective::Chat("@alice".into())
        );
    }

    #[test]
    fn creategroup_wire_format() {
        let d = ClientDirective::parse("/creategroup@devs-alice,bob,carol").unwrap();
        assert_eq!(
            d,
            ClientDirective::CreateGroup {
                name: "devs".into(),
                members: vec!["alice".into(), "bob".into(), "carol".into()],
            }
        );
        assert_eq!(d.encode(), "/creategroup@devs-alice,bob,carol");
    }

    #[test]
    fn creategroup_with_empty_member_list() {
        let d = ClientDirective::parse("/creategroup@solo-").unwrap();
        assert_eq!(
            d,
            ClientDirective::CreateGroup {
                name: "solo".into(),
                members: vec![],
            }
        );
    }

    #[test]
    fn creategroup_without_dash_is_malformed() {
        assert!(ClientDirective::parse("/creategroup@devs").is_err());
    }

    #[test]
    fn groupmsg_keeps_dashes_in_message() {
        assert_eq!(
            ClientDirective::parse("/groupmsg@devs-meeting at 3 - don't be late").unwrap(),
            ClientDirective::GroupMessage {
                group: "devs".into(),
                msg: "meeting at 3 - don't be late".into(),
            }
        );
    }

    #[test]
    fn getips_scopes() {
        assert_eq!(
            ClientDirective::parse("/getIps @Global").unwrap(),
            ClientDirective::GetIps(IpScope::Global)
        );
        assert_eq!(
            ClientDirective::parse("/getIps @devs").unwrap(),
            ClientDirective::GetIps(IpScope::Group("devs".into()))
        );
        assert_eq!(
            ClientDirective::parse("/getIps alice").unwrap(),
            ClientDirective::GetIps(IpScope::Peer("alice".into()))
        );
    }

    #[test]
    fn call_and_hangup() {
        assert_eq!(
            ClientDirective::parse("Call bob").unwrap(),
            ClientDirective::Call {
                target: "bob".into()
            }
        );
        assert_eq!(
            ClientDirective::parse("CALL ENDED: bob").unwrap(),
            ClientDirective::CallEnded {
                target: "bob".into()
            }
        );
    }

    #[test]
    fn online_preserves_order() {
        let d = ServerDirective::parse("ONLINE:alice,bob,carol").unwrap();
        assert_eq!(
            d,
            ServerDirective::Online(vec!["alice".into(), "bob".into(), "carol".into()])
        );
        assert_eq!(d.encode(), "ONLINE:alice,bob,carol");
    }

    #[test]
    fn whisper_delivery_round_trip() {
        let d = ServerDirective::Whisper {
            from: "bob".into(),
            msg: "hello: with colon".into(),
        };
        assert_eq!(ServerDirective::parse(&d.encode()).unwrap(), d);
    }

    #[test]
    fn voice_note_ips_round_trip() {
        let line = "receivedIPs voicenote:10.0.0.2,10.0.0.3@devs";
        assert_eq!(
            ServerDirective::parse(line).unwrap(),
            ServerDirective::VoiceNoteIps {
                ips: vec!["10.0.0.2".into(), "10.0.0.3".into()],
                scope: "devs".into(),
            }
        );
    }

    #[test]
    fn call_accepted_private_parse() {
        let d = ServerDirective::parse("CALL ACCEPTED (private): 10.0.0.7:5002:bob").unwrap();
        assert_eq!(
            d,
            ServerDirective::CallAcceptedPrivate {
                peer_ip: "10.0.0.7".into(),
                port: 5002,
                peer_name: "bob".into(),
            }
        );
    }

    #[test]
    fn call_accepted_global_tolerates_spaces() {
        let d =
            ServerDirective::parse("CALL ACCEPTED (global): 10.0.0.2: 5001,10.0.0.3: 5002").unwrap();
        assert_eq!(
            d,
            ServerDirective::CallAcceptedGlobal {
                endpoints: vec![("10.0.0.2".into(), 5001), ("10.0.0.3".into(), 5002)],
            }
        );
    }

    #[test]
    fn remote_hangup_has_no_space() {
        let d = ServerDirective::CallEnded { name: "bob".into() };
        assert_eq!(d.encode(), "CALL ENDED:bob");
        assert_eq!(ServerDirective::parse("CALL ENDED:bob").unwrap(), d);
    }

    #[test]
    fn unknown_server_line_is_text() {
        assert_eq!(
            ServerDirective::parse("bob has joined the chat.").unwrap(),
            ServerDirective::Text("bob has joined the chat.".into())
        );
    }
}
