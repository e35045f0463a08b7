use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use parley_server::{tcp, ServerState};
use parley_shared::NAME_ACCEPTED;

const LINE_TIMEOUT: Duration = Duration::from_secs(2);

struct TestClient {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn next_line(&mut self) -> String {
        tokio::time::timeout(LINE_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("connection closed unexpectedly")
    }

    /// Read lines until one satisfies `pred`, returning it. Panics after
    /// the per-line timeout, so a missing message fails the test fast.
    async fn read_until<F: Fn(&str) -> bool>(&mut self, pred: F) -> String {
        loop {
            let line = self.next_line().await;
            if pred(&line) {
                return line;
            }
        }
    }

    /// Complete the handshake with the given display name and claimed IP.
    async fn join(addr: std::net::SocketAddr, name: &str, ip: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.send(name).await;
        assert_eq!(client.next_line().await, NAME_ACCEPTED);
        client.send(ip).await;
        client.read_until(|l| l.starts_with("ONLINE:")).await;
        client
    }
}

async fn start_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(tcp::run_control_server(ServerState::new(), listener));
    addr
}

#[tokio::test]
async fn handshake_rejects_empty_and_taken_names() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;

        let _alice = TestClient::join(addr, "alice", "10.0.0.1").await;

        let mut other = TestClient::connect(addr).await;
        other.send("").await;
        assert_eq!(other.next_line().await, "Username cannot be empty.");
        other.send("alice").await;
        assert_eq!(other.next_line().await, "Username already taken.");
        other.send("bob").await;
        assert_eq!(other.next_line().await, NAME_ACCEPTED);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn directory_reflects_registration_order() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;

        let mut a = TestClient::join(addr, "A", "10.0.0.1").await;
        let mut b = TestClient::join(addr, "B", "10.0.0.2").await;
        let mut c = TestClient::join(addr, "C", "10.0.0.3").await;

        for client in [&mut a, &mut b, &mut c] {
            client.read_until(|l| l == "ONLINE:A,B,C").await;
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn whisper_reaches_exactly_the_target() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;

        let mut a = TestClient::join(addr, "A", "10.0.0.1").await;
        let mut b = TestClient::join(addr, "B", "10.0.0.2").await;
        let mut c = TestClient::join(addr, "C", "10.0.0.3").await;

        b.send("@A hello").await;
        assert_eq!(
            a.read_until(|l| l.starts_with("Whisper")).await,
            "Whisper from B: hello"
        );

        // C sees the global chat line that follows, but never the whisper.
        b.send("done").await;
        let line = c.read_until(|l| l == "B: done" || l.starts_with("Whisper")).await;
        assert_eq!(line, "B: done");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn whisper_to_unknown_peer_reports_back() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;
        let mut a = TestClient::join(addr, "A", "10.0.0.1").await;
        a.send("@nobody hi").await;
        assert_eq!(a.next_line().await, "Client not found");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn private_call_assigns_paired_ports() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;

        let mut a = TestClient::join(addr, "A", "10.0.0.1").await;
        let mut b = TestClient::join(addr, "B", "10.0.0.2").await;

        a.send("Call B").await;
        assert_eq!(
            a.read_until(|l| l.starts_with("CALL ACCEPTED")).await,
            "CALL ACCEPTED (private): 10.0.0.2:5002:B"
        );
        assert_eq!(
            b.read_until(|l| l.starts_with("CALL ACCEPTED")).await,
            "CALL ACCEPTED (private): 10.0.0.1:5001:A"
        );

        // Remote hangup is relayed with the sender's name.
        a.send("CALL ENDED: B").await;
        assert_eq!(
            b.read_until(|l| l.starts_with("CALL ENDED")).await,
            "CALL ENDED:A"
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn self_call_is_rejected() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;
        let mut a = TestClient::join(addr, "A", "10.0.0.1").await;
        a.send("Call A").await;
        assert_eq!(
            a.read_until(|l| l.starts_with("CALL")).await,
            "CALL FAILED: Cannot call yourself"
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn global_call_hands_out_sequential_ports() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;

        let mut a = TestClient::join(addr, "A", "10.0.0.1").await;
        let mut b = TestClient::join(addr, "B", "10.0.0.2").await;
        let mut c = TestClient::join(addr, "C", "10.0.0.3").await;

        a.send("Call global").await;
        let expected = "CALL ACCEPTED (global): 10.0.0.1: 5001,10.0.0.2: 5002,10.0.0.3: 5003";
        for client in [&mut a, &mut b, &mut c] {
            assert_eq!(
                client.read_until(|l| l.starts_with("CALL ACCEPTED")).await,
                expected
            );
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn group_replication_and_messaging() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;

        let mut a = TestClient::join(addr, "A", "10.0.0.1").await;
        let mut b = TestClient::join(addr, "B", "10.0.0.2").await;
        let mut c = TestClient::join(addr, "C", "10.0.0.3").await;

        a.send("/creategroup@devs-A,B").await;
        assert_eq!(
            b.read_until(|l| l.starts_with("Join Group")).await,
            "Join Group: @devs-A,B"
        );

        a.send("/groupmsg@devs-standup in 5").await;
        assert_eq!(
            b.read_until(|l| l.starts_with("Group message")).await,
            "Group message from /A: @devs-standup in 5"
        );

        // C is not a member; the next thing C sees is unrelated chat.
        a.send("hi all").await;
        let line = c
            .read_until(|l| l == "A: hi all" || l.starts_with("Group message"))
            .await;
        assert_eq!(line, "A: hi all");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn group_call_uses_conference_setup_for_members_only() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;

        let mut a = TestClient::join(addr, "A", "10.0.0.1").await;
        let mut b = TestClient::join(addr, "B", "10.0.0.2").await;
        let _c = TestClient::join(addr, "C", "10.0.0.3").await;

        a.send("/creategroup@devs-A,B").await;
        b.read_until(|l| l.starts_with("Join Group")).await;

        a.send("Call devs").await;
        let expected = "CALL ACCEPTED (global): 10.0.0.1: 5001,10.0.0.2: 5002";
        for client in [&mut a, &mut b] {
            assert_eq!(
                client.read_until(|l| l.starts_with("CALL ACCEPTED")).await,
                expected
            );
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn get_ips_discloses_per_scope() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;

        let mut a = TestClient::join(addr, "A", "10.0.0.1").await;
        let mut b = TestClient::join(addr, "B", "10.0.0.2").await;
        let _c = TestClient::join(addr, "C", "10.0.0.3").await;

        a.send("/getIps @Global").await;
        assert_eq!(
            a.read_until(|l| l.starts_with("receivedIPs")).await,
            "receivedIPs voicenote:10.0.0.2,10.0.0.3@Global"
        );

        a.send("/creategroup@devs-A,B").await;
        b.read_until(|l| l.starts_with("Join Group")).await;
        a.send("/getIps @devs").await;
        assert_eq!(
            a.read_until(|l| l.starts_with("receivedIPs")).await,
            "receivedIPs voicenote:10.0.0.2@devs"
        );

        a.send("/getIps B").await;
        assert_eq!(
            a.read_until(|l| l.starts_with("receivedIPs")).await,
            "receivedIPs voicenote:10.0.0.2@B"
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn exit_terminates_and_broadcasts_departure() {
    tokio::time::timeout(Duration::from_secs(5), async {
        let addr = start_server().await;

        let mut a = TestClient::join(addr, "A", "10.0.0.1").await;
        let mut b = TestClient::join(addr, "B", "10.0.0.2").await;

        b.send("/exit").await;
        assert_eq!(b.read_until(|l| l == "Exiting chat...").await, "Exiting chat...");
        assert_eq!(b.read_until(|l| l == "terminate").await, "terminate");

        assert_eq!(
            a.read_until(|l| l.starts_with("LEAVING")).await,
            "LEAVING: B"
        );
        a.read_until(|l| l == "B has left the group chat.").await;
    })
    .await
    .expect("test timed out");
}
