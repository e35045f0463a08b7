use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use parley_shared::config;
use parley_shared::{ClientDirective, ServerDirective, NAME_ACCEPTED};

/// Handle to send directives to the server.
#[derive(Clone)]
pub struct ServerConnection {
    tx: mpsc::UnboundedSender<ClientDirective>,
}

impl ServerConnection {
    pub fn send(&self, directive: ClientDirective) -> Result<()> {
        self.tx
            .send(directive)
            .map_err(|_| anyhow!("connection closed"))
    }
}

/// Everything `connect` hands back on success.
pub struct Connected {
    pub conn: ServerConnection,
    /// Incoming directives; `None` signals disconnect.
    pub rx: mpsc::UnboundedReceiver<Option<ServerDirective>>,
    /// The address the handshake disclosed to the server.
    pub claimed_ip: String,
}

/// Connect, run the name/address handshake, and spawn the I/O tasks.
///
/// A rejected name surfaces as an error carrying the server's reply line
/// ("Username already taken." etc.); the caller reconnects with a new name.
pub async fn connect(server_addr: &str, name: &str, claimed_ip: Option<&str>) -> Result<Connected> {
    let addr = if server_addr.contains(':') {
        server_addr.to_string()
    } else {
        format!("{}:{}", server_addr, config::CONTROL_PORT)
    };

    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let local_ip = stream.local_addr()?.ip().to_string();
    let claimed = claimed_ip
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .unwrap_or(local_ip);

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer.write_all(format!("{}\n", name).as_bytes()).await?;
    writer.flush().await?;
    let reply = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow!("server closed during handshake"))?;
    if reply != NAME_ACCEPTED {
        return Err(anyhow!(reply));
    }
    writer.write_all(format!("{}\n", claimed).as_bytes()).await?;
    writer.flush().await?;

    tracing::info!("connected to {} as {} (claimed {})", addr, name, claimed);

    // Channel for outgoing directives (client → server)
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientDirective>();

    // Channel for incoming directives (server → client); None = disconnect
    let (msg_tx, msg_rx) = mpsc::unbounded_channel::<Option<ServerDirective>>();

    tokio::spawn(writer_task(writer, cmd_rx));
    tokio::spawn(reader_task(lines, msg_tx));

    Ok(Connected {
        conn: ServerConnection { tx: cmd_tx },
        rx: msg_rx,
        claimed_ip: claimed,
    })
}

async fn writer_task(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<ClientDirective>) {
    while let Some(directive) = rx.recv().await {
        let line = format!("{}\n", directive.encode());
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::debug!("writer stopped: {}", e);
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
}

async fn reader_task(
    mut lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    tx: mpsc::UnboundedSender<Option<ServerDirective>>,
) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match ServerDirective::parse(&line) {
                Ok(directive) => {
                    if tx.send(Some(directive)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    // Log and keep reading; one bad line is not fatal.
                    tracing::warn!("ignoring malformed server line: {}", e);
                }
            },
            Ok(None) | Err(_) => {
                tracing::info!("server connection closed");
                let _ = tx.send(None);
                return;
            }
        }
    }
}
