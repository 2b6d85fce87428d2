// WebSocket server for the realtime channel.
//
// One task per session. On connect the session is registered with the hub
// and receives its initial snapshot (`timer_state`, then `latest_speeches`)
// before any broadcast frames; afterwards a writer pump drains the session's
// broadcast queue while the reader dispatches inbound control frames.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use crate::broadcast::Broadcaster;
use crate::hub::HubHandle;
use crate::protocol::{ClientMessage, ServerEvent};

/// Bind the realtime listener on the given port.
pub async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("failed to bind WebSocket listener on port {port}"))
}

/// Accept connections forever, spawning a task per session.
pub async fn run(
    listener: TcpListener,
    hub: HubHandle,
    broadcaster: Arc<Broadcaster>,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = hub.clone();
        let broadcaster = broadcaster.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_session(stream, addr, hub, broadcaster).await {
                warn!("Session error from {addr}: {e:#}");
            }
        });
    }
}

async fn handle_session(
    stream: TcpStream,
    addr: SocketAddr,
    hub: HubHandle,
    broadcaster: Arc<Broadcaster>,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut write, read) = ws_stream.split();

    let session = hub.subscribe().await?;
    let session_id = session.session_id;
    info!("Session {session_id} connected from {addr}");

    // Initial snapshot, delivered before any broadcast frame.
    send_event(&mut write, &ServerEvent::TimerState(session.timer)).await?;
    send_event(
        &mut write,
        &ServerEvent::LatestSpeeches(session.latest_speeches),
    )
    .await?;

    // Writer pump: broadcast queue -> socket.
    let mut frames = session.frames;
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if write.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    process_message_stream(read, &hub, &addr.to_string()).await;

    broadcaster.unsubscribe(session_id);
    writer.abort();
    info!("Session {session_id} disconnected");
    Ok(())
}

async fn send_event<S>(
    write: &mut SplitSink<WebSocketStream<S>, Message>,
    event: &ServerEvent,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = serde_json::to_string(event).context("failed to serialize snapshot event")?;
    write
        .send(Message::Text(frame.into()))
        .await
        .context("failed to send snapshot frame")?;
    Ok(())
}

/// Process inbound frames until the stream ends or the client closes.
///
/// Generic over the stream type so protocol handling can be tested with
/// in-memory streams instead of TCP sockets.
pub async fn process_message_stream<St>(mut stream: St, hub: &HubHandle, addr: &str)
where
    St: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => dispatch_client_message(hub, text.as_str(), addr).await,
            Ok(Message::Close(_)) => {
                info!("Session {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
}

/// Parse and dispatch one inbound text frame.
///
/// Rejections are logged rather than echoed: the outbound protocol has no
/// error event, and a malformed frame from one session must not tear down
/// the connection.
pub async fn dispatch_client_message(hub: &HubHandle, raw: &str, addr: &str) {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            warn!("Discarding unparseable frame from {addr}: {e}");
            return;
        }
    };

    match message {
        ClientMessage::TimerControl(control) => {
            if let Err(err) = hub.timer_control(control).await {
                warn!("Timer control from {addr} rejected: {err}");
            }
        }
        ClientMessage::NewSpeech(submission) => {
            if let Err(err) = hub.add_speech(submission).await {
                warn!("Speech from {addr} rejected: {err}");
            }
        }
    }
}
