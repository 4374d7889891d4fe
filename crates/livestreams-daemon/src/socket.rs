use crate::core::{DaemonEvent, SharedView};
use crate::BroadcastMessage;
use livestreams_core::error::FrameError;
use livestreams_core::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    view: SharedView,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);
                    let _ = event_tx.send(DaemonEvent::ClientConnected).await;

                    let view = view.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    tokio::spawn(async move {
                        handle_client(stream, view, id, evt_tx, bcast_rx).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    view: SharedView,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Hello with the current snapshot, then the guide.
    let hello = Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state: view.read().await.registry.clone(),
    };
    if send(&mut write_half, hello).await.is_err() {
        return;
    }
    if send(&mut write_half, guide(&view).await).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            match Message::decode(&read_buf) {
                                Ok(Some((Message::Command(cmd), consumed))) => {
                                    read_buf.drain(..consumed);
                                    debug!("Client {} sent command: {:?}", client_id, cmd);

                                    if event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("DaemonEvent channel closed");
                                        return;
                                    }
                                }
                                Ok(Some((_, consumed))) => {
                                    read_buf.drain(..consumed);
                                }
                                Ok(None) => break,
                                Err(FrameError::Malformed { len, source }) => {
                                    read_buf.drain(..4 + len);
                                    warn!("Client {} sent a malformed frame: {}", client_id, source);
                                    let reply = Broadcast::Error {
                                        message: format!("malformed command: {}", source),
                                    };
                                    if send(&mut write_half, reply).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e @ FrameError::TooLarge(_)) => {
                                    warn!("Client {} dropped: {}", client_id, e);
                                    let _ = send(&mut write_half, Broadcast::Error { message: e.to_string() }).await;
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let broadcast = match msg {
                    Ok(BroadcastMessage::StateUpdated) => state(&view).await,
                    Ok(BroadcastMessage::GuideUpdated) => guide(&view).await,
                    Ok(BroadcastMessage::Log(message)) => Broadcast::Log { message },
                    Ok(BroadcastMessage::Error(message)) => Broadcast::Error { message },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        if send(&mut write_half, guide(&view).await).await.is_err() {
                            break;
                        }
                        state(&view).await
                    }
                    Err(_) => break,
                };
                if send(&mut write_half, broadcast).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn state(view: &SharedView) -> Broadcast {
    Broadcast::State {
        data: view.read().await.registry.clone(),
    }
}

async fn guide(view: &SharedView) -> Broadcast {
    Broadcast::Guide {
        channels: view.read().await.guide.clone(),
    }
}

async fn send(writer: &mut OwnedWriteHalf, broadcast: Broadcast) -> anyhow::Result<()> {
    let encoded = Message::Broadcast(broadcast).encode()?;
    writer.write_all(&encoded).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DaemonView;
    use livestreams_core::model::ChannelId;
    use livestreams_core::protocol::Command;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    async fn read_message(stream: &mut TcpStream) -> Message {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes(header) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        let mut frame = header.to_vec();
        frame.extend_from_slice(&body);
        Message::decode(&frame).unwrap().unwrap().0
    }

    fn raw_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = (body.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(body);
        frame
    }

    /// Start a server on a free port and connect one client past its
    /// `Hello` and `Guide` frames.
    async fn connected_client() -> (
        TcpStream,
        mpsc::Receiver<DaemonEvent>,
        broadcast::Sender<BroadcastMessage>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let view: SharedView = Arc::new(RwLock::new(DaemonView::default()));
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (broadcast_tx, _) = broadcast::channel(8);
        let _server = start_server(
            "127.0.0.1".into(),
            port,
            view,
            event_tx,
            broadcast_tx.clone(),
        );

        let mut stream = loop {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        };

        match read_message(&mut stream).await {
            Message::Broadcast(Broadcast::Hello {
                protocol_version, ..
            }) => assert_eq!(protocol_version, PROTOCOL_VERSION),
            other => panic!("expected hello, got {:?}", other),
        }
        assert!(matches!(
            read_message(&mut stream).await,
            Message::Broadcast(Broadcast::Guide { .. })
        ));
        assert!(matches!(
            event_rx.recv().await,
            Some(DaemonEvent::ClientConnected)
        ));
        (stream, event_rx, broadcast_tx)
    }

    #[tokio::test]
    async fn client_gets_hello_and_commands_reach_core() {
        let (mut stream, mut event_rx, broadcast_tx) = connected_client().await;

        let frame = Message::Command(Command::Select {
            channel_id: ChannelId(3),
        })
        .encode()
        .unwrap();
        stream.write_all(&frame).await.unwrap();
        match event_rx.recv().await {
            Some(DaemonEvent::ClientCommand(Command::Select { channel_id })) => {
                assert_eq!(channel_id, ChannelId(3))
            }
            other => panic!("expected select, got {:?}", other),
        }

        broadcast_tx
            .send(BroadcastMessage::Error("channel 3 has no livestream available".into()))
            .unwrap();
        match read_message(&mut stream).await {
            Message::Broadcast(Broadcast::Error { message }) => assert!(message.contains('3')),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_and_reported() {
        let (mut stream, mut event_rx, _broadcast_tx) = connected_client().await;

        // Unknown command followed by a valid one in the same write.
        let mut bytes = raw_frame(br#"{"cmd":"Bogus"}"#);
        bytes.extend(Message::Command(Command::GetState).encode().unwrap());
        stream.write_all(&bytes).await.unwrap();

        assert!(matches!(
            read_message(&mut stream).await,
            Message::Broadcast(Broadcast::Error { .. })
        ));
        let next = tokio::time::timeout(std::time::Duration::from_secs(2), event_rx.recv())
            .await
            .expect("command after a malformed frame never arrived");
        assert!(matches!(
            next,
            Some(DaemonEvent::ClientCommand(Command::GetState))
        ));
    }

    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let (mut stream, _event_rx, _broadcast_tx) = connected_client().await;

        stream.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        assert!(matches!(
            read_message(&mut stream).await,
            Message::Broadcast(Broadcast::Error { .. })
        ));
        let mut rest = Vec::new();
        let read = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            stream.read_to_end(&mut rest),
        )
        .await
        .expect("connection stayed open");
        assert_eq!(read.unwrap(), 0);
    }
}
