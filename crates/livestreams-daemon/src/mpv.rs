/// mpv playback resource.
///
/// ```text
///   MpvPlayer (registry side, sync)
///         │  PlayerRequest via unbounded mpsc
///         ▼
///   player_task ── owns MpvDriver + MpvHandle
///         │            ├── writer_task ← JSON commands → socket
///         │            └── reader_task → responses / property changes
///         ▼
///   DaemonEvent::RateChanged { generation, rate }  → DaemonCore
/// ```
///
/// The registry sees a playback resource with a rate: 1.0 while mpv is
/// neither paused nor idle, 0.0 otherwise.  Each `replace` starts a new
/// generation that later rate events are stamped with.
use livestreams_core::registry::{Generation, Player};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::core::DaemonEvent;

#[cfg(unix)]
use tokio::net::UnixStream;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line, '\n' terminated
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited mpv event (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }
}

// ── IPC handle ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load(&self, url: &Url) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url.as_str()])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn get_bool(&self, name: &str) -> anyhow::Result<bool> {
        let reply = self.send(json!(["get_property", name])).await?;
        reply["data"]
            .as_bool()
            .ok_or_else(|| anyhow::anyhow!("mpv property {} is not a bool", name))
    }

    /// Must be sent after every fresh connection.
    pub async fn observe_playback(&self) {
        for (id, name) in [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    binary: Option<PathBuf>,
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self {
            binary,
            socket_name: livestreams_core::platform::mpv_socket_name(),
            process: None,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning new process");
        let mpv_binary = livestreams_core::platform::find_mpv_binary(self.binary.as_deref())
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--idle=yes")
            .arg("--force-window=immediate")
            .arg(livestreams_core::platform::mpv_socket_arg())
            .arg("--quiet")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");

        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);
        tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

        Ok(MpvHandle { tx: cmd_tx })
    }

    #[cfg(not(unix))]
    pub async fn spawn_and_connect(
        &mut self,
        _event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        anyhow::bail!("mpv IPC needs unix domain sockets on this platform")
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                for (_, tx) in pending.lock().await.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    if let Some(tx) = pending.lock().await.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error");
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                for (_, tx) in pending.lock().await.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── registry-facing player ────────────────────────────────────────────────────

#[derive(Debug)]
enum PlayerRequest {
    Replace {
        url: Option<Url>,
        generation: Generation,
    },
    Play,
    Pause,
}

/// `Player` backed by an mpv process.  Requests are queued to a single task,
/// so they reach mpv in the order the registry issued them.
pub struct MpvPlayer {
    tx: mpsc::UnboundedSender<PlayerRequest>,
    loaded: bool,
}

impl MpvPlayer {
    fn request(&self, req: PlayerRequest) {
        if self.tx.send(req).is_err() {
            warn!("mpv: player task gone, dropping request");
        }
    }
}

impl Player for MpvPlayer {
    fn replace(&mut self, url: Option<&Url>, generation: Generation) {
        self.loaded = url.is_some();
        self.request(PlayerRequest::Replace {
            url: url.cloned(),
            generation,
        });
    }

    fn play(&mut self) {
        self.request(PlayerRequest::Play);
    }

    fn pause(&mut self) {
        self.request(PlayerRequest::Pause);
    }

    fn has_item(&self) -> bool {
        self.loaded
    }
}

pub fn spawn_player(binary: Option<PathBuf>, events: mpsc::Sender<DaemonEvent>) -> MpvPlayer {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(player_task(MpvDriver::new(binary), rx, events));
    MpvPlayer { tx, loaded: false }
}

/// Observed mpv playback properties.
#[derive(Debug, Clone, Copy)]
struct PlaybackProps {
    paused: bool,
    idle: bool,
}

impl PlaybackProps {
    /// A freshly bound resource: paused until told to play.
    fn fresh() -> Self {
        Self {
            paused: true,
            idle: true,
        }
    }

    fn rate(&self) -> f32 {
        if !self.paused && !self.idle {
            1.0
        } else {
            0.0
        }
    }
}

/// Drop every event already queued on `rx`, returning how many were dropped.
fn discard_queued(rx: &mut mpsc::Receiver<MpvEvent>) -> usize {
    let mut dropped = 0;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}

async fn player_task(
    mut driver: MpvDriver,
    mut requests: mpsc::UnboundedReceiver<PlayerRequest>,
    events: mpsc::Sender<DaemonEvent>,
) {
    let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(256);
    let mut handle: Option<MpvHandle> = None;
    let mut generation: Generation = 0;
    let mut props = PlaybackProps::fresh();
    let mut last_rate = props.rate();

    loop {
        tokio::select! {
            req = requests.recv() => {
                let Some(req) = req else { break };

                if handle.is_none() || !driver.process_alive() {
                    handle = match driver.spawn_and_connect(mpv_tx.clone()).await {
                        Ok(h) => {
                            h.observe_playback().await;
                            Some(h)
                        }
                        Err(e) => {
                            warn!("mpv: unavailable, dropping {:?}: {}", req, e);
                            None
                        }
                    };
                }
                let Some(h) = &handle else { continue };

                let result = match req {
                    PlayerRequest::Replace { url, generation: g } => {
                        generation = g;
                        let bound = match h.set_pause(true).await {
                            Ok(()) => match url {
                                Some(url) => h.load(&url).await,
                                None => h.stop().await,
                            },
                            Err(e) => Err(e),
                        };
                        // Changes queued so far belong to the old resource.
                        let stale = discard_queued(&mut mpv_rx);
                        if stale > 0 {
                            debug!("mpv: discarded {} events of the replaced resource", stale);
                        }
                        props = PlaybackProps::fresh();
                        if let (Ok(paused), Ok(idle)) =
                            (h.get_bool("pause").await, h.get_bool("core-idle").await)
                        {
                            props = PlaybackProps { paused, idle };
                        }
                        // The new resource's initial rate is not an event.
                        last_rate = props.rate();
                        bound
                    }
                    PlayerRequest::Play => h.set_pause(false).await,
                    PlayerRequest::Pause => h.set_pause(true).await,
                };
                if let Err(e) = result {
                    warn!("mpv: request failed: {}", e);
                }
            }

            Some(event) = mpv_rx.recv() => {
                let Some((id, data)) = event.as_property_change() else { continue };
                match id {
                    OBS_PAUSE => props.paused = data.as_bool().unwrap_or(props.paused),
                    OBS_CORE_IDLE => props.idle = data.as_bool().unwrap_or(props.idle),
                    _ => continue,
                }
                let rate = props.rate();
                if rate != last_rate {
                    last_rate = rate;
                    debug!("mpv: rate {} (generation {})", rate, generation);
                    if events.send(DaemonEvent::RateChanged { generation, rate }).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    driver.kill().await;
    debug!("mpv: player task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_change_is_recognised() {
        let event = MpvEvent {
            raw: json!({"event": "property-change", "id": OBS_PAUSE, "name": "pause", "data": false}),
        };
        let (id, data) = event.as_property_change().unwrap();
        assert_eq!(id, OBS_PAUSE);
        assert_eq!(data.as_bool(), Some(false));

        let other = MpvEvent {
            raw: json!({"event": "file-loaded"}),
        };
        assert!(other.as_property_change().is_none());
    }

    #[test]
    fn rate_needs_unpaused_and_busy_core() {
        let mut props = PlaybackProps::fresh();
        assert_eq!(props.rate(), 0.0);
        props.paused = false;
        assert_eq!(props.rate(), 0.0);
        props.idle = false;
        assert_eq!(props.rate(), 1.0);
    }

    #[tokio::test]
    async fn events_of_replaced_resource_are_discarded() {
        let (tx, mut rx) = mpsc::channel(8);
        for playing in [false, true] {
            tx.send(MpvEvent {
                raw: json!({"event": "property-change", "id": OBS_PAUSE, "data": !playing}),
            })
            .await
            .unwrap();
        }

        assert_eq!(discard_queued(&mut rx), 2);
        assert!(rx.try_recv().is_err());

        // Later events still arrive.
        tx.send(MpvEvent {
            raw: json!({"event": "property-change", "id": OBS_CORE_IDLE, "data": false}),
        })
        .await
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.as_property_change().map(|(id, _)| id), Some(OBS_CORE_IDLE));
    }

    #[tokio::test]
    async fn player_tracks_loaded_item() {
        let (tx, _requests) = mpsc::unbounded_channel();
        let mut player = MpvPlayer { tx, loaded: false };
        let url = Url::parse("https://streams.example.net/one/hd/master.m3u8").unwrap();

        assert!(!player.has_item());
        player.replace(Some(&url), 1);
        assert!(player.has_item());
        player.replace(None, 2);
        assert!(!player.has_item());
    }
}
