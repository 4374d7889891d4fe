/// DaemonCore: single-owner event loop for all mutable state.
///
/// The loop owns the `ChannelRegistry` (and through it the playback
/// resource) and the `ScheduleCache`.  Socket clients, the mpv player task,
/// fetch tasks and the refresh ticker only send `DaemonEvent`s here.
///
/// After every mutation the loop publishes a fresh `DaemonView` and
/// broadcasts `StateUpdated` / `GuideUpdated` so client tasks can re-read it.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use livestreams_core::catalog::{Catalog, PLACEHOLDER_STREAM_HOST};
use livestreams_core::config::Config;
use livestreams_core::error::{FetchError, RegistryError};
use livestreams_core::fetcher::ScheduleFetcher;
use livestreams_core::guide::{guide_rows, GuideRow};
use livestreams_core::model::Channel;
use livestreams_core::protocol::Command;
use livestreams_core::registry::{
    ChannelRegistry, Generation, RegistrySnapshot, RemoteCommandStatus,
};
use livestreams_core::schedule::{RefreshTicket, ScheduleCache, ScheduleDocument};
use livestreams_core::store::{KeyValueStore, PREFERENCES_NAMESPACE, PROGRAM_NAMESPACE};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::mpv;
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client.
    ClientCommand(Command),
    /// A client connected; counts as an activation.
    ClientConnected,
    /// Periodic schedule refresh.
    RefreshTick,
    /// A fetch task finished.
    ScheduleFetched {
        ticket: RefreshTicket,
        result: Result<ScheduleDocument, FetchError>,
    },
    /// Rate change of the playback resource bound with `generation`.
    RateChanged { generation: Generation, rate: f32 },
    /// Shutdown requested.
    #[allow(dead_code)]
    Shutdown,
}

// ── shared view ───────────────────────────────────────────────────────────────

/// What clients read.  Replaced as a whole by the core.
#[derive(Debug, Clone, Default)]
pub struct DaemonView {
    pub registry: RegistrySnapshot,
    pub guide: Vec<GuideRow>,
}

pub type SharedView = Arc<RwLock<DaemonView>>;

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    registry: ChannelRegistry,
    schedule: ScheduleCache,
    fetcher: Arc<ScheduleFetcher>,
    refresh_interval: Duration,
    view: SharedView,
    /// Sender handed to fetch tasks and the ticker.
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl DaemonCore {
    pub async fn new(
        config: Config,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> anyhow::Result<Self> {
        let catalog = Catalog::load(config.catalog.path.as_deref())?;
        info!("DaemonCore: catalog with {} channels", catalog.len());
        if catalog.uses_placeholder_streams() {
            warn!(
                "DaemonCore: catalog uses placeholder stream URLs ({}), nothing will play; \
                 point catalog.path in {:?} at a catalog with real streams",
                PLACEHOLDER_STREAM_HOST,
                Config::config_path()
            );
        }

        let data_dir = &config.daemon.data_dir;
        std::fs::create_dir_all(data_dir)?;
        let preferences = KeyValueStore::open(data_dir, PREFERENCES_NAMESPACE);
        let schedule = ScheduleCache::open(KeyValueStore::open(data_dir, PROGRAM_NAMESPACE));

        let fetcher = ScheduleFetcher::new(&config.schedule)?;
        let player = mpv::spawn_player(config.player.mpv_binary.clone(), event_tx.clone());
        let registry = ChannelRegistry::new(
            Arc::new(catalog),
            preferences,
            Box::new(player),
            config.device.idiom,
        );

        Ok(Self::from_parts(
            registry,
            schedule,
            fetcher,
            config.schedule.refresh_interval(),
            broadcast_tx,
            event_tx,
        ))
    }

    pub fn from_parts(
        registry: ChannelRegistry,
        schedule: ScheduleCache,
        fetcher: ScheduleFetcher,
        refresh_interval: Duration,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let guide = guide_rows(
            &registry.all(),
            registry.catalog(),
            &schedule.snapshot(),
            &registry.preferred_versions(),
            Utc::now(),
        );
        let view = DaemonView {
            registry: registry.snapshot(),
            guide,
        };
        Self {
            registry,
            schedule,
            fetcher: Arc::new(fetcher),
            refresh_interval,
            view: Arc::new(RwLock::new(view)),
            event_tx,
            broadcast_tx,
        }
    }

    pub fn view(&self) -> SharedView {
        Arc::clone(&self.view)
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        // First tick fires immediately: the start-up activation refresh.
        let ticker_tx = self.event_tx.clone();
        let period = self.refresh_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if ticker_tx.send(DaemonEvent::RefreshTick).await.is_err() {
                    break;
                }
            }
        });

        while let Some(evt) = event_rx.recv().await {
            if !self.handle_event(evt).await {
                info!("DaemonCore: shutdown requested");
                return Ok(());
            }
        }
        info!("DaemonCore: event channel closed, shutting down");
        Ok(())
    }

    /// Returns `false` once the loop should stop.
    pub async fn handle_event(&mut self, evt: DaemonEvent) -> bool {
        match evt {
            DaemonEvent::Shutdown => return false,

            DaemonEvent::ClientCommand(cmd) => {
                info!("DaemonCore: command {:?}", cmd);
                if let Err(e) = self.handle_command(cmd).await {
                    warn!("DaemonCore: command error: {}", e);
                    let _ = self.broadcast_tx.send(BroadcastMessage::Error(e.to_string()));
                }
            }

            DaemonEvent::ClientConnected => self.start_refresh(),

            DaemonEvent::RefreshTick => {
                self.start_refresh();
                // "current" moves with the clock even without new data.
                self.publish_guide().await;
            }

            DaemonEvent::ScheduleFetched { ticket, result } => {
                self.handle_fetched(ticket, result).await;
            }

            DaemonEvent::RateChanged { generation, rate } => {
                if self.registry.on_rate_changed(generation, rate) {
                    self.publish_state().await;
                } else {
                    debug!(
                        "DaemonCore: ignoring rate {} from generation {}",
                        rate, generation
                    );
                }
            }
        }
        true
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<(), RegistryError> {
        match cmd {
            Command::Select { channel_id } => {
                self.registry.select(Channel { id: channel_id })?;
                self.publish_state().await;
            }
            Command::Deselect => {
                self.registry.deselect();
                self.publish_state().await;
            }
            Command::PreferLivestream {
                channel_id,
                livestream,
            } => {
                self.registry
                    .set_preferred_livestream(livestream, Channel { id: channel_id })?;
                self.publish_state().await;
                self.publish_guide().await;
            }
            Command::Reorder { from, to } => {
                self.registry.reorder(from, to)?;
                self.publish_state().await;
                self.publish_guide().await;
            }
            Command::Play => {
                if self.registry.remote_play() == RemoteCommandStatus::NoActionableItem {
                    self.report("no livestream loaded");
                }
            }
            Command::Pause => {
                if self.registry.remote_pause() == RemoteCommandStatus::NoActionableItem {
                    self.report("no livestream loaded");
                }
            }
            Command::RefreshSchedule => self.start_refresh(),
            Command::GetState => self.publish_state().await,
            Command::GetGuide => self.publish_guide().await,
        }
        Ok(())
    }

    fn report(&self, message: &str) {
        warn!("DaemonCore: {}", message);
        let _ = self
            .broadcast_tx
            .send(BroadcastMessage::Error(message.to_string()));
    }

    fn start_refresh(&mut self) {
        let ticket = self.schedule.begin_refresh();
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.event_tx.clone();
        debug!("DaemonCore: fetching schedule from {}", fetcher.endpoint());
        tokio::spawn(async move {
            let result = fetcher.fetch().await;
            let _ = tx.send(DaemonEvent::ScheduleFetched { ticket, result }).await;
        });
    }

    async fn handle_fetched(
        &mut self,
        ticket: RefreshTicket,
        result: Result<ScheduleDocument, FetchError>,
    ) {
        match result {
            Ok(document) => match self.schedule.apply(ticket, document) {
                Ok(true) => self.publish_guide().await,
                Ok(false) => {}
                Err(e) => warn!("DaemonCore: could not persist schedule: {}", e),
            },
            Err(e) => warn!("DaemonCore: schedule fetch failed, keeping cache: {}", e),
        }
    }

    fn derive_guide(&self) -> Vec<GuideRow> {
        guide_rows(
            &self.registry.all(),
            self.registry.catalog(),
            &self.schedule.snapshot(),
            &self.registry.preferred_versions(),
            Utc::now(),
        )
    }

    async fn publish_state(&self) {
        let snapshot = self.registry.snapshot();
        self.view.write().await.registry = snapshot;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn publish_guide(&self) {
        let guide = self.derive_guide();
        self.view.write().await.guide = guide;
        let _ = self.broadcast_tx.send(BroadcastMessage::GuideUpdated);
    }
}
