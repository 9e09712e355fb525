//! Radio player with retry, mirror rotation and live-edge pause handling
//!
//! `Player` is a cheap, cloneable handle. `play` drives one station until it
//! is stopped or every endpoint has failed; all other methods return
//! immediately (except `stop`, which waits for the active attempt's tasks).
//!
//! ## One attempt
//! ```text
//! reqwest body --pump_stream--> PipeWriter ~~ PipeReader --decoder--> FrameProducer
//!                  |                                                        |
//!             ICY titles -> PlaybackStatus                    QueueSource -> AudioOutput
//! ```
//! Every task of an attempt is tracked by its own `TaskTracker` and observes
//! the attempt's `CancellationToken`, a child of the session token.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::config::EngineConfig;
use super::decoder::{DecoderFactory, SymphoniaDecoderFactory, decode_and_buffer};
use super::events::{PlayerEventReceiver, player_event_channel};
use super::fade::FadeIn;
use super::icy::IcyDemuxer;
use super::output::AudioOutput;
use super::queue::{FrameConsumer, FrameProducer, frame_queue};
use super::retry::{Action, RetryMachine};
use super::source::QueueSource;
use super::status::{PauseAccounting, PlaybackState, PlaybackStatus, RetryInfo};
use super::streaming::{
    EndReason, PIPE_CAPACITY, PipeReader, PumpContext, StreamEnd, build_http_client,
    open_stream, pump_stream, stream_pipe,
};
use super::volume::{DEFAULT_VOLUME, Volume};
use crate::error::PlayerError;
use crate::playlist::{HttpPlaylistResolver, PlaylistResolver, StreamDescriptor};
use crate::station::Station;

// ============ Builder ============

pub struct PlayerBuilder {
    config: EngineConfig,
    output: Option<Arc<dyn AudioOutput>>,
    resolver: Option<Arc<dyn PlaylistResolver>>,
    decoders: Option<Arc<dyn DecoderFactory>>,
}

impl PlayerBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            output: None,
            resolver: None,
            decoders: None,
        }
    }

    /// Where audio goes; required
    pub fn output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.output = Some(output);
        self
    }

    /// Defaults to fetching PLS/M3U documents over HTTP
    pub fn resolver(mut self, resolver: Arc<dyn PlaylistResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Defaults to symphonia
    pub fn decoder_factory(mut self, decoders: Arc<dyn DecoderFactory>) -> Self {
        self.decoders = Some(decoders);
        self
    }

    /// Build the player
    ///
    /// Call from inside a tokio runtime so long pauses can schedule their
    /// reconnect on it.
    pub fn build(self) -> Result<Player, PlayerError> {
        let output = self
            .output
            .ok_or_else(|| PlayerError::Output("no audio output configured".to_string()))?;
        let client = build_http_client(&self.config)?;
        let resolver = self.resolver.unwrap_or_else(|| {
            Arc::new(HttpPlaylistResolver::new(
                client.clone(),
                self.config.playlist_timeout,
            ))
        });
        let decoders = self
            .decoders
            .unwrap_or_else(|| Arc::new(SymphoniaDecoderFactory));

        let (events_tx, events_rx) = player_event_channel();
        let volume = Volume::from_percent(i32::from(self.config.initial_volume));
        output.set_volume(volume);

        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            tracing::warn!("Player built outside a tokio runtime, long pauses will not reconnect");
        }

        Ok(Player {
            inner: Arc::new(PlayerInner {
                config: self.config,
                client,
                resolver,
                decoders,
                output,
                status: Arc::new(PlaybackStatus::new(events_tx)),
                control: Mutex::new(Control {
                    volume,
                    ..Control::default()
                }),
                events_rx: Mutex::new(Some(events_rx)),
                switch: tokio::sync::Mutex::new(()),
                runtime,
            }),
        })
    }
}

// ============ Player ============

/// The attempt currently allowed to touch the output
struct ActiveAttempt {
    id: u64,
    token: CancellationToken,
    tasks: TaskTracker,
}

/// Playback flags, guarded together
#[derive(Default)]
struct Control {
    active: Option<ActiveAttempt>,
    next_attempt_id: u64,
    session: Option<CancellationToken>,
    is_playing: bool,
    is_paused: bool,
    volume: Volume,
    station: Option<Station>,
    pause: PauseAccounting,
}

struct PlayerInner {
    config: EngineConfig,
    client: reqwest::Client,
    resolver: Arc<dyn PlaylistResolver>,
    decoders: Arc<dyn DecoderFactory>,
    output: Arc<dyn AudioOutput>,
    status: Arc<PlaybackStatus>,
    control: Mutex<Control>,
    events_rx: Mutex<Option<PlayerEventReceiver>>,
    /// Held while one session is torn down and the next installed
    switch: tokio::sync::Mutex<()>,
    runtime: Option<Handle>,
}

#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("status", &self.inner.status)
            .finish_non_exhaustive()
    }
}

impl Player {
    pub fn builder(config: EngineConfig) -> PlayerBuilder {
        PlayerBuilder::new(config)
    }

    /// Event stream for the UI; `None` after the first call
    pub fn take_event_rx(&self) -> Option<PlayerEventReceiver> {
        self.inner.events_rx.lock().take()
    }

    // ============ Playback Control ============

    /// Play a station until stopped or until every endpoint has failed
    ///
    /// Returns `Ok(())` when playback was stopped deliberately, including by
    /// a later `play` or `reconnect`.
    pub async fn play(&self, station: &Station) -> Result<(), PlayerError> {
        let status = &self.inner.status;
        let endpoints = station.ranked_playlist_urls();
        let session = CancellationToken::new();
        {
            let _switch = self.inner.switch.lock().await;
            self.release().await;

            let mut control = self.inner.control.lock();
            control.station = Some(station.clone());
            if let Some(previous) = control.session.replace(session.clone()) {
                previous.cancel();
            }
        }

        if endpoints.is_empty() {
            tracing::error!("Station {} has no playlists", station.title);
            status.set_state(PlaybackState::Error);
            status.set_last_error("No playlists available");
            return Err(PlayerError::NoPlaylists(station.title.clone()));
        }

        tracing::info!(
            station = station.id.as_str(),
            endpoints = endpoints.len(),
            "Playing {}",
            station.title
        );
        self.if_live(&session, |status| {
            status.set_state(PlaybackState::Buffering);
            status.set_retry_info(0, self.inner.config.max_attempts);
            status.set_last_error("");
            status.set_current_track("");
        });

        match self.run_session(endpoints, &session).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() || session.is_cancelled() => Ok(()),
            Err(e) => {
                tracing::error!("Giving up on {}: {}", station.title, e);
                self.if_live(&session, |status| {
                    status.set_state(PlaybackState::Error);
                    status.set_last_error("Connection failed");
                });
                Err(e)
            }
        }
    }

    /// Stop playback and wait until the active attempt has released its
    /// queue, pipe and network connection
    pub async fn stop(&self) {
        self.halt().await;
        self.inner.status.set_state(PlaybackState::Idle);
    }

    /// Drop the current connection and play the current station again
    pub async fn reconnect(&self) -> Result<(), PlayerError> {
        let Some(station) = self.current_station() else {
            tracing::debug!("Reconnect requested with no station");
            return Ok(());
        };

        tracing::info!("Reconnecting to {}", station.title);
        self.inner.status.set_state(PlaybackState::Reconnecting);
        self.halt().await;

        match self.play(&station).await {
            Err(e) if !e.is_cancelled() => {
                self.inner.status.set_state(PlaybackState::Error);
                self.inner.status.set_last_error("Reconnect failed");
                Err(e)
            }
            other => other,
        }
    }

    /// Pause or resume the sink
    ///
    /// Resuming after more than `max_pause` of total paused time reconnects
    /// instead, since a live stream cannot catch up.
    pub fn toggle_pause(&self) {
        let now = Instant::now();
        let inner = &self.inner;
        let mut control = inner.control.lock();
        if !control.is_playing {
            return;
        }

        if !control.is_paused {
            control.is_paused = true;
            control.pause.pause(now);
            inner.output.set_paused(true);
            inner.status.set_state(PlaybackState::Paused);
            return;
        }

        control.is_paused = false;
        let total_paused = control.pause.resume(now);
        if total_paused > inner.config.max_pause {
            control.pause.reset();
            drop(control);
            tracing::info!(
                "Paused for {:?} in total, reconnecting to the live edge",
                total_paused
            );
            self.spawn_reconnect();
        } else {
            inner.output.set_paused(false);
            inner.status.set_state(PlaybackState::Playing);
        }
    }

    fn spawn_reconnect(&self) {
        let Some(runtime) = &self.inner.runtime else {
            tracing::warn!("No runtime to reconnect on, resuming in place");
            self.inner.output.set_paused(false);
            self.inner.status.set_state(PlaybackState::Playing);
            return;
        };

        let player = self.clone();
        runtime.spawn(async move {
            if let Err(e) = player.reconnect().await {
                tracing::error!("Reconnect failed: {}", e);
            }
        });
    }

    // ============ Volume ============

    /// Set the volume in percent; 0 mutes
    pub fn set_volume(&self, percent: i32) {
        self.apply_volume(|_| Volume::from_percent(percent));
    }

    /// Change the volume by `delta` percent, unmuting
    pub fn adjust_volume(&self, delta: i32) {
        self.apply_volume(|current| Volume::from_percent(i32::from(current.percent()) + delta));
    }

    /// Mute, or restore the volume from before muting
    pub fn toggle_mute(&self) {
        self.apply_volume(|current| {
            if !current.is_muted() {
                current.muted()
            } else if current.percent() == 0 {
                Volume::from_percent(i32::from(DEFAULT_VOLUME))
            } else {
                Volume::from_percent(i32::from(current.percent()))
            }
        });
    }

    fn apply_volume(&self, update: impl FnOnce(Volume) -> Volume) {
        let mut control = self.inner.control.lock();
        let volume = update(control.volume);
        control.volume = volume;
        self.inner.output.set_volume(volume);
        tracing::debug!(
            percent = volume.percent(),
            muted = volume.is_muted(),
            "Volume changed"
        );
    }

    pub fn volume(&self) -> u8 {
        self.inner.control.lock().volume.percent()
    }

    pub fn is_muted(&self) -> bool {
        self.inner.control.lock().volume.is_muted()
    }

    // ============ Status ============

    pub fn state(&self) -> PlaybackState {
        self.inner.status.state()
    }

    pub fn stream_descriptor(&self) -> StreamDescriptor {
        self.inner.status.stream_descriptor()
    }

    pub fn retry_info(&self) -> RetryInfo {
        self.inner.status.retry_info()
    }

    /// Frame queue fill, 0..=100
    pub fn buffer_health(&self) -> u8 {
        self.inner.status.buffer_health()
    }

    pub fn current_track(&self) -> String {
        self.inner.status.current_track()
    }

    /// Show a catalog title until the stream announces its own
    pub fn set_initial_track(&self, title: impl Into<String>) {
        self.inner.status.set_initial_track(title);
    }

    pub fn last_error(&self) -> String {
        self.inner.status.last_error()
    }

    pub fn session_duration(&self) -> std::time::Duration {
        self.inner.status.session_duration()
    }

    /// How far behind the live edge pausing has put us
    pub fn playback_delay(&self) -> std::time::Duration {
        self.inner.control.lock().pause.delay(Instant::now())
    }

    pub fn is_playing(&self) -> bool {
        self.inner.control.lock().is_playing
    }

    pub fn is_paused(&self) -> bool {
        self.inner.control.lock().is_paused
    }

    pub fn current_station(&self) -> Option<Station> {
        self.inner.control.lock().station.clone()
    }

    // ============ Session Driver ============

    /// Cancel the session and the active attempt, then wait for its tasks
    async fn halt(&self) {
        let _switch = self.inner.switch.lock().await;
        self.release().await;
    }

    /// `halt` without taking the switch lock
    async fn release(&self) {
        let active = {
            let mut control = self.inner.control.lock();
            if let Some(session) = control.session.take() {
                session.cancel();
            }
            control.is_playing = false;
            control.is_paused = false;
            control.pause.reset();
            control.active.take()
        };

        self.inner.output.clear();
        if let Some(active) = active {
            active.token.cancel();
            active.tasks.close();
            active.tasks.wait().await;
            tracing::debug!("Attempt {} released", active.id);
        }

        self.inner.status.set_queue_level(None);
        self.inner.status.clear_session();
    }

    /// Apply a status update unless the session has been stopped
    ///
    /// `halt` cancels under the same lock, so no update lands after it.
    fn if_live(&self, session: &CancellationToken, update: impl FnOnce(&PlaybackStatus)) -> bool {
        let _control = self.inner.control.lock();
        if session.is_cancelled() {
            return false;
        }
        update(&self.inner.status);
        true
    }

    async fn run_session(
        &self,
        endpoints: Vec<String>,
        session: &CancellationToken,
    ) -> Result<(), PlayerError> {
        let config = &self.inner.config;
        let mut machine = RetryMachine::new(
            endpoints,
            config.max_attempts,
            config.short_circuit_network_down,
        );

        loop {
            if session.is_cancelled() {
                return Ok(());
            }

            match machine.next_action() {
                Action::Resolve { endpoint } => {
                    let resolved = tokio::select! {
                        _ = session.cancelled() => return Ok(()),
                        result = tokio::time::timeout(
                            config.playlist_timeout,
                            self.inner.resolver.resolve(&endpoint),
                        ) => result.unwrap_or_else(|_| {
                            Err(PlayerError::Playlist(format!(
                                "playlist timed out after {:?}",
                                config.playlist_timeout
                            )))
                        }),
                    };
                    machine.on_resolved(resolved);
                }
                Action::Attempt {
                    url,
                    descriptor,
                    retry,
                } => {
                    if let Some(info) = retry {
                        tracing::info!(
                            "Retrying {} ({}/{})",
                            url,
                            info.attempt,
                            info.max_attempts
                        );
                        self.if_live(session, |status| {
                            status.set_retry_info(info.attempt, info.max_attempts);
                            status.set_state(PlaybackState::Reconnecting);
                        });
                        tokio::select! {
                            _ = session.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(config.retry_delay) => {}
                        }
                    }

                    self.if_live(session, |status| {
                        status.set_stream_descriptor(descriptor.clone());
                    });

                    match self.play_stream_url(&url, &descriptor, session).await {
                        Ok(()) => return Ok(()),
                        Err(e) if e.is_cancelled() || session.is_cancelled() => return Ok(()),
                        Err(e) => {
                            tracing::warn!(url = url.as_str(), "Attempt failed: {}", e);
                            machine.on_attempt_failed(&e);
                        }
                    }
                }
                Action::GiveUp { error } => return Err(PlayerError::Exhausted(error)),
            }
        }
    }

    /// One connection attempt
    ///
    /// Returns `Ok(())` once cancelled and an error for anything else,
    /// including a stream that played and then ended.
    async fn play_stream_url(
        &self,
        url: &str,
        descriptor: &StreamDescriptor,
        session: &CancellationToken,
    ) -> Result<(), PlayerError> {
        let inner = &self.inner;
        inner.output.clear();

        let token = session.child_token();
        let (response, icy) =
            open_stream(&inner.client, url, inner.config.response_timeout, &token).await?;
        if let Some(name) = &icy.station_name {
            tracing::info!("Connected to {}", name);
        }
        tracing::debug!(
            url,
            content_type = icy.content_type.as_deref().unwrap_or("unknown"),
            metaint = icy.metaint,
            "Stream opened"
        );

        let tasks = TaskTracker::new();
        let Some(id) = self.register_attempt(&token, &tasks) else {
            return Ok(());
        };

        let (writer, reader) = stream_pipe(PIPE_CAPACITY);
        let (producer, consumer) = frame_queue(inner.config.queue_capacity);
        inner.status.set_queue_level(Some(producer.level()));
        let end = StreamEnd::new();

        let status = inner.status.clone();
        tasks.spawn(pump_stream(
            response.bytes_stream(),
            writer,
            IcyDemuxer::new(icy.metaint),
            PumpContext {
                token: token.clone(),
                end: end.clone(),
                read_timeout: inner.config.read_timeout,
            },
            move |title| status.set_current_track(title),
        ));

        let result = self
            .run_attempt(reader, producer, consumer, descriptor, &token, &tasks, &end)
            .await;
        self.finish_attempt(id, &token, &tasks).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        &self,
        reader: PipeReader,
        producer: FrameProducer,
        consumer: FrameConsumer,
        descriptor: &StreamDescriptor,
        token: &CancellationToken,
        tasks: &TaskTracker,
        end: &StreamEnd,
    ) -> Result<(), PlayerError> {
        let inner = &self.inner;

        let factory = inner.decoders.clone();
        let open_descriptor = descriptor.clone();
        let opening = tasks.spawn_blocking(move || factory.open(reader, &open_descriptor));
        let opened = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            opened = opening => opened
                .map_err(|e| PlayerError::DecodeFailed(format!("decoder task failed: {e}")))?,
        };
        let decoder = match opened {
            Ok(decoder) => decoder,
            // The network side knows better why the decoder saw no data
            Err(e) => match end.reason() {
                Some(EndReason::Failed(message)) => {
                    return Err(PlayerError::ConnectionFailed(message));
                }
                _ => return Err(e),
            },
        };

        let sample_rate = decoder.sample_rate();
        let source = QueueSource::new(
            consumer,
            sample_rate,
            FadeIn::new(sample_rate, inner.config.fade_in),
            token.clone(),
        );
        {
            let token = token.clone();
            let end = end.clone();
            tasks.spawn_blocking(move || decode_and_buffer(decoder, producer, token, end));
        }

        {
            let mut control = inner.control.lock();
            if token.is_cancelled() {
                return Ok(());
            }
            inner.output.set_volume(control.volume);
            inner.output.start(source);
            control.is_playing = true;
            control.is_paused = false;
            control.pause.reset();

            inner.status.set_state(PlaybackState::Playing);
            inner.status.set_retry_info(0, inner.config.max_attempts);
            inner.status.set_sample_rate(sample_rate);
            inner.status.start_session();
            inner.status.set_last_error("");
        }

        tokio::select! {
            _ = token.cancelled() => Ok(()),
            reason = end.wait() => Err(reason.into_error()),
        }
    }

    fn register_attempt(&self, token: &CancellationToken, tasks: &TaskTracker) -> Option<u64> {
        let mut control = self.inner.control.lock();
        if token.is_cancelled() {
            return None;
        }

        control.next_attempt_id += 1;
        let id = control.next_attempt_id;
        let previous = control.active.replace(ActiveAttempt {
            id,
            token: token.clone(),
            tasks: tasks.clone(),
        });
        if let Some(previous) = previous {
            tracing::warn!("Attempt {} replaced attempt {}", id, previous.id);
            previous.token.cancel();
            previous.tasks.close();
        }
        Some(id)
    }

    /// Tear down an attempt that ended on its own
    async fn finish_attempt(&self, id: u64, token: &CancellationToken, tasks: &TaskTracker) {
        token.cancel();
        tasks.close();
        tasks.wait().await;

        let mut control = self.inner.control.lock();
        if control.active.as_ref().is_some_and(|active| active.id == id) {
            control.active = None;
            control.is_playing = false;
            control.is_paused = false;
            self.inner.output.clear();
            self.inner.status.set_queue_level(None);
        }
    }
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::StreamDecoder;
    use crate::audio::decoder::testing::{FailingDecoderFactory, PcmDecoderFactory, pcm_body};
    use crate::audio::events::PlayerEvent;
    use crate::audio::queue::AudioFrame;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records output commands and optionally plays sources like a sink would
    #[derive(Default)]
    struct RecordingOutput {
        drain: bool,
        generation: Arc<AtomicU64>,
        commands: parking_lot::Mutex<Vec<String>>,
        held: parking_lot::Mutex<Option<QueueSource>>,
    }

    impl RecordingOutput {
        fn draining() -> Self {
            Self {
                drain: true,
                ..Self::default()
            }
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().clone()
        }
    }

    impl AudioOutput for RecordingOutput {
        fn start(&self, mut source: QueueSource) {
            self.commands.lock().push("start".to_string());
            let mine = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.drain {
                *self.held.lock() = Some(source);
                return;
            }

            let generation = self.generation.clone();
            std::thread::spawn(move || {
                while generation.load(Ordering::SeqCst) == mine {
                    for _ in 0..512 {
                        source.next();
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            });
        }

        fn clear(&self) {
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.commands.lock().push("clear".to_string());
        }

        fn set_paused(&self, paused: bool) {
            let command = if paused { "pause" } else { "resume" };
            self.commands.lock().push(command.to_string());
        }

        fn set_volume(&self, volume: Volume) {
            self.commands
                .lock()
                .push(format!("volume {:.3}", volume.amplitude()));
        }
    }

    /// Counts frames handed out by the wrapped decoder
    struct CountingDecoderFactory {
        inner: PcmDecoderFactory,
        frames: Arc<AtomicUsize>,
    }

    struct CountingDecoder {
        inner: Box<dyn StreamDecoder>,
        frames: Arc<AtomicUsize>,
    }

    impl DecoderFactory for CountingDecoderFactory {
        fn open(
            &self,
            reader: PipeReader,
            descriptor: &StreamDescriptor,
        ) -> Result<Box<dyn StreamDecoder>, PlayerError> {
            Ok(Box::new(CountingDecoder {
                inner: self.inner.open(reader, descriptor)?,
                frames: self.frames.clone(),
            }))
        }
    }

    impl StreamDecoder for CountingDecoder {
        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn next_frame(&mut self) -> Option<AudioFrame> {
            let frame = self.inner.next_frame()?;
            self.frames.fetch_add(1, Ordering::SeqCst);
            Some(frame)
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            max_attempts: 1,
            retry_delay: Duration::from_millis(20),
            read_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_secs(2),
            ..EngineConfig::default()
        }
    }

    fn pcm_player(config: EngineConfig, output: Arc<RecordingOutput>) -> Player {
        Player::builder(config)
            .output(output)
            .decoder_factory(Arc::new(PcmDecoderFactory {
                sample_rate: 8_000,
            }))
            .build()
            .unwrap()
    }

    async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// New states seen on the event stream, until `last` or a timeout
    async fn states_until(rx: &mut PlayerEventReceiver, last: PlaybackState) -> Vec<PlaybackState> {
        let mut states = Vec::new();
        let collect = async {
            while let Some(event) = rx.recv().await {
                if let PlayerEvent::StateChanged { new, .. } = event {
                    states.push(new);
                    if new == last {
                        break;
                    }
                }
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(5), collect).await;
        states
    }

    #[tokio::test]
    async fn test_station_without_playlists_fails_fast() {
        let output = Arc::new(RecordingOutput::default());
        let player = pcm_player(test_config(), output.clone());
        let station = Station::new("empty", "Empty Station", Vec::new());

        let err = player.play(&station).await.unwrap_err();
        assert!(matches!(err, PlayerError::NoPlaylists(ref title) if title == "Empty Station"));
        assert_eq!(player.state(), PlaybackState::Error);
        assert_eq!(player.last_error(), "No playlists available");
        assert!(!output.commands().contains(&"start".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_not_found_skips_url_without_retrying() {
        let server = MockServer::start().await;
        let playlist = format!("#EXTM3U\n{0}/missing\n{0}/live\n", server.uri());
        mount(&server, "/station.m3u", ResponseTemplate::new(200).set_body_string(playlist)).await;
        mount(&server, "/missing", ResponseTemplate::new(404)).await;
        mount(
            &server,
            "/live",
            ResponseTemplate::new(200).set_body_bytes(pcm_body(400_000)),
        )
        .await;

        let config = EngineConfig {
            max_attempts: 3,
            retry_delay: Duration::from_secs(10),
            ..test_config()
        };
        let player = pcm_player(config, Arc::new(RecordingOutput::draining()));
        let station = Station::from_stream_urls(
            "s",
            "Skip",
            [format!("{}/station.m3u", server.uri())],
        );

        let started = Instant::now();
        let driver = {
            let player = player.clone();
            tokio::spawn(async move { player.play(&station).await })
        };
        wait_until("playing", || player.state() == PlaybackState::Playing).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(player.retry_info().attempt, 0);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(
            requests
                .iter()
                .filter(|r| r.url.path() == "/missing")
                .count(),
            1
        );

        player.stop().await;
        assert!(driver.await.unwrap().is_ok());
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_after_playing_enters_rotation() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/live",
            ResponseTemplate::new(200).set_body_bytes(pcm_body(2_000)),
        )
        .await;

        let player = pcm_player(test_config(), Arc::new(RecordingOutput::draining()));
        let mut events = player.take_event_rx().unwrap();
        let station = Station::from_stream_urls("s", "Drop", [format!("{}/live", server.uri())]);

        let driver = {
            let player = player.clone();
            tokio::spawn(async move { player.play(&station).await })
        };

        let states = states_until(&mut events, PlaybackState::Reconnecting).await;
        assert_eq!(
            states,
            vec![
                PlaybackState::Buffering,
                PlaybackState::Playing,
                PlaybackState::Reconnecting
            ]
        );
        assert_eq!(player.retry_info().attempt, 1);

        player.stop().await;
        assert!(driver.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exhaustion_reports_connection_failed() {
        let server = MockServer::start().await;
        mount(&server, "/a", ResponseTemplate::new(500)).await;
        mount(&server, "/b", ResponseTemplate::new(503)).await;

        let player = pcm_player(test_config(), Arc::new(RecordingOutput::default()));
        let mut events = player.take_event_rx().unwrap();
        let station = Station::from_stream_urls(
            "s",
            "Broken",
            [format!("{}/a", server.uri()), format!("{}/b", server.uri())],
        );

        let err = player.play(&station).await.unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("all streams failed: "), "{message}");
        assert!(message.contains("status 500"));
        assert!(message.contains("status 503"));
        assert_eq!(player.state(), PlaybackState::Error);
        assert_eq!(player.last_error(), "Connection failed");

        let mut retries = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PlayerEvent::Retrying { attempt: 1, max_attempts: 1 }) {
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_decoder_failure_is_retried() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/live",
            ResponseTemplate::new(200).set_body_bytes(pcm_body(1_000)),
        )
        .await;

        let player = Player::builder(test_config())
            .output(Arc::new(RecordingOutput::default()))
            .decoder_factory(Arc::new(FailingDecoderFactory))
            .build()
            .unwrap();
        let station = Station::from_stream_urls("s", "Garbled", [format!("{}/live", server.uri())]);

        let err = player.play(&station).await.unwrap_err();
        assert!(err.to_string().contains("unrecognized format"));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_icy_title_becomes_current_track() {
        let server = MockServer::start().await;
        // 8000 audio bytes per block, the title in the first metadata block
        let mut body = pcm_body(2_000);
        body.push(2);
        let mut meta = b"StreamTitle='X - Y';".to_vec();
        meta.resize(32, 0);
        body.extend(meta);
        for _ in 0..50 {
            body.extend(pcm_body(2_000));
            body.push(0);
        }
        mount(
            &server,
            "/live",
            ResponseTemplate::new(200)
                .insert_header("icy-metaint", "8000")
                .insert_header("icy-name", "Test FM")
                .set_body_bytes(body),
        )
        .await;

        let player = pcm_player(test_config(), Arc::new(RecordingOutput::draining()));
        let station = Station::from_stream_urls("s", "Icy", [format!("{}/live", server.uri())]);
        assert_eq!(player.current_track(), crate::audio::status::WAITING_FOR_TRACK);

        let driver = {
            let player = player.clone();
            tokio::spawn(async move { player.play(&station).await })
        };
        wait_until("stream title", || player.current_track() == "X - Y").await;

        player.stop().await;
        assert!(driver.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_buffer_health_fills_without_consumer() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/live",
            ResponseTemplate::new(200).set_body_bytes(pcm_body(100_000)),
        )
        .await;

        let player = pcm_player(test_config(), Arc::new(RecordingOutput::default()));
        let station = Station::from_stream_urls("s", "Full", [format!("{}/live", server.uri())]);
        let driver = {
            let player = player.clone();
            tokio::spawn(async move { player.play(&station).await })
        };

        wait_until("full buffer", || player.buffer_health() == 100).await;
        assert_eq!(player.stream_descriptor().sample_rate_hz, 8_000);

        player.stop().await;
        assert_eq!(player.buffer_health(), 0);
        assert!(driver.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_attempt_tasks() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/live",
            ResponseTemplate::new(200).set_body_bytes(pcm_body(1_000_000)),
        )
        .await;

        let frames = Arc::new(AtomicUsize::new(0));
        let player = Player::builder(test_config())
            .output(Arc::new(RecordingOutput::draining()))
            .decoder_factory(Arc::new(CountingDecoderFactory {
                inner: PcmDecoderFactory {
                    sample_rate: 8_000,
                },
                frames: frames.clone(),
            }))
            .build()
            .unwrap();
        let station = Station::from_stream_urls("s", "Stop", [format!("{}/live", server.uri())]);
        let driver = {
            let player = player.clone();
            tokio::spawn(async move { player.play(&station).await })
        };

        wait_until("decoding", || frames.load(Ordering::SeqCst) > 20_000).await;
        let level = player.inner.status.queue_level().unwrap();

        player.stop().await;
        let decoded = frames.load(Ordering::SeqCst);
        let queued = level.queued();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(frames.load(Ordering::SeqCst), decoded);
        assert_eq!(level.queued(), queued);
        assert!(!player.is_playing());
        assert_eq!(player.state(), PlaybackState::Idle);
        assert_eq!(player.session_duration(), Duration::ZERO);
        assert!(driver.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_plays_leave_one_session() {
        let server = MockServer::start().await;
        let long = ResponseTemplate::new(200).set_body_bytes(pcm_body(1_000_000));
        mount(&server, "/s0", long.clone()).await;
        mount(&server, "/s1", long.clone().set_delay(Duration::from_millis(300))).await;
        mount(&server, "/s2", long).await;

        let frames = Arc::new(AtomicUsize::new(0));
        let player = Player::builder(test_config())
            .output(Arc::new(RecordingOutput::draining()))
            .decoder_factory(Arc::new(CountingDecoderFactory {
                inner: PcmDecoderFactory {
                    sample_rate: 8_000,
                },
                frames: frames.clone(),
            }))
            .build()
            .unwrap();
        let station = |id: &str, title: &str| {
            Station::from_stream_urls(id, title, [format!("{}/{}", server.uri(), id)])
        };

        let first = {
            let player = player.clone();
            let station = station("s0", "Zero");
            tokio::spawn(async move { player.play(&station).await })
        };
        wait_until("first station", || player.is_playing()).await;

        let switches = {
            let player = player.clone();
            let (one, two) = (station("s1", "One"), station("s2", "Two"));
            tokio::spawn(async move { tokio::join!(player.play(&one), player.play(&two)) })
        };
        wait_until("switched station", || {
            player.is_playing()
                && player
                    .current_station()
                    .is_some_and(|station| station.title != "Zero")
        })
        .await;
        // let the delayed response for the superseded switch arrive
        tokio::time::sleep(Duration::from_millis(400)).await;

        player.stop().await;
        let decoded = frames.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(frames.load(Ordering::SeqCst), decoded);

        let (one, two) = tokio::time::timeout(Duration::from_secs(2), switches)
            .await
            .expect("plays still running after stop")
            .unwrap();
        assert!(one.is_ok());
        assert!(two.is_ok());
        assert!(first.await.unwrap().is_ok());

        let control = player.inner.control.lock();
        assert!(control.active.is_none());
        assert!(control.session.is_none());
        assert!(!control.is_playing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_short_pause_resumes_in_place() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/live",
            ResponseTemplate::new(200).set_body_bytes(pcm_body(400_000)),
        )
        .await;

        let output = Arc::new(RecordingOutput::draining());
        let player = pcm_player(test_config(), output.clone());
        let station = Station::from_stream_urls("s", "Pause", [format!("{}/live", server.uri())]);
        let driver = {
            let player = player.clone();
            tokio::spawn(async move { player.play(&station).await })
        };
        wait_until("playing", || player.state() == PlaybackState::Playing).await;

        player.toggle_pause();
        assert!(player.is_paused());
        assert_eq!(player.state(), PlaybackState::Paused);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(player.playback_delay() >= Duration::from_millis(20));

        player.toggle_pause();
        assert_eq!(player.state(), PlaybackState::Playing);
        let commands = output.commands();
        assert!(commands.contains(&"pause".to_string()));
        assert!(commands.contains(&"resume".to_string()));

        player.stop().await;
        assert!(driver.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_long_pause_reconnects() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/live",
            ResponseTemplate::new(200).set_body_bytes(pcm_body(400_000)),
        )
        .await;

        let config = EngineConfig {
            max_pause: Duration::from_millis(50),
            ..test_config()
        };
        let player = pcm_player(config, Arc::new(RecordingOutput::draining()));
        let mut events = player.take_event_rx().unwrap();
        let station = Station::from_stream_urls("s", "Stale", [format!("{}/live", server.uri())]);
        let driver = {
            let player = player.clone();
            tokio::spawn(async move { player.play(&station).await })
        };
        states_until(&mut events, PlaybackState::Playing).await;

        player.toggle_pause();
        tokio::time::sleep(Duration::from_millis(100)).await;
        player.toggle_pause();

        let states = states_until(&mut events, PlaybackState::Playing).await;
        assert_eq!(states[0], PlaybackState::Paused);
        assert_eq!(states[1], PlaybackState::Reconnecting);
        assert_eq!(states.last(), Some(&PlaybackState::Playing));

        // The superseded driver returns once reconnect stops it
        assert!(driver.await.unwrap().is_ok());
        player.stop().await;
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_toggle_pause_ignored_when_idle() {
        let output = Arc::new(RecordingOutput::default());
        let player = pcm_player(test_config(), output.clone());
        player.toggle_pause();
        assert!(!player.is_paused());
        assert_eq!(player.state(), PlaybackState::Idle);
        assert!(!output.commands().contains(&"pause".to_string()));
    }

    #[tokio::test]
    async fn test_volume_mute_and_adjust() {
        let output = Arc::new(RecordingOutput::default());
        let player = pcm_player(test_config(), output.clone());
        assert_eq!(player.volume(), DEFAULT_VOLUME);

        player.set_volume(50);
        player.toggle_mute();
        assert!(player.is_muted());
        assert_eq!(player.volume(), 50);
        assert_eq!(output.commands().last().unwrap(), "volume 0.000");

        player.toggle_mute();
        assert!(!player.is_muted());
        assert_eq!(player.volume(), 50);

        player.toggle_mute();
        player.adjust_volume(10);
        assert!(!player.is_muted());
        assert_eq!(player.volume(), 60);

        player.adjust_volume(100);
        assert_eq!(player.volume(), 100);
        assert_eq!(output.commands().last().unwrap(), "volume 1.000");

        player.set_volume(0);
        assert!(player.is_muted());
        player.toggle_mute();
        assert_eq!(player.volume(), DEFAULT_VOLUME);
    }

    #[tokio::test]
    async fn test_reconnect_without_station_is_noop() {
        let player = pcm_player(test_config(), Arc::new(RecordingOutput::default()));
        assert!(player.reconnect().await.is_ok());
        assert_eq!(player.state(), PlaybackState::Idle);
    }
}
