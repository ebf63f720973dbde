//! The playback control loop.
//!
//! One thread owns the engine: it waits on track requests, commands, the
//! completion signal and the position ticker, and services one of them per
//! iteration. Shared playback state lives behind the output device's mix
//! lock; lock scopes here stay short because the render callback takes the
//! same lock on every buffer.
//!
//! Unloading always runs the same sequence, whether the track finished on
//! its own, was stopped, or was preempted by a new request: detach the
//! track from the mix first, then take the lock to close the stream, then
//! report. The detach step takes the lock internally, so it must never run
//! with the lock already held.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, never, select, tick, unbounded};
use deck_types::{ArtworkImage, Command, PlayState, Status, TrackInfo};

use crate::art;
use crate::config::EngineConfig;
use crate::meta;
use crate::resample::StreamResampler;
use crate::sink::{ActiveTrack, OutputDevice};
use crate::source::{TrackFormat, TrackStream};

/// Controller states.
///
/// `Loading` and `Finishing` cover the transient work between idle and a
/// loaded track; status events are emitted at the edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Loading,
    Playing,
    Paused,
    Finishing,
}

impl PlayerState {
    /// Whether a track is currently loaded.
    pub fn is_loaded(self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::Paused)
    }
}

/// State reached by toggling play/pause, `None` when nothing is loaded.
fn toggled(state: PlayerState) -> Option<PlayerState> {
    match state {
        PlayerState::Playing => Some(PlayerState::Paused),
        PlayerState::Paused => Some(PlayerState::Playing),
        _ => None,
    }
}

/// Convert a native-domain frame count to a duration rounded to the
/// nearest whole second.
fn frames_to_duration(frames: u64, rate: u32) -> Duration {
    if rate == 0 {
        return Duration::ZERO;
    }
    let rate = u64::from(rate);
    Duration::from_secs((frames + rate / 2) / rate)
}

/// Per-track control-loop resources, discarded when the track unloads.
struct Session {
    done_rx: Receiver<()>,
    ticker: Receiver<Instant>,
    /// Pause state as last reported, for the tick re-sync.
    last_paused: bool,
}

/// One tick's view of the shared state, captured under the mix lock and
/// reported after it is released.
struct TickSnapshot {
    paused: bool,
    position_frames: u64,
    length_frames: Option<u64>,
    rate: u32,
    error: Option<String>,
}

struct PlayerLoop<D: OutputDevice> {
    device: D,
    config: EngineConfig,
    status_tx: Sender<Status>,
    state: PlayerState,
    session: Option<Session>,
}

impl<D: OutputDevice> PlayerLoop<D> {
    fn emit(&self, status: Status) {
        if self.status_tx.send(status).is_err() {
            tracing::debug!("status receiver dropped");
        }
    }

    /// Run until both inbound channels close and no track is loaded.
    fn run(&mut self, track_rx: Receiver<PathBuf>, cmd_rx: Receiver<Command>) {
        let mut track_rx = Some(track_rx);
        let mut cmd_rx = Some(cmd_rx);

        loop {
            if track_rx.is_none() && cmd_rx.is_none() && !self.state.is_loaded() {
                tracing::info!("control channels closed, shutting down");
                return;
            }

            let done_rx = self
                .session
                .as_ref()
                .map(|s| s.done_rx.clone())
                .unwrap_or_else(never);
            let ticker = self
                .session
                .as_ref()
                .map(|s| s.ticker.clone())
                .unwrap_or_else(never);
            let tracks = track_rx.clone().unwrap_or_else(never);
            let cmds = cmd_rx.clone().unwrap_or_else(never);

            // Completion outranks a simultaneously ready command; a track
            // that already ran dry cannot be paused or stopped.
            if done_rx.try_recv().is_ok() {
                self.handle_done();
                continue;
            }

            select! {
                recv(tracks) -> req => match req {
                    Ok(path) => self.handle_request(path),
                    Err(_) => {
                        self.emit(Status::ErrorUpdate {
                            message: "track request channel closed".into(),
                        });
                        track_rx = None;
                    }
                },
                recv(cmds) -> cmd => match cmd {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(_) => {
                        self.emit(Status::ErrorUpdate {
                            message: "command channel closed".into(),
                        });
                        cmd_rx = None;
                    }
                },
                recv(done_rx) -> _ => self.handle_done(),
                recv(ticker) -> _ => self.handle_tick(),
            }
        }
    }

    /// Load and start a new track, preempting any current one.
    fn handle_request(&mut self, path: PathBuf) {
        if self.state.is_loaded() {
            // Same sequence an explicit stop runs, then load the new file.
            self.finish_track();
        }

        self.state = PlayerState::Loading;
        tracing::info!(path = %path.display(), "loading track");

        match self.load_track(&path) {
            Ok(session) => {
                self.session = Some(session);
                self.state = PlayerState::Playing;
                self.emit(Status::PlayStateUpdate {
                    state: PlayState::Playing,
                });
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "load failed: {e:#}");
                self.emit(Status::ErrorUpdate {
                    message: format!("{e:#}"),
                });
                self.session = None;
                self.state = PlayerState::Idle;
            }
        }
    }

    /// Open, probe and register a track with the mix.
    ///
    /// The format gate runs before the file is opened, so an unsupported
    /// extension never touches the filesystem or the device.
    fn load_track(&mut self, path: &Path) -> Result<Session> {
        let format = TrackFormat::from_path(path).ok_or_else(|| {
            anyhow!("Unsupported format: only mp3, flac, ogg and wav are supported")
        })?;

        let mut file =
            File::open(path).with_context(|| format!("open {}", path.display()))?;

        // Tags come from a separate pass over the same handle; a failure
        // here is logged and playback proceeds untagged.
        let tags = match meta::read_tags(&mut file) {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!(path = %path.display(), "tag read failed: {e:#}");
                meta::TrackTags::default()
            }
        };
        let artwork = match art::encode_artwork(&tags.cover) {
            Ok(artwork) => artwork,
            Err(e) => {
                tracing::warn!(path = %path.display(), "artwork decode failed: {e:#}");
                ArtworkImage::default()
            }
        };

        file.seek(SeekFrom::Start(0)).context("rewind after tag read")?;

        let stream = TrackStream::open(file, format)?;

        // The device initializes once, at the first track's rate, and is
        // never re-initialized after that.
        if self.device.sample_rate().is_none() {
            self.device.init(stream.sample_rate())?;
        }
        let device_rate = self
            .device
            .sample_rate()
            .ok_or_else(|| anyhow!("Output device reported no sample rate"))?;

        let resampler = if device_rate != stream.sample_rate() {
            tracing::info!(
                from_hz = stream.sample_rate(),
                to_hz = device_rate,
                "track rate differs from device, resampling"
            );
            Some(StreamResampler::new(
                stream.sample_rate(),
                device_rate,
                stream.channels(),
            )?)
        } else {
            None
        };

        // Metadata goes out only when there is at least a title; consumers
        // fall back to the file name otherwise.
        if !tags.title.is_empty() {
            self.emit(Status::AudioInfoUpdate {
                info: TrackInfo {
                    artist: tags.artist,
                    title: tags.title,
                    album: tags.album,
                    artwork,
                },
            });
        }

        let (done_tx, done_rx) = unbounded();
        let track = ActiveTrack::new(Box::new(stream), resampler, done_tx);
        self.device.mix().lock().set_current(track);

        Ok(Session {
            done_rx,
            ticker: tick(self.config.tick_interval),
            last_paused: false,
        })
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::PlayPause => self.toggle_pause(),
            Command::Stop => {
                if self.state.is_loaded() {
                    tracing::info!("stop requested");
                    self.finish_track();
                }
            }
        }
    }

    fn toggle_pause(&mut self) {
        let Some(next) = toggled(self.state) else {
            return;
        };
        let paused = next == PlayerState::Paused;

        {
            let mut mix = self.device.mix().lock();
            let Some(track) = mix.current_mut() else {
                return;
            };
            track.set_paused(paused);
        }
        if let Some(session) = self.session.as_mut() {
            session.last_paused = paused;
        }
        self.state = next;
        tracing::debug!(paused, "play/pause toggled");

        self.emit(Status::PlayStateUpdate {
            state: if paused {
                PlayState::Paused
            } else {
                PlayState::Playing
            },
        });
    }

    fn handle_done(&mut self) {
        if !self.state.is_loaded() {
            return;
        }
        tracing::info!("track finished");
        self.finish_track();
    }

    /// Unload the current track.
    ///
    /// Natural completion, an explicit stop and preemption all run this
    /// exact sequence: detach, close under the lock, then report the
    /// unloaded state, zeroed position and cleared metadata in that order.
    fn finish_track(&mut self) {
        self.state = PlayerState::Finishing;

        let detached = self.device.mix().clear();
        if let Some(track) = detached {
            let _mix = self.device.mix().lock();
            drop(track);
        }

        self.emit(Status::PlayStateUpdate {
            state: PlayState::NoTrackLoaded,
        });
        self.emit(Status::PositionUpdate {
            position: Duration::ZERO,
            length: Duration::ZERO,
        });
        self.emit(Status::AudioInfoUpdate {
            info: TrackInfo::default(),
        });

        self.session = None;
        self.state = PlayerState::Idle;
    }

    /// Periodic poll: report position, re-sync the pause flag, and check
    /// the stream's sticky error slot.
    fn handle_tick(&mut self) {
        if self.session.is_none() {
            return;
        }

        let snapshot = {
            let mix = self.device.mix().lock();
            match mix.current() {
                Some(track) => TickSnapshot {
                    paused: track.paused(),
                    position_frames: track.stream().position_frames(),
                    length_frames: track.stream().length_frames(),
                    rate: track.stream().sample_rate(),
                    error: track.stream().error().map(|e| format!("{e:#}")),
                },
                None => return,
            }
        };

        if !snapshot.paused {
            self.emit(Status::PositionUpdate {
                position: frames_to_duration(snapshot.position_frames, snapshot.rate),
                length: frames_to_duration(
                    snapshot.length_frames.unwrap_or(0),
                    snapshot.rate,
                ),
            });
        }

        let last_paused = self.session.as_ref().is_some_and(|s| s.last_paused);
        if snapshot.paused != last_paused {
            if let Some(session) = self.session.as_mut() {
                session.last_paused = snapshot.paused;
            }
            self.state = if snapshot.paused {
                PlayerState::Paused
            } else {
                PlayerState::Playing
            };
            self.emit(Status::PlayStateUpdate {
                state: if snapshot.paused {
                    PlayState::Paused
                } else {
                    PlayState::Playing
                },
            });
        }

        if let Some(cause) = snapshot.error {
            // A decode error ends the track quietly: the cause goes to the
            // log, the status channel only learns the track unloaded.
            tracing::warn!("decode error, unloading track: {cause}");
            {
                let mut mix = self.device.mix().lock();
                drop(mix.take_current());
            }
            self.emit(Status::PlayStateUpdate {
                state: PlayState::NoTrackLoaded,
            });
            self.session = None;
            self.state = PlayerState::Idle;
        }
    }
}

/// Handles for driving a running engine.
pub struct PlayerHandle {
    track_tx: Sender<PathBuf>,
    cmd_tx: Sender<Command>,
    status_rx: Receiver<Status>,
    join: std::thread::JoinHandle<()>,
}

impl PlayerHandle {
    /// Queue a file for playback, preempting the current track.
    pub fn request_track(&self, path: PathBuf) -> Result<()> {
        self.track_tx
            .send(path)
            .map_err(|_| anyhow!("Engine stopped"))
    }

    /// Send a playback command.
    pub fn command(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| anyhow!("Engine stopped"))
    }

    /// Clone of the command sender, for signal handlers.
    pub fn command_sender(&self) -> Sender<Command> {
        self.cmd_tx.clone()
    }

    /// The status event stream.
    pub fn status(&self) -> &Receiver<Status> {
        &self.status_rx
    }

    /// Stop playback, close the control channels and join the loop.
    pub fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Stop);
        drop(self.track_tx);
        drop(self.cmd_tx);
        drop(self.status_rx);
        if self.join.join().is_err() {
            tracing::error!("player thread panicked");
        }
    }
}

/// Spawn the engine on its own thread.
///
/// The output device is injected, so callers choose the sink; use
/// [`crate::sink::CpalOutput`] for real hardware.
pub fn spawn_player<D: OutputDevice + 'static>(device: D, config: EngineConfig) -> PlayerHandle {
    let (track_tx, track_rx) = unbounded();
    let (cmd_tx, cmd_rx) = unbounded();
    let (status_tx, status_rx) = unbounded();

    let join = std::thread::spawn(move || {
        let mut player = PlayerLoop {
            device,
            config,
            status_tx,
            state: PlayerState::Idle,
            session: None,
        };
        player.run(track_rx, cmd_rx);
    });

    PlayerHandle {
        track_tx,
        cmd_tx,
        status_rx,
        join,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SharedMix;
    use crate::testutil::{ScriptedStream, temp_path, write_wav};
    use std::sync::{Arc, Mutex};

    struct FakeState {
        rate: Option<u32>,
        inits: u32,
    }

    /// Output device for tests: records the init rate and shares the mix
    /// so tests can drive the render side by hand.
    #[derive(Clone)]
    struct FakeOutput {
        mix: SharedMix,
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeOutput {
        fn new() -> Self {
            Self {
                mix: SharedMix::new(),
                state: Arc::new(Mutex::new(FakeState {
                    rate: None,
                    inits: 0,
                })),
            }
        }
    }

    impl OutputDevice for FakeOutput {
        fn mix(&self) -> &SharedMix {
            &self.mix
        }

        fn init(&mut self, sample_rate: u32) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.inits += 1;
            state.rate = Some(sample_rate);
            Ok(())
        }

        fn sample_rate(&self) -> Option<u32> {
            self.state.lock().unwrap().rate
        }
    }

    fn spawn_test_player() -> (PlayerHandle, SharedMix, Arc<Mutex<FakeState>>) {
        let device = FakeOutput::new();
        let mix = device.mix.clone();
        let state = device.state.clone();
        let config = EngineConfig {
            tick_interval: Duration::from_millis(40),
        };
        (spawn_player(device, config), mix, state)
    }

    fn next_status(rx: &Receiver<Status>) -> Status {
        rx.recv_timeout(Duration::from_secs(2)).expect("status event")
    }

    /// Render `frames` stereo frames from the mix, as the device would.
    fn pump(mix: &SharedMix, frames: usize) -> usize {
        let mut out = vec![0.0f32; frames * 2];
        mix.lock().render(&mut out)
    }

    fn wait_for_play_state(rx: &Receiver<Status>) -> PlayState {
        loop {
            match next_status(rx) {
                Status::PlayStateUpdate { state } => return state,
                Status::PositionUpdate { .. } => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    /// Assert the full unload sequence, skipping in-flight position
    /// reports from before the unload (their length is nonzero).
    fn assert_cleanup_sequence(rx: &Receiver<Status>) {
        let first = loop {
            match next_status(rx) {
                Status::PositionUpdate { length, .. } if length > Duration::ZERO => continue,
                other => break other,
            }
        };
        assert!(
            matches!(
                first,
                Status::PlayStateUpdate {
                    state: PlayState::NoTrackLoaded
                }
            ),
            "expected unload first, got {first:?}"
        );
        match next_status(rx) {
            Status::PositionUpdate { position, length } => {
                assert_eq!(position, Duration::ZERO);
                assert_eq!(length, Duration::ZERO);
            }
            other => panic!("expected zeroed position, got {other:?}"),
        }
        match next_status(rx) {
            Status::AudioInfoUpdate { info } => assert_eq!(info, TrackInfo::default()),
            other => panic!("expected cleared info, got {other:?}"),
        }
    }

    #[test]
    fn toggled_maps_only_loaded_states() {
        assert_eq!(toggled(PlayerState::Playing), Some(PlayerState::Paused));
        assert_eq!(toggled(PlayerState::Paused), Some(PlayerState::Playing));
        assert_eq!(toggled(PlayerState::Idle), None);
        assert_eq!(toggled(PlayerState::Loading), None);
        assert_eq!(toggled(PlayerState::Finishing), None);
    }

    #[test]
    fn frames_round_to_nearest_second() {
        assert_eq!(frames_to_duration(0, 8_000), Duration::ZERO);
        assert_eq!(frames_to_duration(3_999, 8_000), Duration::ZERO);
        assert_eq!(frames_to_duration(4_000, 8_000), Duration::from_secs(1));
        assert_eq!(frames_to_duration(8_000, 8_000), Duration::from_secs(1));
        assert_eq!(frames_to_duration(100, 0), Duration::ZERO);
    }

    #[test]
    fn unsupported_extension_is_rejected_before_open() {
        let (player, _mix, state) = spawn_test_player();

        // The path does not exist; the extension gate must fire first.
        player.request_track(PathBuf::from("playlist.m4a")).unwrap();

        match next_status(player.status()) {
            Status::ErrorUpdate { message } => {
                assert!(message.contains("mp3"), "{message}");
                assert!(message.contains("wav"), "{message}");
            }
            other => panic!("expected error update, got {other:?}"),
        }
        assert!(
            player
                .status()
                .recv_timeout(Duration::from_millis(150))
                .is_err()
        );
        assert_eq!(state.lock().unwrap().inits, 0);

        player.shutdown();
    }

    #[test]
    fn missing_file_reports_error_and_stays_idle() {
        let (player, mix, state) = spawn_test_player();

        player
            .request_track(PathBuf::from("/nonexistent/void.wav"))
            .unwrap();

        assert!(matches!(
            next_status(player.status()),
            Status::ErrorUpdate { .. }
        ));
        assert_eq!(state.lock().unwrap().inits, 0);
        assert!(mix.lock().current().is_none());

        player.shutdown();
    }

    #[test]
    fn untagged_track_starts_with_play_state_only() {
        let path = temp_path("plain.wav");
        write_wav(&path, 8_000, 1, 8_000, None);
        let (player, _mix, state) = spawn_test_player();

        player.request_track(path.clone()).unwrap();

        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));
        assert_eq!(state.lock().unwrap().rate, Some(8_000));

        player.shutdown();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn tagged_track_reports_info_before_playing() {
        let path = temp_path("tagged.wav");
        write_wav(&path, 8_000, 1, 8_000, Some("Night Drive"));
        let (player, _mix, _state) = spawn_test_player();

        player.request_track(path.clone()).unwrap();

        match next_status(player.status()) {
            Status::AudioInfoUpdate { info } => {
                assert_eq!(info.title, "Night Drive");
                assert_eq!(info.artist, "Test Artist");
                assert_eq!(info.album, "Test Album");
                assert!(info.artwork.is_empty());
            }
            other => panic!("expected audio info first, got {other:?}"),
        }
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));

        player.shutdown();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn position_ticks_report_rendered_seconds() {
        let path = temp_path("basic.wav");
        write_wav(&path, 8_000, 1, 16_000, None); // two seconds
        let (player, mix, _state) = spawn_test_player();

        player.request_track(path.clone()).unwrap();
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));

        // Render one second of audio, then wait for a tick reporting it.
        for _ in 0..16 {
            pump(&mix, 500);
        }
        loop {
            match next_status(player.status()) {
                Status::PositionUpdate { position, length } => {
                    assert_eq!(length, Duration::from_secs(2));
                    if position >= Duration::from_secs(1) {
                        break;
                    }
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }

        player.shutdown();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn play_pause_toggles_and_mutes_position_reports() {
        let path = temp_path("toggle.wav");
        write_wav(&path, 8_000, 1, 80_000, None);
        let (player, _mix, _state) = spawn_test_player();

        player.request_track(path.clone()).unwrap();
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));

        player.command(Command::PlayPause).unwrap();
        assert_eq!(wait_for_play_state(player.status()), PlayState::Paused);

        // Paused ticks carry no position reports.
        assert!(
            player
                .status()
                .recv_timeout(Duration::from_millis(200))
                .is_err()
        );

        player.command(Command::PlayPause).unwrap();
        assert_eq!(wait_for_play_state(player.status()), PlayState::Playing);

        player.shutdown();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn ticker_resyncs_an_externally_flipped_pause_flag() {
        let path = temp_path("resync.wav");
        write_wav(&path, 8_000, 1, 80_000, None);
        let (player, mix, _state) = spawn_test_player();

        player.request_track(path.clone()).unwrap();
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));

        // Flip the flag directly under the lock, bypassing the command
        // path entirely.
        {
            let mut guard = mix.lock();
            guard.current_mut().expect("track loaded").set_paused(true);
        }

        // The next tick notices the drift and re-syncs the reported state.
        assert_eq!(wait_for_play_state(player.status()), PlayState::Paused);

        // Once re-synced, paused ticks go back to reporting nothing.
        assert!(
            player
                .status()
                .recv_timeout(Duration::from_millis(200))
                .is_err()
        );

        player.shutdown();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn stop_unloads_with_the_cleanup_sequence() {
        let path = temp_path("stop.wav");
        write_wav(&path, 8_000, 1, 80_000, None);
        let (player, mix, _state) = spawn_test_player();

        player.request_track(path.clone()).unwrap();
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));

        player.command(Command::Stop).unwrap();
        assert_cleanup_sequence(player.status());
        assert!(mix.lock().current().is_none());

        player.shutdown();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn stop_while_paused_runs_the_same_cleanup_sequence() {
        let path = temp_path("stop-paused.wav");
        write_wav(&path, 8_000, 1, 80_000, None);
        let (player, mix, _state) = spawn_test_player();

        player.request_track(path.clone()).unwrap();
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));

        player.command(Command::PlayPause).unwrap();
        assert_eq!(wait_for_play_state(player.status()), PlayState::Paused);

        player.command(Command::Stop).unwrap();
        assert_cleanup_sequence(player.status());
        assert!(mix.lock().current().is_none());

        player.shutdown();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn natural_completion_matches_stop_sequence() {
        let path = temp_path("short.wav");
        write_wav(&path, 8_000, 1, 4_800, None);
        let (player, mix, _state) = spawn_test_player();

        player.request_track(path.clone()).unwrap();
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));

        // Drive the render side until the track runs dry.
        for _ in 0..20 {
            pump(&mix, 256);
        }

        assert_cleanup_sequence(player.status());
        assert!(mix.lock().current().is_none());

        player.shutdown();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn new_request_preempts_current_track() {
        let first = temp_path("first.wav");
        let second = temp_path("second.wav");
        write_wav(&first, 8_000, 1, 80_000, None);
        write_wav(&second, 8_000, 1, 80_000, None);
        let (player, _mix, state) = spawn_test_player();

        player.request_track(first.clone()).unwrap();
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));

        player.request_track(second.clone()).unwrap();
        assert_cleanup_sequence(player.status());
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));
        assert_eq!(state.lock().unwrap().inits, 1);

        player.shutdown();
        std::fs::remove_file(&first).ok();
        std::fs::remove_file(&second).ok();
    }

    #[test]
    fn device_rate_is_fixed_by_the_first_track() {
        let first = temp_path("rate-a.wav");
        let second = temp_path("rate-b.wav");
        write_wav(&first, 8_000, 1, 8_000, None);
        write_wav(&second, 16_000, 1, 32_000, None); // two seconds at 16 kHz
        let (player, mix, state) = spawn_test_player();

        player.request_track(first.clone()).unwrap();
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));
        assert_eq!(state.lock().unwrap().rate, Some(8_000));

        player.request_track(second.clone()).unwrap();
        assert_cleanup_sequence(player.status());
        assert!(matches!(
            next_status(player.status()),
            Status::PlayStateUpdate {
                state: PlayState::Playing
            }
        ));

        // Still the first track's rate: one init, ever.
        {
            let fake = state.lock().unwrap();
            assert_eq!(fake.rate, Some(8_000));
            assert_eq!(fake.inits, 1);
        }

        // Drive half of the second track through the resampler and wait
        // for a position report in its native 16 kHz domain.
        while mix
            .lock()
            .current()
            .map(|t| t.stream().position_frames())
            .unwrap_or(u64::MAX)
            < 16_000
        {
            pump(&mix, 512);
        }
        loop {
            match next_status(player.status()) {
                Status::PositionUpdate { position, length } => {
                    assert_eq!(length, Duration::from_secs(2));
                    if position >= Duration::from_secs(1) {
                        break;
                    }
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }

        player.shutdown();
        std::fs::remove_file(&first).ok();
        std::fs::remove_file(&second).ok();
    }

    #[test]
    fn commands_without_a_track_are_ignored() {
        let (player, _mix, _state) = spawn_test_player();

        player.command(Command::PlayPause).unwrap();
        player.command(Command::Stop).unwrap();

        assert!(
            player
                .status()
                .recv_timeout(Duration::from_millis(150))
                .is_err()
        );

        player.shutdown();
    }

    #[test]
    fn sticky_decode_error_unloads_quietly() {
        let device = FakeOutput::new();
        let mix = device.mix.clone();
        let (status_tx, status_rx) = unbounded();
        let (_done_tx_unused, done_rx) = unbounded::<()>();
        let mut player = PlayerLoop {
            device,
            config: EngineConfig::default(),
            status_tx,
            state: PlayerState::Playing,
            session: Some(Session {
                done_rx,
                ticker: tick(Duration::from_secs(1)),
                last_paused: false,
            }),
        };

        let (done_tx, _done_rx) = unbounded();
        mix.lock().set_current(ActiveTrack::new(
            Box::new(ScriptedStream::with_error(8_000, 2, "decode exploded")),
            None,
            done_tx,
        ));

        player.handle_tick();

        // The tick still reports position, then quietly unloads: no zeroed
        // position, no cleared metadata, no error on the status channel.
        assert!(matches!(
            status_rx.try_recv(),
            Ok(Status::PositionUpdate { .. })
        ));
        assert!(matches!(
            status_rx.try_recv(),
            Ok(Status::PlayStateUpdate {
                state: PlayState::NoTrackLoaded
            })
        ));
        assert!(status_rx.try_recv().is_err());
        assert_eq!(player.state, PlayerState::Idle);
        assert!(player.session.is_none());
        assert!(mix.lock().current().is_none());
    }
}
