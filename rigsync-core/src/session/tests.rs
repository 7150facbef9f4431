use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::actor::{InFlight, Outcome, SessionActor, Tagged};
use super::machine::SyncSession;
use super::*;
use crate::codec::{Animation, AnimationCodec, JsonCodec, Keyframe, SinkError};
use crate::fingerprint::Fingerprint;
use crate::notify::{RecordingNotifier, Severity};
use crate::transport::{AnimationStatus, BoneRest, TransportError};

// ----------------------------------------------------------------------
// Fakes
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Call {
    List,
    Import(String),
    Export(Option<String>),
    Status(String, Option<Fingerprint>),
    BoneRest(String),
}

#[derive(Default)]
struct FakeState {
    armatures: Vec<String>,
    unreachable: bool,
    list_failures: usize,
    server_hash: Option<Fingerprint>,
    imports: VecDeque<Result<Vec<u8>, TransportError>>,
    exports: VecDeque<Result<(), TransportError>>,
    latency: Duration,
    status_latency: Duration,
    calls: Vec<Call>,
    active: usize,
    max_active: usize,
}

/// Scripted in-memory server.
#[derive(Clone, Default)]
struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    fn new(armatures: &[&str]) -> Self {
        let fake = Self::default();
        fake.lock().armatures = armatures.iter().map(|s| s.to_string()).collect();
        fake
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    fn fail_next_lists(&self, count: usize) {
        self.lock().list_failures = count;
    }

    fn set_hash(&self, hash: Option<&str>) {
        self.lock().server_hash = hash.map(Fingerprint::new);
    }

    fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    fn set_status_latency(&self, latency: Duration) {
        self.lock().status_latency = latency;
    }

    fn push_import(&self, result: Result<Vec<u8>, TransportError>) {
        self.lock().imports.push_back(result);
    }

    fn push_export(&self, result: Result<(), TransportError>) {
        self.lock().exports.push_back(result);
    }

    fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn max_active(&self) -> usize {
        self.lock().max_active
    }

    /// Records a slow call and returns how long it should take.
    fn begin(&self, call: Call) -> (Duration, ActiveGuard) {
        let mut state = self.lock();
        state.calls.push(call);
        state.active += 1;
        state.max_active = state.max_active.max(state.active);
        let latency = if matches!(state.calls.last(), Some(Call::Status(..))) {
            state.status_latency
        } else {
            state.latency
        };
        (latency, ActiveGuard(self.state.clone()))
    }

    fn unreachable_error() -> TransportError {
        TransportError::Transport("connection refused".to_string())
    }
}

/// Decrements the active counter even when the request is dropped mid-way.
struct ActiveGuard(Arc<Mutex<FakeState>>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.active -= 1;
        }
    }
}

impl Transport for FakeTransport {
    async fn list_armatures(&self, _port: u16) -> Result<Vec<String>, TransportError> {
        let mut state = self.lock();
        state.calls.push(Call::List);
        if state.unreachable {
            return Err(Self::unreachable_error());
        }
        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(Self::unreachable_error());
        }
        Ok(state.armatures.clone())
    }

    async fn import_animation(&self, _port: u16, armature: &str) -> Result<Vec<u8>, TransportError> {
        let (latency, _guard) = self.begin(Call::Import(armature.to_string()));
        tokio::time::sleep(latency).await;

        let mut state = self.lock();
        if state.unreachable {
            return Err(Self::unreachable_error());
        }
        state
            .imports
            .pop_front()
            .unwrap_or_else(|| Ok(walk_bytes()))
    }

    async fn export_animation(
        &self,
        _port: u16,
        _payload: Vec<u8>,
        target: Option<&str>,
    ) -> Result<(), TransportError> {
        let (latency, _guard) = self.begin(Call::Export(target.map(str::to_string)));
        tokio::time::sleep(latency).await;

        let mut state = self.lock();
        if state.unreachable {
            return Err(Self::unreachable_error());
        }
        state.exports.pop_front().unwrap_or(Ok(()))
    }

    async fn check_animation_status(
        &self,
        _port: u16,
        armature: &str,
        last_known: Option<&Fingerprint>,
    ) -> Option<AnimationStatus> {
        let (latency, _guard) = self.begin(Call::Status(armature.to_string(), last_known.cloned()));
        tokio::time::sleep(latency).await;

        let state = self.lock();
        if state.unreachable {
            return None;
        }
        let hash = state.server_hash.clone()?;
        let changed = last_known != Some(&hash);
        Some(AnimationStatus::new(changed, hash))
    }

    async fn get_bone_rest(&self, _port: u16, armature: &str) -> Result<BoneRest, TransportError> {
        self.lock().calls.push(Call::BoneRest(armature.to_string()));
        Ok(BoneRest::new())
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    applied: Arc<Mutex<Vec<(String, Animation)>>>,
    reject: Option<String>,
}

impl RecordingSink {
    fn rejecting(message: &str) -> Self {
        Self {
            reject: Some(message.to_string()),
            ..Default::default()
        }
    }

    fn applied(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|(armature, _)| armature.clone())
            .collect()
    }
}

impl AnimationSink<Animation> for RecordingSink {
    fn apply(&mut self, armature: &str, animation: Animation) -> Result<(), SinkError> {
        if let Some(message) = &self.reject {
            return Err(SinkError(message.clone()));
        }
        self.applied
            .lock()
            .unwrap()
            .push((armature.to_string(), animation));
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

fn walk() -> Animation {
    let mut anim = Animation::new("Walk", 24.0, 1, 12);
    anim.bones.insert(
        "Hips".to_string(),
        vec![Keyframe {
            frame: 1.0,
            location: Some([0.0, 0.0, 1.0]),
            rotation: None,
            scale: None,
        }],
    );
    anim
}

fn walk_bytes() -> Vec<u8> {
    JsonCodec.encode(&walk()).unwrap()
}

struct Harness {
    session: Session<Animation>,
    fake: FakeTransport,
    sink: RecordingSink,
    notifier: RecordingNotifier,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start(fake: FakeTransport) -> Self {
        Self::with(fake, RecordingSink::default(), SessionSettings::default())
    }

    fn with(fake: FakeTransport, sink: RecordingSink, settings: SessionSettings) -> Self {
        let notifier = RecordingNotifier::new();
        let (session, handle) = Session::spawn(
            fake.clone(),
            JsonCodec,
            sink.clone(),
            Arc::new(notifier.clone()),
            settings,
        );
        Self {
            session,
            fake,
            sink,
            notifier,
            handle,
        }
    }

    fn warnings(&self) -> Vec<String> {
        self.notifier.with_severity(Severity::Warning)
    }

    async fn connected(fake: FakeTransport) -> Self {
        let h = Self::start(fake);
        h.session.connect_and_wait().await.unwrap();
        h
    }

    async fn live(fake: FakeTransport) -> Self {
        let h = Self::start(fake);
        h.session.select_armature(Some("Rig".to_string())).unwrap();
        h.session.set_live_sync(true).unwrap();
        h
    }

    async fn wait_until(&self, pred: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
        let mut rx = self.session.watch();
        tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                {
                    let status = rx.borrow_and_update();
                    if pred(&status) {
                        return status.clone();
                    }
                }
                rx.changed().await.expect("session closed");
            }
        })
        .await
        .expect("timed out waiting for session status")
    }
}

fn drain(sub: &mut Subscription) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Some(event) = sub.try_next() {
        events.push(event);
    }
    events
}

// ----------------------------------------------------------------------
// Connection lifecycle
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_connect_lists_armatures() {
    let h = Harness::start(FakeTransport::new(&["Rig", "Hero"]));
    let mut sub = h.session.subscribe();

    let status = h.session.connect_and_wait().await.unwrap();

    assert_eq!(status.state, SessionState::Connected);
    assert_eq!(status.armatures, vec!["Rig", "Hero"]);
    assert_eq!(status.attempts, 0);
    assert_eq!(h.fake.calls(), vec![Call::List]);
    assert_eq!(
        drain(&mut sub),
        vec![
            SessionEvent::StateChanged {
                from: SessionState::Disconnected,
                to: SessionState::Connecting,
            },
            SessionEvent::StateChanged {
                from: SessionState::Connecting,
                to: SessionState::Connected,
            },
            SessionEvent::ArmaturesListed(vec!["Rig".to_string(), "Hero".to_string()]),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_when_already_connected_returns_immediately() {
    let h = Harness::connected(FakeTransport::new(&["Rig"])).await;
    let status = h.session.connect_and_wait().await.unwrap();
    assert_eq!(status.state, SessionState::Connected);
    assert_eq!(h.fake.count(|c| *c == Call::List), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auto_connect_on_start() {
    let settings = SessionSettings {
        auto_connect: true,
        ..Default::default()
    };
    let h = Harness::with(FakeTransport::new(&["Rig"]), RecordingSink::default(), settings);
    let status = h.wait_until(|s| s.state == SessionState::Connected).await;
    assert_eq!(status.armatures, vec!["Rig"]);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_server_exhausts_budget_once() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_unreachable(true);
    let h = Harness::start(fake);
    let mut sub = h.session.subscribe();

    let err = h.session.connect_and_wait().await.unwrap_err();
    assert_eq!(err, SyncError::Exhausted { attempts: 3 });
    assert_eq!(h.fake.count(|c| *c == Call::List), 3);

    let status = h.session.status();
    assert_eq!(status.state, SessionState::Disconnected);
    assert!(status.exhausted);
    assert_eq!(h.warnings().len(), 1);
    assert!(h.warnings()[0].contains("31337"));

    // Further connect requests are ignored until the budget is reset.
    h.session.toggle_server_connection().unwrap();
    h.session.connect().unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(h.fake.count(|c| *c == Call::List), 3);
    assert_eq!(h.warnings().len(), 1);
    let exhausted = drain(&mut sub)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::ReconnectExhausted { .. }))
        .count();
    assert_eq!(exhausted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_allows_reconnecting() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_unreachable(true);
    let h = Harness::start(fake);
    h.session.connect_and_wait().await.unwrap_err();

    h.fake.set_unreachable(false);
    h.session.reset().unwrap();
    let status = h.session.connect_and_wait().await.unwrap();

    assert_eq!(status.state, SessionState::Connected);
    assert_eq!(status.attempts, 0);
    assert!(!status.exhausted);
    assert_eq!(h.fake.count(|c| *c == Call::List), 4);
}

#[tokio::test(start_paused = true)]
async fn test_connection_recovers_after_backoff() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.fail_next_lists(1);
    let h = Harness::start(fake);

    let started = tokio::time::Instant::now();
    let status = h.session.connect_and_wait().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1_000));
    assert_eq!(status.state, SessionState::Connected);
    assert_eq!(status.attempts, 0);
    assert_eq!(status.last_error, None);
    assert_eq!(h.fake.count(|c| *c == Call::List), 2);
    assert!(h.warnings().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_toggle_disconnects_connected_session() {
    let h = Harness::connected(FakeTransport::new(&["Rig"])).await;
    let epoch = h.session.status().epoch;

    h.session.toggle_server_connection().unwrap();
    let status = h.wait_until(|s| s.state == SessionState::Disconnected).await;

    assert_ne!(status.epoch, epoch);
    assert!(status.armatures.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_fails_waiters() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_unreachable(true);
    let h = Harness::start(fake);

    let session = h.session.clone();
    let waiter = tokio::spawn(async move { session.connect_and_wait().await });
    h.wait_until(|s| s.state == SessionState::Error).await;
    h.session.disconnect().unwrap();

    assert_eq!(waiter.await.unwrap(), Err(SyncError::Cancelled));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.fake.count(|c| *c == Call::List), 1);
}

#[tokio::test(start_paused = true)]
async fn test_port_change_tears_down() {
    let h = Harness::connected(FakeTransport::new(&["Rig"])).await;

    h.session.set_port(4000).unwrap();
    let status = h
        .wait_until(|s| s.port == 4000 && s.state == SessionState::Disconnected)
        .await;
    assert!(status.armatures.is_empty());
}

// ----------------------------------------------------------------------
// Live sync
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_live_sync_follows_hash_changes() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_hash(Some("h1"));
    let h = Harness::live(fake).await;

    h.wait_until(|s| s.fingerprint == Some(Fingerprint::new("h1")))
        .await;
    assert_eq!(h.sink.applied(), vec!["Rig"]);

    h.fake.set_hash(Some("h2"));
    h.wait_until(|s| s.fingerprint == Some(Fingerprint::new("h2")))
        .await;
    assert_eq!(h.sink.applied(), vec!["Rig", "Rig"]);

    // Unchanged status does not re-import.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.sink.applied().len(), 2);
    assert_eq!(h.fake.count(|c| matches!(c, Call::Import(_))), 2);
    assert!(h.fake.calls().contains(&Call::Status(
        "Rig".to_string(),
        Some(Fingerprint::new("h1"))
    )));
    assert_eq!(h.session.status().state, SessionState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_is_silent() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_hash(None);
    let h = Harness::live(fake).await;

    h.wait_until(|s| s.state == SessionState::Polling).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(h.fake.count(|c| matches!(c, Call::Status(..))) >= 5);
    assert_eq!(h.fake.count(|c| matches!(c, Call::Import(_))), 0);
    assert!(h.warnings().is_empty());
    assert_eq!(h.session.status().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_slow_poll_never_overlaps_next_tick() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_hash(None);
    fake.set_status_latency(Duration::from_secs(3));
    let h = Harness::live(fake).await;

    h.wait_until(|s| s.state == SessionState::Polling).await;
    tokio::time::sleep(Duration::from_secs(20)).await;

    let polls = h.fake.count(|c| matches!(c, Call::Status(..)));
    assert!(polls >= 4, "expected several polls, got {}", polls);
    // 20 s at 3 s per poll plus 500 ms spacing leaves no room for overlap.
    assert!(polls <= 7, "polls overlapped: {}", polls);
    assert_eq!(h.fake.max_active(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_seeded_live_sync_connects_and_polls() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_hash(Some("h1"));
    let settings = SessionSettings {
        live_sync_enabled: true,
        ..Default::default()
    };
    let h = Harness::with(fake, RecordingSink::default(), settings);

    // Seeding alone does not connect; enabling live sync does.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.fake.count(|c| *c == Call::List), 0);

    h.session.select_armature(Some("Rig".to_string())).unwrap();
    h.session.set_live_sync(true).unwrap();

    let synced = h
        .wait_until(|s| s.fingerprint == Some(Fingerprint::new("h1")))
        .await;
    assert!(synced.live_sync);
    assert_eq!(h.fake.count(|c| *c == Call::List), 1);
    assert_eq!(h.sink.applied(), vec!["Rig"]);
}

#[tokio::test(start_paused = true)]
async fn test_live_sync_failure_is_reported_and_retried() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_hash(Some("h1"));
    fake.push_import(Err(TransportError::ServerRejected {
        status: 500,
        message: "Rig is busy".to_string(),
    }));
    let h = Harness::live(fake).await;

    let failed = h.wait_until(|s| s.last_error.is_some()).await;
    assert_eq!(failed.fingerprint, None);
    assert!(h.warnings().iter().any(|w| w.contains("Rig is busy")));

    let synced = h
        .wait_until(|s| s.fingerprint == Some(Fingerprint::new("h1")))
        .await;
    assert_eq!(synced.last_error, None);
    assert_eq!(h.sink.applied(), vec!["Rig"]);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_payload_keeps_fingerprint() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_hash(Some("h1"));
    fake.push_import(Ok(b"{not json".to_vec()));
    let h = Harness::live(fake).await;

    let failed = h.wait_until(|s| s.last_error.is_some()).await;
    assert_eq!(failed.fingerprint, None);
    assert!(h.sink.applied().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disabling_live_sync_resets_session() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_hash(Some("h1"));
    let h = Harness::live(fake).await;
    h.wait_until(|s| s.fingerprint.is_some()).await;

    h.session.set_live_sync(false).unwrap();
    let status = h.wait_until(|s| s.state == SessionState::Disconnected).await;

    assert!(!status.live_sync);
    assert_eq!(status.fingerprint, None);
    assert_eq!(status.armature.as_deref(), Some("Rig"));

    let polls = h.fake.count(|c| matches!(c, Call::Status(..)));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.fake.count(|c| matches!(c, Call::Status(..))), polls);
}

#[tokio::test(start_paused = true)]
async fn test_deselecting_armature_resets_session() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_hash(Some("h1"));
    let h = Harness::live(fake).await;
    let synced = h.wait_until(|s| s.fingerprint.is_some()).await;

    h.session.select_armature(None).unwrap();
    let status = h.wait_until(|s| s.state == SessionState::Disconnected).await;

    assert_eq!(status.armature, None);
    assert_eq!(status.fingerprint, None);
    assert_ne!(status.epoch, synced.epoch);
}

#[tokio::test(start_paused = true)]
async fn test_switching_armature_keeps_connection() {
    let fake = FakeTransport::new(&["Rig", "Hero"]);
    fake.set_hash(Some("h1"));
    let h = Harness::live(fake).await;
    h.wait_until(|s| s.fingerprint.is_some()).await;

    h.session.select_armature(Some("Hero".to_string())).unwrap();
    h.wait_until(|s| s.armature.as_deref() == Some("Hero") && s.fingerprint.is_some())
        .await;

    assert_eq!(h.sink.applied(), vec!["Rig", "Hero"]);
    assert_eq!(h.fake.count(|c| *c == Call::List), 1);
    assert!(h
        .fake
        .calls()
        .contains(&Call::Status("Hero".to_string(), None)));
}

// ----------------------------------------------------------------------
// Manual import/export
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_manual_ops_require_connection() {
    let h = Harness::start(FakeTransport::new(&["Rig"]));

    assert_eq!(
        h.session.export_now(walk(), Some("Rig".to_string())).await,
        Err(SyncError::NotConnected)
    );
    assert_eq!(h.session.import_now().await, Err(SyncError::NoArmature));

    h.session.select_armature(Some("Rig".to_string())).unwrap();
    assert_eq!(h.session.import_now().await, Err(SyncError::NotConnected));
    assert!(h.fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_import_now_applies_animation() {
    let h = Harness::connected(FakeTransport::new(&["Rig"])).await;
    h.session.select_armature(Some("Rig".to_string())).unwrap();
    let mut sub = h.session.subscribe();

    h.session.import_now().await.unwrap();

    assert_eq!(h.sink.applied(), vec!["Rig"]);
    let status = h.wait_until(|s| s.last_synced_at.is_some()).await;
    assert_eq!(status.fingerprint, None);
    assert!(drain(&mut sub).contains(&SessionEvent::AnimationImported {
        armature: "Rig".to_string(),
        fingerprint: None,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_sink_rejection_is_reported() {
    let h = Harness::with(
        FakeTransport::new(&["Rig"]),
        RecordingSink::rejecting("no such rig in scene"),
        SessionSettings::default(),
    );
    h.session.connect_and_wait().await.unwrap();
    h.session.select_armature(Some("Rig".to_string())).unwrap();

    let err = h.session.import_now().await.unwrap_err();
    assert_eq!(
        err,
        SyncError::Sink(SinkError("no such rig in scene".to_string()))
    );
    assert_eq!(
        h.warnings(),
        vec!["Import of 'Rig' failed: Failed to apply animation: no such rig in scene"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_export_rejection_surfaces_server_message() {
    let h = Harness::connected(FakeTransport::new(&["Rig"])).await;
    h.session.select_armature(Some("Rig".to_string())).unwrap();
    h.fake.push_export(Err(TransportError::ServerRejected {
        status: 400,
        message: "Bad armature".to_string(),
    }));

    let err = h.session.export_now(walk(), None).await.unwrap_err();

    assert_eq!(err.to_string(), "Bad armature");
    assert_eq!(h.warnings(), vec!["Export failed: Bad armature"]);
    assert!(h.fake.calls().contains(&Call::Export(Some("Rig".to_string()))));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_animation_is_not_sent() {
    let h = Harness::connected(FakeTransport::new(&["Rig"])).await;

    let err = h
        .session
        .export_now(Animation::new("Broken", 0.0, 1, 1), Some("Rig".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Codec(_)));
    assert_eq!(h.fake.count(|c| matches!(c, Call::Export(_))), 0);
    assert_eq!(h.warnings().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_exports_are_serialized() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_latency(Duration::from_millis(200));
    let h = Harness::connected(fake).await;

    let (a, b, c) = tokio::join!(
        h.session.export_now(walk(), Some("Rig".to_string())),
        h.session.export_now(walk(), Some("Rig".to_string())),
        h.session.export_now(walk(), Some("Rig".to_string())),
    );

    assert_eq!((a, b, c), (Ok(()), Ok(()), Ok(())));
    assert_eq!(h.fake.count(|c| matches!(c, Call::Export(_))), 3);
    assert_eq!(h.fake.max_active(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_export_waits_for_live_import() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_hash(Some("h1"));
    fake.set_latency(Duration::from_millis(300));
    let h = Harness::live(fake).await;

    h.wait_until(|s| s.state == SessionState::Syncing).await;
    h.session.export_now(walk(), None).await.unwrap();

    assert_eq!(h.fake.max_active(), 1);
    let calls = h.fake.calls();
    let import = calls
        .iter()
        .position(|c| matches!(c, Call::Import(_)))
        .unwrap();
    let export = calls
        .iter()
        .position(|c| matches!(c, Call::Export(_)))
        .unwrap();
    assert!(import < export);
    assert_eq!(h.sink.applied(), vec!["Rig"]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_import() {
    let fake = FakeTransport::new(&["Rig"]);
    fake.set_latency(Duration::from_secs(10));
    let h = Harness::connected(fake).await;
    h.session.select_armature(Some("Rig".to_string())).unwrap();

    let session = h.session.clone();
    let import = tokio::spawn(async move { session.import_now().await });
    h.wait_until(|s| s.state == SessionState::Syncing).await;
    h.session.disconnect().unwrap();

    assert_eq!(import.await.unwrap(), Err(SyncError::Cancelled));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.sink.applied().is_empty());
    assert_eq!(h.session.status().state, SessionState::Disconnected);
}

#[tokio::test]
async fn test_result_from_cancelled_epoch_is_discarded() {
    let fake = FakeTransport::new(&["Rig"]);
    let sink = RecordingSink::default();
    let settings = SessionSettings::default();
    let session = SyncSession::new(&settings);
    let (_commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (status_tx, _status_rx) = watch::channel(session.status());
    let (events_tx, _) = broadcast::channel(8);

    let mut actor = SessionActor::new(
        session,
        settings,
        fake.clone(),
        JsonCodec,
        Box::new(sink.clone()),
        Arc::new(RecordingNotifier::new()),
        commands_rx,
        status_tx,
        events_tx,
    );
    actor.session_mut().set_armature(Some("Rig".to_string()));
    actor.session_mut().set_state(SessionState::Syncing);

    let stale = actor.session_mut().epoch_token();
    actor.set_in_flight(InFlight::LiveSync {
        armature: "Rig".to_string(),
        hash: Fingerprint::new("h1"),
    });
    actor.session_mut().new_epoch();

    actor.handle_outcome(Tagged {
        token: stale,
        outcome: Outcome::Fetched(Ok(walk_bytes())),
    });
    assert!(sink.applied().is_empty());
    assert_eq!(actor.status().fingerprint, None);

    let current = actor.session_mut().epoch_token();
    actor.handle_outcome(Tagged {
        token: current,
        outcome: Outcome::Fetched(Ok(walk_bytes())),
    });
    assert_eq!(sink.applied(), vec!["Rig"]);
    assert_eq!(actor.status().fingerprint, Some(Fingerprint::new("h1")));
    assert!(fake.calls().is_empty());
}

// ----------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_detaches() {
    let h = Harness::start(FakeTransport::new(&["Rig"]));
    let sub = h.session.subscribe();
    let other = h.session.subscribe();
    assert_eq!(h.session.subscriber_count(), 2);

    sub.unsubscribe();
    assert_eq!(h.session.subscriber_count(), 1);
    drop(other);
    assert_eq!(h.session.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_session() {
    let h = Harness::connected(FakeTransport::new(&["Rig"])).await;

    h.session.shutdown().await.unwrap();
    h.handle.await.unwrap();

    assert_eq!(h.session.connect(), Err(SyncError::SessionClosed));
    assert_eq!(h.session.import_now().await, Err(SyncError::SessionClosed));
    assert_eq!(h.session.status().state, SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_ends_when_session_stops() {
    let h = Harness::connected(FakeTransport::new(&["Rig"])).await;
    let mut sub = h.session.subscribe();

    h.session.shutdown().await.unwrap();
    h.handle.await.unwrap();

    // The handle is still alive, yet the stream ends after the last event.
    let mut events = Vec::new();
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = sub.next().await {
            events.push(event);
        }
    })
    .await;
    assert!(ended.is_ok());
    assert!(events.contains(&SessionEvent::StateChanged {
        from: SessionState::Connected,
        to: SessionState::Disconnected,
    }));
    assert_eq!(h.session.connect(), Err(SyncError::SessionClosed));
}
