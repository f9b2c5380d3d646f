//! # Session Runner
//!
//! Drives a [`RealtimeSession`] on a tokio task. One `select!` loop waits on
//! transport events, control messages from the game, and the replication
//! and interpolation timers. After each wake-up the session's queued
//! commands go to the [`RealtimeTransport`] and its notifications go to the
//! notification channel.
//!
//! Timers exist only between `StartTimers` and `StopTimers`; the runner
//! handles those two commands itself.

use log::{debug, info, warn};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::{interval, Duration, Instant, Interval, MissedTickBehavior},
};
use web_time::{SystemTime, UNIX_EPOCH};

use crate::{
    engine_state::{interaction::VoxelEdit, physics::PlayerState},
    realtime::{
        protocol::WorldSnapshotPointer,
        session::{RealtimeSession, SessionCommand, SessionEvent, SessionNotification},
        voice::{VoiceSettings, VoiceSettingsAction},
    },
};

/// Executes session commands against real networking and audio.
///
/// Implementations report asynchronous results by sending [`SessionEvent`]s
/// on the sender paired with the runner's event receiver. `execute` must not
/// block.
pub trait RealtimeTransport: Send {
    fn execute(&mut self, command: SessionCommand);
}

/// Requests from the game to the running session.
#[derive(Debug, Clone)]
pub enum SessionControl {
    Start,
    Stop,
    EnableVoice,
    DisableVoice,
    SetVoiceSettings(VoiceSettings),
    VoiceAction(VoiceSettingsAction),
    UpdateLocalPlayer(PlayerState),
    BroadcastBlockEdit(VoxelEdit),
    PublishWorldSnapshot(WorldSnapshotPointer),
    RequestLateJoin { last_known_sequence: Option<u32> },
    /// Stops the session and ends the runner.
    Shutdown,
}

/// Cloneable sender side of a runner. Every method returns `false` once the
/// runner has exited.
#[derive(Clone)]
pub struct SessionHandle {
    control: UnboundedSender<SessionControl>,
}

impl SessionHandle {
    pub fn send(&self, control: SessionControl) -> bool {
        self.control.send(control).is_ok()
    }

    pub fn start(&self) -> bool {
        self.send(SessionControl::Start)
    }

    pub fn stop(&self) -> bool {
        self.send(SessionControl::Stop)
    }

    pub fn update_local_player(&self, state: PlayerState) -> bool {
        self.send(SessionControl::UpdateLocalPlayer(state))
    }

    pub fn broadcast_block_edit(&self, edit: VoxelEdit) -> bool {
        self.send(SessionControl::BroadcastBlockEdit(edit))
    }

    pub fn shutdown(&self) -> bool {
        self.send(SessionControl::Shutdown)
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn session_interval(period: Duration) -> Interval {
    let mut timer = interval(period.max(Duration::from_millis(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

/// Ticks `timer` if it exists, otherwise never completes.
async fn tick_opt(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

pub struct SessionRunner<T: RealtimeTransport> {
    session: RealtimeSession,
    transport: T,
    events: UnboundedReceiver<SessionEvent>,
    control: UnboundedReceiver<SessionControl>,
    notifications: UnboundedSender<SessionNotification>,
    replication: Option<Interval>,
    interpolation: Option<Interval>,
}

impl<T: RealtimeTransport> SessionRunner<T> {
    /// Wires a session to its transport.
    ///
    /// # Arguments
    /// * `session` - An idle session
    /// * `transport` - Executes commands; holds the sender for `events`
    /// * `events` - Results reported by the transport
    /// * `notifications` - Where status, remote states and edits are published
    ///
    /// # Returns
    /// The runner, to be spawned, and a handle for controlling it.
    pub fn new(
        session: RealtimeSession,
        transport: T,
        events: UnboundedReceiver<SessionEvent>,
        notifications: UnboundedSender<SessionNotification>,
    ) -> (Self, SessionHandle) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let runner = SessionRunner {
            session,
            transport,
            events,
            control: control_rx,
            notifications,
            replication: None,
            interpolation: None,
        };
        (runner, SessionHandle { control: control_tx })
    }

    /// Runs until shutdown or until every handle is dropped, then stops the
    /// session and returns it.
    pub async fn run(mut self) -> RealtimeSession {
        info!("Session runner started for {}", self.session.local_peer_id());
        loop {
            tokio::select! {
                Some(event) = self.events.recv() => {
                    self.session.handle_event(event, unix_time_ms());
                }
                control = self.control.recv() => match control {
                    Some(SessionControl::Shutdown) | None => break,
                    Some(control) => self.apply(control),
                },
                _ = tick_opt(&mut self.replication) => {
                    self.session.on_replication_tick(unix_time_ms());
                }
                _ = tick_opt(&mut self.interpolation) => {
                    self.session.on_interpolation_tick(unix_time_ms());
                }
            }
            self.flush();
        }

        self.session.stop();
        self.flush();
        info!("Session runner exited");
        self.session
    }

    fn apply(&mut self, control: SessionControl) {
        match control {
            SessionControl::Start => self.session.start(unix_time_ms()),
            SessionControl::Stop => self.session.stop(),
            SessionControl::EnableVoice => self.session.enable_voice(),
            SessionControl::DisableVoice => self.session.disable_voice(),
            SessionControl::SetVoiceSettings(settings) => self.session.set_voice_settings(settings),
            SessionControl::VoiceAction(action) => self.session.apply_voice_action(action),
            SessionControl::UpdateLocalPlayer(state) => self.session.update_local_player_state(&state),
            SessionControl::BroadcastBlockEdit(edit) => {
                self.session.broadcast_block_edit(&edit, unix_time_ms());
            }
            SessionControl::PublishWorldSnapshot(pointer) => {
                if let Err(err) = self.session.publish_world_snapshot(pointer) {
                    warn!("Ignoring invalid world snapshot pointer: {}", err);
                }
            }
            SessionControl::RequestLateJoin { last_known_sequence } => {
                self.session.request_late_join(last_known_sequence, unix_time_ms());
            }
            SessionControl::Shutdown => {}
        }
    }

    /// Hands queued commands to the transport and publishes notifications.
    fn flush(&mut self) {
        for command in self.session.drain_commands() {
            match command {
                SessionCommand::StartTimers {
                    replication,
                    interpolation,
                } => {
                    self.replication = Some(session_interval(replication));
                    self.interpolation = Some(session_interval(interpolation));
                }
                SessionCommand::StopTimers => {
                    self.replication = None;
                    self.interpolation = None;
                }
                command => self.transport.execute(command),
            }
        }

        for notification in self.session.drain_notifications() {
            if self.notifications.send(notification).is_err() {
                debug!("Notification receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::SessionConfig,
        engine_state::{interaction::VoxelCoord, voxels::block::BlockType},
        realtime::{
            protocol::RoomEvent,
            session::SessionStatus,
            session_plan::IceServer,
        },
    };

    /// Answers startup requests immediately and records everything else.
    struct MemoryTransport {
        events: UnboundedSender<SessionEvent>,
        log: Arc<Mutex<Vec<SessionCommand>>>,
        ice_servers: Vec<IceServer>,
    }

    impl RealtimeTransport for MemoryTransport {
        fn execute(&mut self, command: SessionCommand) {
            match &command {
                SessionCommand::FetchIceServers { epoch } => {
                    let _ = self.events.send(SessionEvent::IceServersFetched {
                        epoch: *epoch,
                        result: Ok(self.ice_servers.clone()),
                    });
                }
                SessionCommand::SubscribeChannels { epoch, .. } => {
                    let _ = self.events.send(SessionEvent::ChannelsSubscribed {
                        epoch: *epoch,
                        result: Ok(()),
                    });
                }
                _ => {}
            }
            self.log.lock().unwrap().push(command);
        }
    }

    fn spawn_runner(
        ice_servers: Vec<IceServer>,
    ) -> (
        tokio::task::JoinHandle<RealtimeSession>,
        SessionHandle,
        UnboundedReceiver<SessionNotification>,
        Arc<Mutex<Vec<SessionCommand>>>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = MemoryTransport {
            events: events_tx,
            log: Arc::clone(&log),
            ice_servers,
        };
        let session = RealtimeSession::new(SessionConfig {
            room_id: "room".to_owned(),
            local_peer_id: "me".to_owned(),
            user_id: "user".to_owned(),
            display_name: "Me".to_owned(),
            ..Default::default()
        });
        let (runner, handle) = SessionRunner::new(session, transport, events_rx, notify_tx);
        (tokio::spawn(runner.run()), handle, notify_rx, log)
    }

    async fn wait_for<F>(rx: &mut UnboundedReceiver<SessionNotification>, mut predicate: F) -> SessionNotification
    where
        F: FnMut(&SessionNotification) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let notification = rx.recv().await.expect("runner closed");
                if predicate(&notification) {
                    return notification;
                }
            }
        })
        .await
        .expect("timed out waiting for notification")
    }

    #[tokio::test]
    async fn runner_connects_replicates_and_shuts_down() {
        let (task, handle, mut notifications, log) = spawn_runner(vec![IceServer::new("turn:turn.example")]);

        assert!(handle.start());
        wait_for(&mut notifications, |n| {
            *n == SessionNotification::StatusChanged(SessionStatus::Connected)
        })
        .await;

        // The interpolation timer is running.
        wait_for(&mut notifications, |n| matches!(n, SessionNotification::RemoteStates(_))).await;

        assert!(handle.broadcast_block_edit(VoxelEdit {
            position: VoxelCoord::new(0, 10, 0),
            block: BlockType::Stone,
        }));
        assert!(handle.shutdown());

        let session = task.await.unwrap();
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.edit_ledger().local_sequence(), 1);

        let log = log.lock().unwrap();
        assert_matches!(log.first(), Some(SessionCommand::FetchIceServers { epoch: 1 }));
        assert!(log
            .iter()
            .any(|c| matches!(c, SessionCommand::BroadcastEvent(RoomEvent::BlockEdit(edit)) if edit.sequence == 1)));
        assert!(log.iter().any(|c| *c == SessionCommand::UnsubscribeChannels));
        assert!(!log
            .iter()
            .any(|c| matches!(c, SessionCommand::StartTimers { .. } | SessionCommand::StopTimers)));
    }

    #[tokio::test]
    async fn runner_reports_the_turn_gate() {
        let (task, handle, mut notifications, _log) = spawn_runner(vec![IceServer::new("stun:stun.example")]);

        handle.start();
        let error = wait_for(&mut notifications, |n| matches!(n, SessionNotification::Error(_))).await;
        assert_matches!(error, SessionNotification::Error(message) if message.contains("TURN"));
        wait_for(&mut notifications, |n| {
            *n == SessionNotification::StatusChanged(SessionStatus::Error)
        })
        .await;

        drop(handle);
        let session = task.await.unwrap();
        assert_eq!(session.status(), SessionStatus::Error);
    }
}
