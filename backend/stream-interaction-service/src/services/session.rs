use super::clock::SharedClock;
use super::event_bus::EventBus;
use super::identity::SharedDirectory;
use super::orchestrator::{InboundOutcome, StreamOrchestrator};
use super::payment::SharedPaymentProcessor;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::models::{
    CommandOutcome, Dashboard, InboundEvent, ModerationLogExport, OperatorCommand,
    SessionEnvelope, SessionState, SessionSummary, StreamMetadata,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Work item for a session's writer task
enum SessionCommand {
    Initialize {
        metadata: StreamMetadata,
        reply: Reply<()>,
    },
    Start {
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<SessionSummary>,
    },
    Inbound {
        event: InboundEvent,
        reply: Option<Reply<InboundOutcome>>,
    },
    Operator {
        actor: String,
        command: OperatorCommand,
        reply: Reply<CommandOutcome>,
    },
    Dashboard {
        reply: oneshot::Sender<Dashboard>,
    },
    Export {
        reply: oneshot::Sender<ModerationLogExport>,
    },
}

impl SessionCommand {
    fn name(&self) -> &'static str {
        match self {
            SessionCommand::Initialize { .. } => "initialize stream",
            SessionCommand::Start { .. } => "start live stream",
            SessionCommand::Stop { .. } => "stop live stream",
            SessionCommand::Inbound { .. } => "inbound event",
            SessionCommand::Operator { .. } => "operator command",
            SessionCommand::Dashboard { .. } => "dashboard",
            SessionCommand::Export { .. } => "export moderation logs",
        }
    }

    fn describe(&self) -> String {
        match self {
            SessionCommand::Inbound { event, .. } => format!(
                "{} event from {}",
                event.payload.event_name(),
                event.user_id
            ),
            SessionCommand::Operator { actor, command, .. } => {
                format!("{} by {}", command.command_name(), actor)
            }
            other => other.name().to_string(),
        }
    }

    /// Read-only requests are still answered once the stream has ended
    fn is_read_only(&self) -> bool {
        matches!(
            self,
            SessionCommand::Dashboard { .. } | SessionCommand::Export { .. }
        )
    }

    fn reject(self, error: EngineError) {
        match self {
            SessionCommand::Initialize { reply, .. } | SessionCommand::Start { reply } => {
                let _ = reply.send(Err(error));
            }
            SessionCommand::Stop { reply } => {
                let _ = reply.send(Err(error));
            }
            SessionCommand::Inbound { reply, .. } => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(error));
                }
            }
            SessionCommand::Operator { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            SessionCommand::Dashboard { .. } | SessionCommand::Export { .. } => {}
        }
    }
}

/// Cloneable front door to a session running on its own task
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    capacity: usize,
    sender: mpsc::Sender<SessionCommand>,
    bus: EventBus,
    dashboard: watch::Receiver<Dashboard>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Moves `orchestrator` onto a dedicated writer task behind a bounded queue
pub fn spawn_session(orchestrator: StreamOrchestrator, capacity: usize) -> SessionHandle {
    let capacity = capacity.max(1);
    let (sender, receiver) = mpsc::channel(capacity);
    let session_id = orchestrator.session_id();
    let bus = orchestrator.event_bus();
    let dashboard = orchestrator.subscribe_dashboard();

    let task = tokio::spawn(run_session(orchestrator, receiver));
    info!(session_id = %session_id, capacity, "session task started");

    SessionHandle {
        session_id,
        capacity,
        sender,
        bus,
        dashboard,
        task: Arc::new(Mutex::new(Some(task))),
    }
}

async fn run_session(mut orchestrator: StreamOrchestrator, mut receiver: mpsc::Receiver<SessionCommand>) {
    let session_id = orchestrator.session_id();

    while let Some(command) = receiver.recv().await {
        if orchestrator.state() == SessionState::Ended && !command.is_read_only() {
            orchestrator.record_discarded(command.describe(), "queued behind stop");
            let name = command.name();
            command.reject(EngineError::invalid_state(SessionState::Ended, name));
            continue;
        }

        match command {
            SessionCommand::Initialize { metadata, reply } => {
                let _ = reply.send(orchestrator.initialize_stream(metadata));
            }
            SessionCommand::Start { reply } => {
                let _ = reply.send(orchestrator.start_live_stream());
            }
            SessionCommand::Stop { reply } => {
                let _ = reply.send(orchestrator.stop_live_stream());
            }
            SessionCommand::Inbound { event, reply } => {
                let event_name = event.payload.event_name();
                let result = orchestrator.handle_inbound(event).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            debug!(
                                session_id = %session_id,
                                event = event_name,
                                error = %e,
                                "inbound event rejected"
                            );
                        }
                    }
                }
            }
            SessionCommand::Operator {
                actor,
                command,
                reply,
            } => {
                let _ = reply.send(orchestrator.execute_command(&actor, command));
            }
            SessionCommand::Dashboard { reply } => {
                let _ = reply.send(orchestrator.dashboard());
            }
            SessionCommand::Export { reply } => {
                let _ = reply.send(orchestrator.export_moderation_logs());
            }
        }
    }

    info!(
        session_id = %session_id,
        state = %orchestrator.state(),
        discarded = orchestrator.discarded().len(),
        "session task finished"
    );
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEnvelope> {
        self.bus.subscribe()
    }

    pub fn dashboard_updates(&self) -> watch::Receiver<Dashboard> {
        self.dashboard.clone()
    }

    /// Enqueue without waiting; a full queue is reported, never waited on
    fn enqueue(&self, command: SessionCommand) -> Result<()> {
        let name = command.name();
        self.sender.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                metrics::record_backpressure();
                warn!(
                    session_id = %self.session_id,
                    capacity = self.capacity,
                    command = name,
                    "session queue full, rejecting"
                );
                EngineError::Backpressure {
                    capacity: self.capacity,
                }
            }
            mpsc::error::TrySendError::Closed(_) => {
                EngineError::invalid_state(SessionState::Ended, name)
            }
        })
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(build(tx))?;
        rx.await
            .map_err(|_| EngineError::Internal("session task dropped the request".to_string()))?
    }

    /// Fire-and-forget delivery from the transport
    pub fn submit(&self, event: InboundEvent) -> Result<()> {
        self.enqueue(SessionCommand::Inbound { event, reply: None })
    }

    pub async fn send(&self, event: InboundEvent) -> Result<InboundOutcome> {
        self.request(|reply| SessionCommand::Inbound {
            event,
            reply: Some(reply),
        })
        .await
    }

    pub async fn execute(&self, actor: &str, command: OperatorCommand) -> Result<CommandOutcome> {
        let actor = actor.to_string();
        self.request(|reply| SessionCommand::Operator {
            actor,
            command,
            reply,
        })
        .await
    }

    pub async fn initialize(&self, metadata: StreamMetadata) -> Result<()> {
        self.request(|reply| SessionCommand::Initialize { metadata, reply })
            .await
    }

    pub async fn start(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Start { reply }).await
    }

    /// Queued like everything else: work submitted earlier is processed first
    pub async fn stop(&self) -> Result<SessionSummary> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    pub async fn dashboard(&self) -> Result<Dashboard> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(SessionCommand::Dashboard { reply: tx })?;
        rx.await
            .map_err(|_| EngineError::Internal("session task dropped the request".to_string()))
    }

    pub async fn export_moderation_logs(&self) -> Result<ModerationLogExport> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(SessionCommand::Export { reply: tx })?;
        rx.await
            .map_err(|_| EngineError::Internal("session task dropped the request".to_string()))
    }

    /// Waits for the writer task once every handle clone has been dropped
    pub async fn join(self) {
        let task = self.task.lock().take();
        drop(self.sender);
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(session_id = %self.session_id, error = %e, "session task panicked");
            }
        }
    }
}

/// Independent sessions keyed by id
pub struct SessionRegistry {
    config: Config,
    clock: SharedClock,
    payments: SharedPaymentProcessor,
    directory: SharedDirectory,
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new(
        config: Config,
        clock: SharedClock,
        payments: SharedPaymentProcessor,
        directory: SharedDirectory,
    ) -> Self {
        Self {
            config,
            clock,
            payments,
            directory,
            sessions: DashMap::new(),
        }
    }

    /// Spawns a fresh session; an id that is already open is rejected
    pub fn open(&self, session_id: Uuid) -> Result<SessionHandle> {
        match self.sessions.entry(session_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::validation(format!(
                "session {} is already open",
                session_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let orchestrator = StreamOrchestrator::new(
                    session_id,
                    &self.config,
                    self.clock.clone(),
                    self.payments.clone(),
                    self.directory.clone(),
                );
                let handle = spawn_session(orchestrator, self.config.session.inbound_queue_capacity);
                slot.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    pub fn get(&self, session_id: Uuid) -> Option<SessionHandle> {
        self.sessions.get(&session_id).map(|entry| entry.value().clone())
    }

    /// Delivers an inbound event to the session named in it
    pub fn route(&self, event: InboundEvent) -> Result<()> {
        let handle = self
            .get(event.session_id)
            .ok_or_else(|| EngineError::not_found("session", event.session_id))?;
        handle.submit(event)
    }

    /// Stops the stream and forgets the session
    pub async fn close(&self, session_id: Uuid) -> Result<SessionSummary> {
        let handle = self
            .get(session_id)
            .ok_or_else(|| EngineError::not_found("session", session_id))?;
        let summary = handle.stop().await;
        self.sessions.remove(&session_id);
        summary
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }
}
