//! The session state machine.
//!
//! A [`SessionOrchestrator`] owns a [`Session`] and is the only thing that
//! mutates it. Structured and image requests run on short-lived worker tasks
//! that report back over a completion channel; the orchestrator never waits
//! on a worker directly.
//!
//! ```text
//! Idle --submit--> Generating --completion--> Validating --ok--> Idle
//!                      ^                          |
//!                      |                       rejected
//!                      +------- Repairing <-------+
//!                                   |
//!                             ceiling reached --> Stalled --retry--> Generating
//! ```
//!
//! Front ends usually run the orchestrator on its own task with
//! [`SessionOrchestrator::spawn`] and talk to it through a [`SessionHandle`].

use crate::client::{fetch_illustration, Clients, GenerationError, ImageError, Illustration};
use crate::model::GameState;
use crate::persist::{self, PersistError, SessionFileKind};
use crate::session::{Session, SessionId};
use crate::transcript::{TranscriptPhase, Turn, TurnId, BOOTSTRAP_MESSAGE};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands queued to a running orchestrator before senders wait.
const COMMAND_BUFFER: usize = 32;

/// Repair requests allowed per owed request before the session stalls.
pub const DEFAULT_MAX_REPAIR_ATTEMPTS: u32 = 5;

/// Corrective user message sent with a repair request. Never stored.
pub fn corrective_message(hint: &str) -> String {
    format!("Please regenerate your response. What you need to fix: {hint}")
}

/// Player message for picking a choice.
pub fn choice_message(choice: &str) -> String {
    format!("I have chosen: {choice}")
}

/// Player message for using an inventory item.
pub fn item_message(item: &str, option: &str) -> String {
    format!("Use item '{item}' - Option '{option}'")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting on the player.
    Idle,
    /// A structured request is in flight.
    Generating,
    /// Checking a structured reply.
    Validating,
    /// Building a corrective request.
    Repairing,
    /// Repair ceiling reached; [`SessionOrchestrator::retry`] resumes.
    Stalled,
    /// Terminal. Late completions are ignored.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveStatus {
    Saving,
    Saved,
    Failed(String),
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A structured request was issued.
    LoadingStarted,
    /// A model turn was accepted, or re-shown after loading.
    GameStateUpdated { turn: TurnId, state: GameState },
    /// An illustration for the latest model turn arrived.
    ImageReady(Illustration),
    /// A structured reply was rejected.
    GenerationFailed {
        reason: String,
        attempt: u32,
        will_retry: bool,
    },
    AutosaveStatusChanged(AutosaveStatus),
    /// The repair ceiling was reached.
    Stalled { reason: String },
    Closed,
}

/// Bounds the automatic repair cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairPolicy {
    /// Consecutive repair requests allowed for one owed request.
    pub max_attempts: u32,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_REPAIR_ATTEMPTS,
        }
    }
}

/// Tags structured requests so stale completions can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// A worker's report.
#[derive(Debug)]
pub enum Completion {
    Structured {
        request: RequestId,
        result: Result<GameState, GenerationError>,
    },
    Image {
        turn: TurnId,
        prompt: String,
        result: Result<DynamicImage, ImageError>,
    },
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("cannot {action} while {phase:?}")]
    InvalidPhase { action: &'static str, phase: Phase },

    #[error("no game state yet")]
    NoGameState,

    #[error("no choice number {0}")]
    NoSuchChoice(usize),

    #[error("no item named '{0}' in the inventory")]
    NoSuchItem(String),

    #[error("item '{item}' has no option '{option}'")]
    NoSuchOption { item: String, option: String },

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("session is closed")]
    Closed,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub id: SessionId,
    pub phase: Phase,
    pub turns: usize,
    pub latest: Option<(TurnId, GameState)>,
    pub autosave_path: Option<PathBuf>,
    pub repair_attempts: u32,
}

/// Requests sent to a running orchestrator.
#[derive(Debug)]
pub enum Command {
    Submit {
        text: String,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Choose {
        index: usize,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    UseItem {
        item: String,
        option: String,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Retry {
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Save {
        path: PathBuf,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Snapshot {
        reply: oneshot::Sender<Session>,
    },
    RebindClients(Clients),
    Close,
}

/// Drives one session.
pub struct SessionOrchestrator {
    session: Session,
    clients: Clients,
    policy: RepairPolicy,
    phase: Phase,
    events: mpsc::UnboundedSender<SessionEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    next_request: u64,
    current_request: Option<RequestId>,
    repair_attempts: u32,
    structured_task: Option<JoinHandle<()>>,
    image_tasks: Vec<JoinHandle<()>>,
}

impl SessionOrchestrator {
    /// Create an orchestrator and the receiver for its events.
    ///
    /// Nothing is sent until [`start`](Self::start) (or [`run`](Self::run)).
    /// A transcript that still owes a model turn starts out `Generating`, so
    /// player input is refused until that turn arrives.
    pub fn new(session: Session, clients: Clients) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let phase = match session.transcript.phase() {
            TranscriptPhase::AwaitingPlayer => Phase::Idle,
            TranscriptPhase::Empty | TranscriptPhase::AwaitingModel => Phase::Generating,
        };
        let (events, events_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            session,
            clients,
            policy: RepairPolicy::default(),
            phase,
            events,
            completions_tx,
            completions_rx,
            next_request: 0,
            current_request: None,
            repair_attempts: 0,
            structured_task: None,
            image_tasks: Vec::new(),
        };
        (orchestrator, events_rx)
    }

    pub fn with_policy(mut self, policy: RepairPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            id: self.session.id,
            phase: self.phase,
            turns: self.session.transcript.len(),
            latest: self
                .session
                .latest_game_state()
                .map(|(turn, state)| (turn, state.clone())),
            autosave_path: self.session.autosave_path.clone(),
            repair_attempts: self.repair_attempts,
        }
    }

    /// Begin or resume play based on the transcript's last turn.
    ///
    /// A trailing user turn is answered immediately. A trailing model turn is
    /// re-shown and its illustration fetched again.
    pub fn start(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        match self.session.transcript.phase() {
            TranscriptPhase::Empty => {
                self.session.transcript.push_user(BOOTSTRAP_MESSAGE);
                self.issue_request(Vec::new());
            }
            TranscriptPhase::AwaitingModel => {
                info!(
                    session = %self.session.id,
                    turns = self.session.transcript.len(),
                    "requesting next scene"
                );
                self.issue_request(Vec::new());
            }
            TranscriptPhase::AwaitingPlayer => {
                self.phase = Phase::Idle;
                if let Some((turn, state)) = self.session.latest_game_state() {
                    let state = state.clone();
                    info!(session = %self.session.id, turn = %turn, "resuming at player turn");
                    let prompt = state.has_image_prompt().then(|| state.image_prompt.clone());
                    self.emit(SessionEvent::GameStateUpdated { turn, state });
                    if let Some(prompt) = prompt {
                        self.start_illustration(turn, prompt);
                    }
                }
            }
        }
    }

    /// Append the player's text and request the next scene.
    pub fn submit_choice(&mut self, text: impl Into<String>) -> Result<(), OrchestratorError> {
        self.require_phase(Phase::Idle, "submit a choice")?;
        let turn = self.session.transcript.push_user(text);
        debug!(turn = %turn, "player turn appended");
        self.repair_attempts = 0;
        self.issue_request(Vec::new());
        Ok(())
    }

    /// Pick the `index`-th (zero based) choice of the latest game state.
    pub fn choose(&mut self, index: usize) -> Result<(), OrchestratorError> {
        self.require_phase(Phase::Idle, "choose")?;
        let (_, state) = self
            .session
            .latest_game_state()
            .ok_or(OrchestratorError::NoGameState)?;
        let choice = state
            .choice(index)
            .ok_or(OrchestratorError::NoSuchChoice(index))?;
        let message = choice_message(&choice.text);
        self.submit_choice(message)
    }

    /// Apply one of an inventory item's options.
    pub fn use_item(&mut self, item: &str, option: &str) -> Result<(), OrchestratorError> {
        self.require_phase(Phase::Idle, "use an item")?;
        let (_, state) = self
            .session
            .latest_game_state()
            .ok_or(OrchestratorError::NoGameState)?;
        let found = state
            .item(item)
            .ok_or_else(|| OrchestratorError::NoSuchItem(item.to_string()))?;
        if !found.has_option(option) {
            return Err(OrchestratorError::NoSuchOption {
                item: item.to_string(),
                option: option.to_string(),
            });
        }
        self.submit_choice(item_message(item, option))
    }

    /// Re-issue the owed request after a stall.
    pub fn retry(&mut self) -> Result<(), OrchestratorError> {
        self.require_phase(Phase::Stalled, "retry")?;
        info!(session = %self.session.id, "retrying after stall");
        self.repair_attempts = 0;
        self.issue_request(Vec::new());
        Ok(())
    }

    /// Save to `path` and make it the autosave target.
    pub async fn save(&mut self, path: impl AsRef<Path>) -> Result<(), OrchestratorError> {
        if self.phase == Phase::Closed {
            return Err(OrchestratorError::Closed);
        }
        let path = path.as_ref();
        persist::save_session(&self.session, path, SessionFileKind::Session).await?;
        info!(path = %path.display(), "session saved, autosave enabled");
        self.session.autosave_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Swap the service binding. Requests already in flight keep the old one.
    pub fn rebind_clients(&mut self, clients: Clients) {
        debug!("clients rebound");
        self.clients = clients;
    }

    /// Abandon in-flight work and stop.
    pub fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;
        self.current_request = None;
        if let Some(task) = self.structured_task.take() {
            task.abort();
        }
        for task in self.image_tasks.drain(..) {
            task.abort();
        }
        info!(session = %self.session.id, "session closed");
        self.emit(SessionEvent::Closed);
    }

    /// Wait for the next worker report and apply it.
    pub async fn step(&mut self) {
        if let Some(completion) = self.completions_rx.recv().await {
            self.handle_completion(completion).await;
        }
    }

    /// Apply a worker report.
    pub async fn handle_completion(&mut self, completion: Completion) {
        if self.phase == Phase::Closed {
            debug!("session closed, dropping completion");
            return;
        }
        match completion {
            Completion::Structured { request, result } => {
                self.on_structured(request, result).await
            }
            Completion::Image {
                turn,
                prompt,
                result,
            } => self.on_image(turn, prompt, result),
        }
    }

    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { text, reply } => {
                let _ = reply.send(self.submit_choice(text));
            }
            Command::Choose { index, reply } => {
                let _ = reply.send(self.choose(index));
            }
            Command::UseItem {
                item,
                option,
                reply,
            } => {
                let _ = reply.send(self.use_item(&item, &option));
            }
            Command::Retry { reply } => {
                let _ = reply.send(self.retry());
            }
            Command::Save { path, reply } => {
                let result = self.save(&path).await;
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.clone());
            }
            Command::RebindClients(clients) => self.rebind_clients(clients),
            Command::Close => self.close(),
        }
    }

    /// Coordinator loop. Returns the final session once closed, or once every
    /// command sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Session {
        self.start();
        while self.phase != Phase::Closed {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.close(),
                },
                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion).await
                }
            }
        }
        self.session
    }

    /// Run on a new task.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<Session>) {
        let (commands, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(self.run(commands_rx));
        (SessionHandle { commands }, task)
    }

    fn require_phase(&self, expected: Phase, action: &'static str) -> Result<(), OrchestratorError> {
        match self.phase {
            Phase::Closed => Err(OrchestratorError::Closed),
            phase if phase == expected => Ok(()),
            phase => Err(OrchestratorError::InvalidPhase { action, phase }),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("no event receiver");
        }
    }

    /// Send the transcript plus `extra` transient turns to the text client.
    fn issue_request(&mut self, extra: Vec<Turn>) {
        let request = RequestId(self.next_request);
        self.next_request += 1;
        self.current_request = Some(request);
        self.phase = Phase::Generating;

        let mut history = self.session.transcript.turns().to_vec();
        history.extend(extra);
        let config = self.session.config.clone();
        let client = Arc::clone(&self.clients.text);
        let completions = self.completions_tx.clone();

        if let Some(task) = self.structured_task.take() {
            task.abort();
        }

        debug!(request = request.0, turns = history.len(), "issuing structured request");
        self.emit(SessionEvent::LoadingStarted);
        self.structured_task = Some(tokio::spawn(async move {
            let result = client.generate(&history, &config).await;
            let _ = completions.send(Completion::Structured { request, result });
        }));
    }

    async fn on_structured(
        &mut self,
        request: RequestId,
        result: Result<GameState, GenerationError>,
    ) {
        if self.current_request != Some(request) {
            debug!(request = request.0, "dropping stale structured completion");
            return;
        }
        self.current_request = None;
        self.structured_task = None;
        self.phase = Phase::Validating;

        let outcome = match result {
            Ok(state) => {
                let state = state.normalize();
                match state.validate() {
                    Ok(()) => Ok(state),
                    Err(e) => Err((GenerationError::from(e), Some(state))),
                }
            }
            Err(e) => Err((e, None)),
        };

        match outcome {
            Ok(state) => self.accept(state).await,
            Err((error, rejected)) => self.repair(error, rejected),
        }
    }

    async fn accept(&mut self, state: GameState) {
        self.repair_attempts = 0;
        let prompt = state.has_image_prompt().then(|| state.image_prompt.clone());
        let turn = self.session.transcript.push_model(state.clone());
        self.phase = Phase::Idle;
        info!(session = %self.session.id, turn = %turn, "model turn accepted");

        self.emit(SessionEvent::GameStateUpdated { turn, state });
        self.autosave().await;
        if let Some(prompt) = prompt {
            self.start_illustration(turn, prompt);
        }
    }

    fn repair(&mut self, error: GenerationError, rejected: Option<GameState>) {
        self.repair_attempts += 1;
        let attempt = self.repair_attempts;
        let will_retry = attempt <= self.policy.max_attempts;
        let reason = error.to_string();
        warn!(attempt, will_retry, error = %error, "structured response rejected");

        self.emit(SessionEvent::GenerationFailed {
            reason: reason.clone(),
            attempt,
            will_retry,
        });

        if !will_retry {
            self.phase = Phase::Stalled;
            self.emit(SessionEvent::Stalled { reason });
            return;
        }

        self.phase = Phase::Repairing;
        let mut extra = Vec::with_capacity(2);
        if let Some(state) = rejected {
            extra.push(Turn::model(state));
        }
        extra.push(Turn::user(corrective_message(&error.fix_hint())));
        self.issue_request(extra);
    }

    async fn autosave(&mut self) {
        let Some(path) = self.session.autosave_path.clone() else {
            return;
        };
        self.emit(SessionEvent::AutosaveStatusChanged(AutosaveStatus::Saving));
        match persist::save_session(&self.session, &path, SessionFileKind::Session).await {
            Ok(()) => {
                debug!(path = %path.display(), "autosaved");
                self.emit(SessionEvent::AutosaveStatusChanged(AutosaveStatus::Saved));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "autosave failed");
                self.emit(SessionEvent::AutosaveStatusChanged(AutosaveStatus::Failed(
                    e.to_string(),
                )));
            }
        }
    }

    fn start_illustration(&mut self, turn: TurnId, prompt: String) {
        self.image_tasks.retain(|task| !task.is_finished());
        let client = Arc::clone(&self.clients.image);
        let completions = self.completions_tx.clone();

        debug!(turn = %turn, "starting illustration");
        self.image_tasks.push(tokio::spawn(async move {
            let result = fetch_illustration(client.as_ref(), &prompt).await;
            let _ = completions.send(Completion::Image {
                turn,
                prompt,
                result,
            });
        }));
    }

    fn on_image(&mut self, turn: TurnId, prompt: String, result: Result<DynamicImage, ImageError>) {
        let latest = self.session.latest_game_state().map(|(id, _)| id);
        if latest != Some(turn) {
            debug!(turn = %turn, "dropping illustration for a superseded turn");
            return;
        }
        match result {
            Ok(image) => self.emit(SessionEvent::ImageReady(Illustration {
                turn,
                prompt,
                image: Arc::new(image),
            })),
            Err(e) => warn!(turn = %turn, error = %e, "illustration unavailable"),
        }
    }
}

/// Cloneable handle to an orchestrator running on its own task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, OrchestratorError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| OrchestratorError::Closed)?;
        response.await.map_err(|_| OrchestratorError::Closed)
    }

    pub async fn submit_choice(&self, text: impl Into<String>) -> Result<(), OrchestratorError> {
        let text = text.into();
        self.request(|reply| Command::Submit { text, reply }).await?
    }

    pub async fn choose(&self, index: usize) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Choose { index, reply }).await?
    }

    pub async fn use_item(
        &self,
        item: impl Into<String>,
        option: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        let (item, option) = (item.into(), option.into());
        self.request(|reply| Command::UseItem {
            item,
            option,
            reply,
        })
        .await?
    }

    pub async fn retry(&self) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Retry { reply }).await?
    }

    pub async fn save(&self, path: impl Into<PathBuf>) -> Result<(), OrchestratorError> {
        let path = path.into();
        self.request(|reply| Command::Save { path, reply }).await?
    }

    pub async fn status(&self) -> Result<SessionStatus, OrchestratorError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// A copy of the session as it stands.
    pub async fn snapshot(&self) -> Result<Session, OrchestratorError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn rebind_clients(&self, clients: Clients) -> Result<(), OrchestratorError> {
        self.commands
            .send(Command::RebindClients(clients))
            .await
            .map_err(|_| OrchestratorError::Closed)
    }

    /// Ask the orchestrator to close. Closing twice is harmless.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }
}
