use super::chat_store::ChatStore;
use super::clock::SharedClock;
use super::event_bus::EventBus;
use super::identity::SharedDirectory;
use super::moderation_engine::ModerationEngine;
use super::monetization_ledger::MonetizationLedger;
use super::payment::SharedPaymentProcessor;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::models::{
    ActionType, ChatMessage, ChatUser, CommandOutcome, Dashboard, DiscardedEvent, InboundEvent,
    InboundPayload, ManualAction, ModerationAction, ModerationLogExport, MonetizationEvent,
    NewChatMessage, OperatorCommand, OutboundEvent, PaidEventDetails, PaidMetadata, PaidRequest,
    SessionEnvelope, SessionState, SessionSummary, StreamMetadata, StreamPerformance,
    SYSTEM_MODERATOR,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use uuid::Uuid;

/// What happened to one inbound event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InboundOutcome {
    Message {
        message: ChatMessage,
        moderation: Option<ModerationAction>,
    },
    Paid {
        event: MonetizationEvent,
        message: ChatMessage,
    },
    Joined {
        user: ChatUser,
    },
    Left {
        user_id: String,
    },
}

/// One live stream session: lifecycle, routing and the dashboard view.
///
/// Not thread-safe by itself; `spawn_session` gives it a single-writer task.
pub struct StreamOrchestrator {
    session_id: Uuid,
    bus: EventBus,
    state: SessionState,
    stream: Option<StreamMetadata>,
    chat: ChatStore,
    moderation: ModerationEngine,
    ledger: MonetizationLedger,
    directory: SharedDirectory,
    performance: StreamPerformance,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    discarded: Vec<DiscardedEvent>,
    dashboard_tx: watch::Sender<Dashboard>,
}

impl StreamOrchestrator {
    pub fn new(
        session_id: Uuid,
        config: &Config,
        clock: SharedClock,
        payments: SharedPaymentProcessor,
        directory: SharedDirectory,
    ) -> Self {
        let bus = EventBus::new(session_id, config.session.event_buffer, clock);
        let chat = ChatStore::new(bus.clone(), config.chat.settings());
        let moderation = ModerationEngine::from_config(bus.clone(), &config.moderation);
        let ledger = MonetizationLedger::new(bus.clone(), config.monetization.clone(), payments);

        let initial = Dashboard {
            session_id,
            state: SessionState::Uninitialized,
            stream: None,
            chat: chat.statistics(0),
            revenue: ledger.revenue().clone(),
            moderation: moderation.stats(),
            performance: StreamPerformance::default(),
            emergency_mode: false,
            generated_at: bus.now(),
        };
        let (dashboard_tx, _) = watch::channel(initial);

        Self {
            session_id,
            bus,
            state: SessionState::Uninitialized,
            stream: None,
            chat,
            moderation,
            ledger,
            directory,
            performance: StreamPerformance::default(),
            started_at: None,
            ended_at: None,
            discarded: Vec::new(),
            dashboard_tx,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn chat(&self) -> &ChatStore {
        &self.chat
    }

    pub fn moderation(&self) -> &ModerationEngine {
        &self.moderation
    }

    pub fn ledger(&self) -> &MonetizationLedger {
        &self.ledger
    }

    pub fn stream(&self) -> Option<&StreamMetadata> {
        self.stream.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEnvelope> {
        self.bus.subscribe()
    }

    pub fn event_bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn subscribe_dashboard(&self) -> watch::Receiver<Dashboard> {
        self.dashboard_tx.subscribe()
    }

    // ---- lifecycle --------------------------------------------------------

    fn transition(&mut self, next: SessionState, command: &str) -> Result<SessionState> {
        if !self.state.can_transition_to(next) {
            warn!(
                session_id = %self.session_id,
                state = %self.state,
                command,
                "rejected lifecycle command"
            );
            return Err(EngineError::invalid_state(self.state, command));
        }

        let from = self.state;
        self.state = next;
        info!(session_id = %self.session_id, from = %from, to = %next, "session state changed");
        self.bus
            .publish(OutboundEvent::StreamStateChanged { from, to: next });
        Ok(from)
    }

    pub fn initialize_stream(&mut self, metadata: StreamMetadata) -> Result<()> {
        if metadata.title.trim().is_empty() {
            return Err(EngineError::validation("stream title is required"));
        }
        if metadata.owner_id.trim().is_empty() {
            return Err(EngineError::validation("stream owner is required"));
        }

        self.transition(SessionState::Initialized, "initialize stream")?;
        self.chat.set_owner(metadata.owner_id.clone());
        self.stream = Some(metadata);
        self.publish_dashboard();
        Ok(())
    }

    pub fn start_live_stream(&mut self) -> Result<()> {
        self.transition(SessionState::Live, "start live stream")?;
        self.started_at = Some(self.bus.now());
        self.publish_dashboard();
        Ok(())
    }

    /// Ends the session and returns its final figures. In-flight payment
    /// calls have already resolved, since every call runs on this writer.
    pub fn stop_live_stream(&mut self) -> Result<SessionSummary> {
        self.transition(SessionState::Ended, "stop live stream")?;
        let ended_at = self.bus.now();
        self.ended_at = Some(ended_at);

        let dashboard = self.publish_dashboard();
        let duration_seconds = self
            .started_at
            .map(|start| (ended_at - start).num_seconds())
            .unwrap_or(0);

        info!(
            session_id = %self.session_id,
            duration_seconds,
            messages = dashboard.chat.message_count,
            revenue = dashboard.revenue.total_revenue,
            moderation_actions = dashboard.moderation.total_actions,
            discarded = self.discarded.len(),
            "stream stopped"
        );

        Ok(SessionSummary {
            session_id: self.session_id,
            started_at: self.started_at,
            ended_at,
            duration_seconds,
            chat: dashboard.chat,
            revenue: dashboard.revenue,
            moderation: dashboard.moderation,
            discarded_events: self.discarded.len(),
        })
    }

    fn require_state(&self, allowed: &[SessionState], command: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EngineError::invalid_state(self.state, command))
        }
    }

    // ---- inbound routing --------------------------------------------------

    pub async fn handle_inbound(&mut self, event: InboundEvent) -> Result<InboundOutcome> {
        if event.session_id != self.session_id {
            return Err(EngineError::validation(format!(
                "event for session {} delivered to {}",
                event.session_id, self.session_id
            )));
        }
        if event.user_id.trim().is_empty() || event.user_id == SYSTEM_MODERATOR {
            return Err(EngineError::validation("inbound event needs a real user id"));
        }
        metrics::record_inbound_event(event.payload.event_name());

        let outcome = match event.payload {
            InboundPayload::Chat { username, body } => {
                self.require_state(&[SessionState::Live], "send chat")?;
                self.handle_chat(event.user_id, username, body)?
            }
            InboundPayload::PaidMessage(request) => {
                self.require_state(&[SessionState::Live], "send paid message")?;
                self.handle_paid(event.user_id, request).await?
            }
            InboundPayload::Join { username, badges } => {
                self.require_state(&[SessionState::Initialized, SessionState::Live], "join")?;
                self.handle_join(event.user_id, username, badges).await
            }
            InboundPayload::Leave => {
                self.require_state(&[SessionState::Initialized, SessionState::Live], "leave")?;
                self.chat.leave_user(&event.user_id);
                InboundOutcome::Left {
                    user_id: event.user_id,
                }
            }
        };

        self.publish_dashboard();
        Ok(outcome)
    }

    fn display_name(&self, user_id: &str, claimed: String) -> String {
        self.chat
            .user(user_id)
            .map(|u| u.username.clone())
            .unwrap_or(claimed)
    }

    fn handle_chat(&mut self, user_id: String, username: String, body: String) -> Result<InboundOutcome> {
        if self.moderation.is_banned(&user_id) {
            return Err(EngineError::Permission("user is banned from this chat".to_string()));
        }
        if self.moderation.is_user_timed_out(&user_id) {
            return Err(EngineError::Permission("user is timed out".to_string()));
        }
        self.chat.admit(&user_id)?;

        let username = self.display_name(&user_id, username);
        let stored = self
            .chat
            .append_message(NewChatMessage::text(user_id, username, body))?;

        let decision = self.moderation.evaluate(&stored, &self.chat);
        let survives = decision
            .as_ref()
            .map(|a| !a.action_type.removes_message())
            .unwrap_or(true);
        if survives {
            self.bus.publish(OutboundEvent::MessageAppended {
                message: stored.clone(),
            });
        }

        let moderation = match decision {
            Some(action) => Some(self.moderation.apply(action, &mut self.chat)?),
            None => None,
        };

        let message = self
            .chat
            .message(stored.id)
            .cloned()
            .unwrap_or(stored);
        Ok(InboundOutcome::Message {
            message,
            moderation,
        })
    }

    async fn handle_paid(&mut self, user_id: String, request: PaidRequest) -> Result<InboundOutcome> {
        if self.moderation.is_banned(&user_id) {
            return Err(EngineError::Permission("user is banned from this chat".to_string()));
        }

        let username = self.display_name(&user_id, request.username().to_string());
        let max_len = self.chat.settings().max_message_length;
        let attached = match &request {
            PaidRequest::SuperChat { message, .. } => Some(message.as_str()),
            PaidRequest::Donation { message, .. } => message.as_deref(),
            _ => None,
        };
        if let Some(text) = attached {
            if text.trim().chars().count() > max_len {
                return Err(EngineError::validation(format!(
                    "paid message text exceeds {} characters",
                    max_len
                )));
            }
        }

        let event = match request {
            PaidRequest::SuperChat {
                amount,
                currency,
                message,
                ..
            } => {
                self.ledger
                    .process_super_chat(&user_id, &username, amount, &message, currency.as_deref())
                    .await?
            }
            PaidRequest::Donation {
                amount,
                currency,
                message,
                ..
            } => {
                self.ledger
                    .process_donation(
                        &user_id,
                        &username,
                        amount,
                        message.as_deref(),
                        currency.as_deref(),
                    )
                    .await?
            }
            PaidRequest::Subscription { tier_id, .. } => {
                let event = self
                    .ledger
                    .process_subscription(&user_id, &username, &tier_id)?;
                self.chat.grant_subscription(&user_id, &tier_id);
                event
            }
            PaidRequest::Tip {
                amount, currency, ..
            } => self
                .ledger
                .process_tip(&user_id, &username, amount, currency.as_deref())?,
        };

        let message = self.append_companion(&event)?;
        Ok(InboundOutcome::Paid { event, message })
    }

    /// Chat line announcing a recorded paid event
    fn append_companion(&mut self, event: &MonetizationEvent) -> Result<ChatMessage> {
        let (tier_color, pin_duration_seconds) = match &event.details {
            PaidEventDetails::SuperChat { tier } => {
                (Some(tier.color.hex().to_string()), Some(tier.pin_duration_seconds))
            }
            PaidEventDetails::Subscription { badge_color, .. } => (Some(badge_color.clone()), None),
            PaidEventDetails::Donation | PaidEventDetails::Tip => (None, None),
        };

        let body = match (&event.message, &event.details) {
            (Some(text), _) => text.clone(),
            (None, PaidEventDetails::Subscription { tier_name, .. }) => {
                format!("{} subscribed at {}", event.username, tier_name)
            }
            (None, PaidEventDetails::Donation) => {
                format!("{} donated {:.2} {}", event.username, event.amount, event.currency)
            }
            (None, PaidEventDetails::Tip) => {
                format!("{} tipped {:.2} {}", event.username, event.amount, event.currency)
            }
            (None, PaidEventDetails::SuperChat { .. }) => format!(
                "{} sent a super chat of {:.2} {}",
                event.username, event.amount, event.currency
            ),
        };
        // runs after capture: clip to the chat limit instead of failing
        let max_len = self.chat.settings().max_message_length;
        let body: String = body.trim().chars().take(max_len).collect();

        let metadata = PaidMetadata {
            amount: event.amount,
            currency: event.currency.clone(),
            tier_color,
            pin_duration_seconds,
        };
        let message = self.chat.append_message(NewChatMessage::paid(
            event.user_id.clone(),
            event.username.clone(),
            body,
            metadata,
        ))?;
        self.bus.publish(OutboundEvent::MessageAppended {
            message: message.clone(),
        });
        Ok(message)
    }

    async fn handle_join(
        &mut self,
        user_id: String,
        username: String,
        badges: BTreeSet<String>,
    ) -> InboundOutcome {
        let mut user = ChatUser::new(user_id.clone(), username);
        user.badges = badges;

        match self.directory.lookup(&user_id).await {
            Ok(Some(profile)) => profile.enrich(&mut user),
            Ok(None) => {}
            Err(e) => warn!(
                session_id = %self.session_id,
                user_id = %user_id,
                error = %e,
                "identity lookup failed, joining with event data only"
            ),
        }

        self.chat.join_user(user);
        let user = self
            .chat
            .user(&user_id)
            .cloned()
            .unwrap_or_else(|| ChatUser::new(user_id, ""));
        InboundOutcome::Joined { user }
    }

    // ---- operator commands ------------------------------------------------

    fn authorize(&self, actor: &str, command: &OperatorCommand) -> Result<()> {
        if actor.trim().is_empty() || actor == SYSTEM_MODERATOR {
            return Err(EngineError::Permission(format!(
                "{} requires a human operator",
                command.command_name()
            )));
        }
        let owner = self.chat.is_owner(actor);
        if command.requires_owner() {
            if !owner {
                return Err(EngineError::Permission(format!(
                    "only the stream owner may {}",
                    command.command_name()
                )));
            }
        } else if !owner && !self.chat.is_moderator(actor) {
            return Err(EngineError::Permission(format!(
                "{} requires moderator rights",
                command.command_name()
            )));
        }
        Ok(())
    }

    fn manual(
        &mut self,
        actor: &str,
        action_type: ActionType,
        target_user_id: String,
        reason: String,
        duration_seconds: Option<u64>,
        message_id: Option<crate::models::MessageId>,
    ) -> Result<CommandOutcome> {
        let action = self.moderation.execute_manual_action(
            ManualAction {
                action_type,
                target_user_id,
                moderator_id: actor.to_string(),
                reason,
                duration_seconds,
                message_id,
            },
            &mut self.chat,
        )?;
        Ok(CommandOutcome::Action { action })
    }

    fn author_of(&self, message_id: crate::models::MessageId) -> Result<String> {
        self.chat
            .message(message_id)
            .map(|m| m.user_id.clone())
            .ok_or_else(|| EngineError::not_found("message", message_id))
    }

    pub fn execute_command(&mut self, actor: &str, command: OperatorCommand) -> Result<CommandOutcome> {
        let name = command.command_name();
        self.require_state(&[SessionState::Initialized, SessionState::Live], name)?;
        self.authorize(actor, &command)?;

        info!(session_id = %self.session_id, actor = %actor, command = name, "operator command");

        let outcome = match command {
            OperatorCommand::BanUser { user_id, reason } => {
                self.manual(actor, ActionType::Ban, user_id, reason, None, None)?
            }
            OperatorCommand::TimeoutUser {
                user_id,
                duration_seconds,
                reason,
            } => self.manual(
                actor,
                ActionType::Timeout,
                user_id,
                reason,
                Some(duration_seconds),
                None,
            )?,
            OperatorCommand::UnbanUser { user_id } => self.manual(
                actor,
                ActionType::Unban,
                user_id,
                "unbanned by operator".to_string(),
                None,
                None,
            )?,
            OperatorCommand::WarnUser { user_id, reason } => {
                self.manual(actor, ActionType::Warn, user_id, reason, None, None)?
            }
            OperatorCommand::DeleteMessage { message_id } => {
                let author = self.author_of(message_id)?;
                self.manual(
                    actor,
                    ActionType::Delete,
                    author,
                    "removed by moderator".to_string(),
                    None,
                    Some(message_id),
                )?
            }
            OperatorCommand::ApproveMessage { message_id } => {
                let author = self.author_of(message_id)?;
                self.manual(
                    actor,
                    ActionType::Approve,
                    author,
                    "approved by moderator".to_string(),
                    None,
                    Some(message_id),
                )?
            }
            OperatorCommand::UpdateChatSettings { settings } => {
                self.chat.update_settings(&settings)?;
                CommandOutcome::Applied
            }
            OperatorCommand::UpdateAutoModSettings { settings } => {
                self.moderation.update_settings(&settings)?;
                CommandOutcome::Applied
            }
            OperatorCommand::AddModerator { username } => {
                self.chat.add_moderator(&username)?;
                CommandOutcome::Applied
            }
            OperatorCommand::RemoveModerator { user_id } => {
                self.chat.remove_moderator(&user_id)?;
                CommandOutcome::Applied
            }
            OperatorCommand::AddRule { rule } => {
                self.moderation.add_rule(rule)?;
                CommandOutcome::Applied
            }
            OperatorCommand::UpdateRule { rule_id, patch } => {
                self.moderation.update_rule(&rule_id, &patch)?;
                CommandOutcome::Applied
            }
            OperatorCommand::RemoveRule { rule_id } => {
                self.moderation.remove_rule(&rule_id)?;
                CommandOutcome::Applied
            }
            OperatorCommand::EnableEmergencyMode => {
                self.moderation.enable_emergency_mode();
                CommandOutcome::Applied
            }
            OperatorCommand::DisableEmergencyMode => {
                self.moderation.disable_emergency_mode();
                CommandOutcome::Applied
            }
            OperatorCommand::UpdateStreamPerformance { performance } => {
                self.update_stream_performance(performance);
                CommandOutcome::Applied
            }
            OperatorCommand::ExportModerationLogs => {
                return Ok(CommandOutcome::Export {
                    export: Box::new(self.export_moderation_logs()),
                });
            }
        };

        self.publish_dashboard();
        Ok(outcome)
    }

    pub fn update_stream_performance(&mut self, performance: StreamPerformance) {
        self.performance = performance;
    }

    // ---- reporting --------------------------------------------------------

    fn uptime_seconds(&self) -> i64 {
        match (self.started_at, self.state) {
            (Some(start), SessionState::Live) => (self.bus.now() - start).num_seconds(),
            (Some(start), SessionState::Ended) => self
                .ended_at
                .map(|end| (end - start).num_seconds())
                .unwrap_or(0),
            _ => 0,
        }
    }

    pub fn dashboard(&self) -> Dashboard {
        let mut performance = self.performance.clone();
        performance.uptime_seconds = self.uptime_seconds();

        Dashboard {
            session_id: self.session_id,
            state: self.state,
            stream: self.stream.clone(),
            chat: self.chat.statistics(self.moderation.action_count()),
            revenue: self.ledger.revenue().clone(),
            moderation: self.moderation.stats(),
            performance,
            emergency_mode: self.moderation.emergency_mode(),
            generated_at: self.bus.now(),
        }
    }

    pub fn publish_dashboard(&self) -> Dashboard {
        let dashboard = self.dashboard();
        self.dashboard_tx.send_replace(dashboard.clone());
        dashboard
    }

    pub fn export_moderation_logs(&self) -> ModerationLogExport {
        ModerationLogExport {
            session_id: self.session_id,
            exported_at: self.bus.now(),
            actions: self.moderation.actions().to_vec(),
            user_states: self.moderation.user_states(),
            rules: self.moderation.rules().to_vec(),
            settings: self.moderation.settings().clone(),
            emergency_mode: self.moderation.emergency_mode(),
            discarded_events: self.discarded.clone(),
            stats: self.moderation.stats(),
        }
    }

    /// Audit trail entry for work dropped before it reached the session
    pub fn record_discarded(&mut self, description: impl Into<String>, reason: impl Into<String>) {
        let entry = DiscardedEvent {
            description: description.into(),
            reason: reason.into(),
            discarded_at: self.bus.now(),
        };
        warn!(
            session_id = %self.session_id,
            description = %entry.description,
            reason = %entry.reason,
            "discarded queued session work"
        );
        self.discarded.push(entry);
    }

    pub fn discarded(&self) -> &[DiscardedEvent] {
        &self.discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatSettingsPatch;
    use crate::services::clock::ManualClock;
    use crate::services::identity::{StaticDirectory, UserProfile};
    use crate::services::payment::SandboxPaymentProcessor;
    use std::sync::Arc;

    fn orchestrator() -> (StreamOrchestrator, ManualClock) {
        let clock = ManualClock::default();
        let directory =
            StaticDirectory::with_profiles(vec![UserProfile::new("sub", "subby").with_tier("tier1")]);
        let orch = StreamOrchestrator::new(
            Uuid::new_v4(),
            &Config::default(),
            Arc::new(clock.clone()),
            Arc::new(SandboxPaymentProcessor::default()),
            Arc::new(directory),
        );
        (orch, clock)
    }

    fn metadata() -> StreamMetadata {
        StreamMetadata {
            stream_id: Uuid::new_v4(),
            title: "Friday speedrun".to_string(),
            owner_id: "owner".to_string(),
            owner_username: "streamer".to_string(),
            category: None,
        }
    }

    fn live() -> (StreamOrchestrator, ManualClock) {
        let (mut orch, clock) = orchestrator();
        orch.initialize_stream(metadata()).unwrap();
        orch.start_live_stream().unwrap();
        (orch, clock)
    }

    fn chat(orch: &StreamOrchestrator, user: &str, body: &str) -> InboundEvent {
        InboundEvent {
            session_id: orch.session_id(),
            user_id: user.to_string(),
            payload: InboundPayload::Chat {
                username: user.to_string(),
                body: body.to_string(),
            },
        }
    }

    #[test]
    fn test_lifecycle_rejects_out_of_order_commands() {
        let (mut orch, _) = orchestrator();
        assert!(matches!(
            orch.start_live_stream(),
            Err(EngineError::InvalidState { .. })
        ));
        assert!(orch.stop_live_stream().is_err());

        orch.initialize_stream(metadata()).unwrap();
        assert!(matches!(
            orch.stop_live_stream(),
            Err(EngineError::InvalidState { .. })
        ));
        orch.start_live_stream().unwrap();
        assert!(orch.start_live_stream().is_err());

        orch.stop_live_stream().unwrap();
        assert_eq!(orch.state(), SessionState::Ended);
        assert!(orch.stop_live_stream().is_err());
    }

    #[tokio::test]
    async fn test_chat_before_live_is_invalid_state() {
        let (mut orch, _) = orchestrator();
        orch.initialize_stream(metadata()).unwrap();
        let event = chat(&orch, "alice", "hi");
        assert!(matches!(
            orch.handle_inbound(event).await,
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_join_enriches_from_directory() {
        let (mut orch, _) = live();
        let event = InboundEvent {
            session_id: orch.session_id(),
            user_id: "sub".to_string(),
            payload: InboundPayload::Join {
                username: "subby".to_string(),
                badges: BTreeSet::new(),
            },
        };
        match orch.handle_inbound(event).await.unwrap() {
            InboundOutcome::Joined { user } => {
                assert!(user.is_subscriber);
                assert_eq!(user.subscription_tier.as_deref(), Some("tier1"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_banned_user_cannot_chat() {
        let (mut orch, _) = live();
        orch.execute_command(
            "owner",
            OperatorCommand::BanUser {
                user_id: "troll".into(),
                reason: "abuse".into(),
            },
        )
        .unwrap();

        let event = chat(&orch, "troll", "let me in");
        assert!(matches!(
            orch.handle_inbound(event).await,
            Err(EngineError::Permission(_))
        ));
        assert_eq!(orch.chat().messages().len(), 0);
    }

    #[tokio::test]
    async fn test_operator_permissions() {
        let (mut orch, _) = live();
        let ban = OperatorCommand::BanUser {
            user_id: "x".into(),
            reason: "r".into(),
        };
        assert!(matches!(
            orch.execute_command("random", ban.clone()),
            Err(EngineError::Permission(_))
        ));
        assert!(matches!(
            orch.execute_command(SYSTEM_MODERATOR, ban.clone()),
            Err(EngineError::Permission(_))
        ));

        let join = InboundEvent {
            session_id: orch.session_id(),
            user_id: "m1".to_string(),
            payload: InboundPayload::Join {
                username: "mia".to_string(),
                badges: BTreeSet::new(),
            },
        };
        orch.handle_inbound(join).await.unwrap();
        orch.execute_command(
            "owner",
            OperatorCommand::AddModerator {
                username: "mia".into(),
            },
        )
        .unwrap();

        assert!(orch.execute_command("m1", ban).is_ok());
        assert!(matches!(
            orch.execute_command(
                "m1",
                OperatorCommand::RemoveModerator {
                    user_id: "m1".into()
                }
            ),
            Err(EngineError::Permission(_))
        ));
    }

    #[tokio::test]
    async fn test_paid_message_appends_companion() {
        let (mut orch, _) = live();
        let event = InboundEvent {
            session_id: orch.session_id(),
            user_id: "bob".to_string(),
            payload: InboundPayload::PaidMessage(PaidRequest::SuperChat {
                username: "bob".to_string(),
                amount: 75.0,
                currency: None,
                message: "great run".to_string(),
            }),
        };

        match orch.handle_inbound(event).await.unwrap() {
            InboundOutcome::Paid { event, message } => {
                assert_eq!(event.amount, 75.0);
                assert_eq!(message.kind, crate::models::MessageKind::PaidMessage);
                let meta = message.paid_metadata.unwrap();
                assert_eq!(meta.pin_duration_seconds, Some(240));
                assert_eq!(message.body, "great run");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(orch.dashboard().revenue.total_revenue, 75.0);
    }

    #[tokio::test]
    async fn test_settings_commands_publish_dashboard() {
        let (mut orch, _) = live();
        let mut dashboards = orch.subscribe_dashboard();
        dashboards.borrow_and_update();

        orch.execute_command(
            "owner",
            OperatorCommand::UpdateChatSettings {
                settings: ChatSettingsPatch {
                    slow_mode_seconds: Some(30),
                    ..Default::default()
                },
            },
        )
        .unwrap();
        assert!(dashboards.has_changed().unwrap());
        assert_eq!(orch.chat().settings().slow_mode_seconds, 30);
    }

    #[test]
    fn test_uptime_derived_from_start() {
        let (mut orch, clock) = live();
        clock.advance_secs(125);
        orch.update_stream_performance(StreamPerformance {
            bitrate_kbps: 6000,
            latency_ms: 900,
            quality: "1080p60".to_string(),
            uptime_seconds: 0,
        });
        let dashboard = orch.dashboard();
        assert_eq!(dashboard.performance.uptime_seconds, 125);
        assert_eq!(dashboard.performance.bitrate_kbps, 6000);

        let summary = orch.stop_live_stream().unwrap();
        assert_eq!(summary.duration_seconds, 125);
    }
}
