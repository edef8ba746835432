use super::chat::{ChatMessage, MessageId};
use super::moderation::{
    AutoModSettingsPatch, ModerationAction, ModerationLogExport, ModerationRule, RulePatch,
};
use super::monetization::{MonetizationEvent, RevenueMetrics};
use super::session::{ChatSettingsPatch, SessionState, StreamPerformance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Audience event delivered by the real-time transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub session_id: Uuid,
    pub user_id: String,
    #[serde(flatten)]
    pub payload: InboundPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InboundPayload {
    Chat {
        username: String,
        body: String,
    },
    PaidMessage(PaidRequest),
    Join {
        username: String,
        #[serde(default)]
        badges: BTreeSet<String>,
    },
    Leave,
}

impl InboundPayload {
    pub fn event_name(&self) -> &'static str {
        match self {
            InboundPayload::Chat { .. } => "chat",
            InboundPayload::PaidMessage(_) => "paid_message",
            InboundPayload::Join { .. } => "join",
            InboundPayload::Leave => "leave",
        }
    }
}

/// Paid event as requested by a viewer, before validation and capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaidRequest {
    SuperChat {
        username: String,
        amount: f64,
        #[serde(default)]
        currency: Option<String>,
        message: String,
    },
    Donation {
        username: String,
        amount: f64,
        #[serde(default)]
        currency: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Subscription {
        username: String,
        tier_id: String,
    },
    Tip {
        username: String,
        amount: f64,
        #[serde(default)]
        currency: Option<String>,
    },
}

impl PaidRequest {
    pub fn username(&self) -> &str {
        match self {
            PaidRequest::SuperChat { username, .. }
            | PaidRequest::Donation { username, .. }
            | PaidRequest::Subscription { username, .. }
            | PaidRequest::Tip { username, .. } => username,
        }
    }
}

/// Event broadcast to every viewer of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundEvent {
    MessageAppended {
        message: ChatMessage,
    },
    MessageRemoved {
        message_id: MessageId,
        user_id: String,
        moderator_id: String,
    },
    MessageRestored {
        message: ChatMessage,
    },
    UserWarned {
        user_id: String,
        warning_count: u32,
        reason: String,
    },
    UserTimedOut {
        user_id: String,
        until: DateTime<Utc>,
        reason: String,
    },
    UserBanned {
        user_id: String,
        reason: String,
    },
    UserUnbanned {
        user_id: String,
    },
    #[serde(rename = "moderation_action")]
    ModerationRecorded {
        action: ModerationAction,
    },
    RevenueUpdated {
        event: MonetizationEvent,
        metrics: RevenueMetrics,
    },
    StreamStateChanged {
        from: SessionState,
        to: SessionState,
    },
}

impl OutboundEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundEvent::MessageAppended { .. } => "message_appended",
            OutboundEvent::MessageRemoved { .. } => "message_removed",
            OutboundEvent::MessageRestored { .. } => "message_restored",
            OutboundEvent::UserWarned { .. } => "user_warned",
            OutboundEvent::UserTimedOut { .. } => "user_timed_out",
            OutboundEvent::UserBanned { .. } => "user_banned",
            OutboundEvent::UserUnbanned { .. } => "user_unbanned",
            OutboundEvent::ModerationRecorded { .. } => "moderation_action",
            OutboundEvent::RevenueUpdated { .. } => "revenue_updated",
            OutboundEvent::StreamStateChanged { .. } => "stream_state_changed",
        }
    }
}

/// Outbound event stamped with its per-session position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnvelope {
    pub session_id: Uuid,
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: OutboundEvent,
}

/// Commands issued through the operator API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    BanUser {
        user_id: String,
        reason: String,
    },
    TimeoutUser {
        user_id: String,
        duration_seconds: u64,
        reason: String,
    },
    UnbanUser {
        user_id: String,
    },
    WarnUser {
        user_id: String,
        reason: String,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    ApproveMessage {
        message_id: MessageId,
    },
    UpdateChatSettings {
        settings: ChatSettingsPatch,
    },
    UpdateAutoModSettings {
        settings: AutoModSettingsPatch,
    },
    AddModerator {
        username: String,
    },
    RemoveModerator {
        user_id: String,
    },
    AddRule {
        rule: ModerationRule,
    },
    UpdateRule {
        rule_id: String,
        patch: RulePatch,
    },
    RemoveRule {
        rule_id: String,
    },
    EnableEmergencyMode,
    DisableEmergencyMode,
    UpdateStreamPerformance {
        performance: StreamPerformance,
    },
    ExportModerationLogs,
}

impl OperatorCommand {
    pub fn command_name(&self) -> &'static str {
        match self {
            OperatorCommand::BanUser { .. } => "ban_user",
            OperatorCommand::TimeoutUser { .. } => "timeout_user",
            OperatorCommand::UnbanUser { .. } => "unban_user",
            OperatorCommand::WarnUser { .. } => "warn_user",
            OperatorCommand::DeleteMessage { .. } => "delete_message",
            OperatorCommand::ApproveMessage { .. } => "approve_message",
            OperatorCommand::UpdateChatSettings { .. } => "update_chat_settings",
            OperatorCommand::UpdateAutoModSettings { .. } => "update_auto_mod_settings",
            OperatorCommand::AddModerator { .. } => "add_moderator",
            OperatorCommand::RemoveModerator { .. } => "remove_moderator",
            OperatorCommand::AddRule { .. } => "add_rule",
            OperatorCommand::UpdateRule { .. } => "update_rule",
            OperatorCommand::RemoveRule { .. } => "remove_rule",
            OperatorCommand::EnableEmergencyMode => "enable_emergency_mode",
            OperatorCommand::DisableEmergencyMode => "disable_emergency_mode",
            OperatorCommand::UpdateStreamPerformance { .. } => "update_stream_performance",
            OperatorCommand::ExportModerationLogs => "export_moderation_logs",
        }
    }

    /// Membership changes on the moderator roster are reserved to the owner
    pub fn requires_owner(&self) -> bool {
        matches!(
            self,
            OperatorCommand::AddModerator { .. } | OperatorCommand::RemoveModerator { .. }
        )
    }
}

/// Result of an operator command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Action { action: ModerationAction },
    Export { export: Box<ModerationLogExport> },
    Applied,
}
