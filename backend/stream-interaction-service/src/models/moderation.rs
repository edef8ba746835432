use super::chat::MessageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

/// Moderator id recorded on every action the engine takes on its own
pub const SYSTEM_MODERATOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    Keyword,
    Regex,
    Spam,
    ExcessiveCaps,
    Link,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Keyword => "keyword",
            RuleKind::Regex => "regex",
            RuleKind::Spam => "spam",
            RuleKind::ExcessiveCaps => "excessive-caps",
            RuleKind::Link => "link",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Warn,
    Timeout,
    Delete,
    Ban,
    Unban,
    Approve,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Warn => "warn",
            ActionType::Timeout => "timeout",
            ActionType::Delete => "delete",
            ActionType::Ban => "ban",
            ActionType::Unban => "unban",
            ActionType::Approve => "approve",
        }
    }

    /// Actions that take the triggering message down along with them
    pub fn removes_message(&self) -> bool {
        matches!(self, ActionType::Delete | ActionType::Timeout | ActionType::Ban)
    }
}

/// Operator-configurable rule. Evaluated in rule-set order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRule {
    pub id: String,
    pub kind: RuleKind,
    /// Pipe-delimited terms for keyword rules, a regex for regex rules,
    /// ignored by the built-in heuristics
    #[serde(default)]
    pub pattern: String,
    pub action: ActionType,
    /// 1 (mild) to 10 (severe)
    pub severity: u8,
    pub enabled: bool,
    pub auto_apply: bool,
    /// Timeout length when `action` is timeout
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

impl ModerationRule {
    pub fn new(id: impl Into<String>, kind: RuleKind, action: ActionType) -> Self {
        Self {
            id: id.into(),
            kind,
            pattern: String::new(),
            action,
            severity: 5,
            enabled: true,
            auto_apply: true,
            duration_seconds: None,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_severity(mut self, severity: u8) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Partial update for an existing rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePatch {
    pub pattern: Option<String>,
    pub action: Option<ActionType>,
    pub severity: Option<u8>,
    pub enabled: Option<bool>,
    pub auto_apply: Option<bool>,
    pub duration_seconds: Option<u64>,
}

/// Per-user escalation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserModerationState {
    pub user_id: String,
    pub warning_count: u32,
    pub timeout_until: Option<DateTime<Utc>>,
    pub is_banned: bool,
}

impl UserModerationState {
    pub fn clean(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            warning_count: 0,
            timeout_until: None,
            is_banned: false,
        }
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        matches!(self.timeout_until, Some(until) if until > now)
    }

    /// Fold an elapsed timeout back into the clean state
    pub fn settle(&mut self, now: DateTime<Utc>) {
        if matches!(self.timeout_until, Some(until) if until <= now) {
            self.timeout_until = None;
            self.warning_count = 0;
        }
    }

    /// State as observed at `now`, without mutating the stored record
    pub fn settled(&self, now: DateTime<Utc>) -> Self {
        let mut view = self.clone();
        view.settle(now);
        view
    }
}

/// Immutable audit record of an executed moderation action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationAction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub target_user_id: String,
    pub moderator_id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: Option<u64>,
    pub message_id: Option<MessageId>,
}

impl ModerationAction {
    pub fn is_automatic(&self) -> bool {
        self.moderator_id == SYSTEM_MODERATOR
    }
}

/// Operator-initiated action request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAction {
    pub action_type: ActionType,
    pub target_user_id: String,
    pub moderator_id: String,
    pub reason: String,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub message_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeratorCount {
    pub moderator_id: String,
    pub actions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModerationStats {
    pub total_actions: usize,
    pub actions_by_type: BTreeMap<ActionType, usize>,
    pub top_moderators: Vec<ModeratorCount>,
    /// Fraction of actions taken by auto-moderation, 0 when the log is empty
    pub auto_moderation_share: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
    Maximum,
}

impl Sensitivity {
    /// Lowest rule severity still applied at this sensitivity
    pub fn min_severity(&self) -> u8 {
        match self {
            Sensitivity::Low => 7,
            Sensitivity::Medium => 4,
            Sensitivity::High => 2,
            Sensitivity::Maximum => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AutoModSettings {
    pub enabled: bool,
    pub sensitivity: Sensitivity,
    #[validate(range(min = 1, max = 20))]
    pub warnings_before_timeout: u32,
    #[validate(range(min = 1, max = 86400))]
    pub escalation_timeout_secs: u64,
    #[validate(range(min = 1, max = 3600))]
    pub spam_window_secs: u64,
    #[validate(range(min = 2, max = 50))]
    pub spam_duplicate_threshold: u32,
    #[validate(range(min = 1, max = 500))]
    pub spam_rate_limit: u32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub caps_threshold: f64,
    #[validate(range(min = 1, max = 200))]
    pub caps_min_letters: u32,
}

impl Default for AutoModSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: Sensitivity::Medium,
            warnings_before_timeout: 3,
            escalation_timeout_secs: 300,
            spam_window_secs: 30,
            spam_duplicate_threshold: 3,
            spam_rate_limit: 10,
            caps_threshold: 0.7,
            caps_min_letters: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoModSettingsPatch {
    pub enabled: Option<bool>,
    pub sensitivity: Option<Sensitivity>,
    pub warnings_before_timeout: Option<u32>,
    pub escalation_timeout_secs: Option<u64>,
    pub spam_window_secs: Option<u64>,
    pub spam_duplicate_threshold: Option<u32>,
    pub spam_rate_limit: Option<u32>,
    pub caps_threshold: Option<f64>,
    pub caps_min_letters: Option<u32>,
}

impl AutoModSettings {
    /// Apply a patch to a copy; the caller validates before swapping it in
    pub fn patched(&self, patch: &AutoModSettingsPatch) -> Self {
        let mut next = self.clone();
        if let Some(v) = patch.enabled {
            next.enabled = v;
        }
        if let Some(v) = patch.sensitivity {
            next.sensitivity = v;
        }
        if let Some(v) = patch.warnings_before_timeout {
            next.warnings_before_timeout = v;
        }
        if let Some(v) = patch.escalation_timeout_secs {
            next.escalation_timeout_secs = v;
        }
        if let Some(v) = patch.spam_window_secs {
            next.spam_window_secs = v;
        }
        if let Some(v) = patch.spam_duplicate_threshold {
            next.spam_duplicate_threshold = v;
        }
        if let Some(v) = patch.spam_rate_limit {
            next.spam_rate_limit = v;
        }
        if let Some(v) = patch.caps_threshold {
            next.caps_threshold = v;
        }
        if let Some(v) = patch.caps_min_letters {
            next.caps_min_letters = v;
        }
        next
    }
}

/// Inbound work that never reached the engine, kept for the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardedEvent {
    pub description: String,
    pub reason: String,
    pub discarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationLogExport {
    pub session_id: Uuid,
    pub exported_at: DateTime<Utc>,
    pub actions: Vec<ModerationAction>,
    pub user_states: Vec<UserModerationState>,
    pub rules: Vec<ModerationRule>,
    pub settings: AutoModSettings,
    pub emergency_mode: bool,
    pub discarded_events: Vec<DiscardedEvent>,
    pub stats: ModerationStats,
}
