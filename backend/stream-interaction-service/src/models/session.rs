use super::moderation::ModerationStats;
use super::monetization::RevenueMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Session lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Live,
    Ended,
}

impl SessionState {
    /// uninitialized -> initialized -> live -> ended, nothing else
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Uninitialized, SessionState::Initialized)
                | (SessionState::Initialized, SessionState::Live)
                | (SessionState::Live, SessionState::Ended)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initialized => "initialized",
            SessionState::Live => "live",
            SessionState::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    pub stream_id: Uuid,
    pub title: String,
    pub owner_id: String,
    pub owner_username: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Figures reported by the streaming collaborator; passed through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamPerformance {
    pub bitrate_kbps: u32,
    pub latency_ms: u32,
    pub quality: String,
    #[serde(default)]
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettings {
    #[validate(range(min = 1, max = 5000))]
    pub max_message_length: usize,
    /// Minimum seconds between two messages of one user, 0 disables
    #[validate(range(max = 3600))]
    pub slow_mode_seconds: u64,
    pub subscriber_only: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_length: 500,
            slow_mode_seconds: 0,
            subscriber_only: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettingsPatch {
    pub max_message_length: Option<usize>,
    pub slow_mode_seconds: Option<u64>,
    pub subscriber_only: Option<bool>,
}

impl ChatSettings {
    pub fn patched(&self, patch: &ChatSettingsPatch) -> Self {
        let mut next = self.clone();
        if let Some(v) = patch.max_message_length {
            next.max_message_length = v;
        }
        if let Some(v) = patch.slow_mode_seconds {
            next.slow_mode_seconds = v;
        }
        if let Some(v) = patch.subscriber_only {
            next.subscriber_only = v;
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatStatistics {
    pub message_count: usize,
    pub deleted_message_count: usize,
    pub active_user_count: usize,
    pub peak_user_count: usize,
    pub moderation_action_count: usize,
}

/// Consolidated view published after every mutating command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub session_id: Uuid,
    pub state: SessionState,
    pub stream: Option<StreamMetadata>,
    pub chat: ChatStatistics,
    pub revenue: RevenueMetrics,
    pub moderation: ModerationStats,
    pub performance: StreamPerformance,
    pub emergency_mode: bool,
    pub generated_at: DateTime<Utc>,
}

/// Final figures returned when a stream stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub chat: ChatStatistics,
    pub revenue: RevenueMetrics,
    pub moderation: ModerationStats,
    pub discarded_events: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_transitions() {
        assert!(SessionState::Uninitialized.can_transition_to(SessionState::Initialized));
        assert!(SessionState::Initialized.can_transition_to(SessionState::Live));
        assert!(SessionState::Live.can_transition_to(SessionState::Ended));

        assert!(!SessionState::Uninitialized.can_transition_to(SessionState::Live));
        assert!(!SessionState::Live.can_transition_to(SessionState::Live));
        assert!(!SessionState::Initialized.can_transition_to(SessionState::Ended));
        assert!(!SessionState::Ended.can_transition_to(SessionState::Live));
    }

    #[test]
    fn test_chat_settings_patch_validation() {
        let settings = ChatSettings::default();
        let patch = ChatSettingsPatch {
            max_message_length: Some(0),
            ..Default::default()
        };
        assert!(settings.patched(&patch).validate().is_err());

        let patch = ChatSettingsPatch {
            slow_mode_seconds: Some(5),
            subscriber_only: Some(true),
            ..Default::default()
        };
        let next = settings.patched(&patch);
        assert!(next.validate().is_ok());
        assert_eq!(next.slow_mode_seconds, 5);
        assert!(next.subscriber_only);
        assert_eq!(next.max_message_length, 500);
    }
}
