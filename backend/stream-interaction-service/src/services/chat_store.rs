use super::event_bus::EventBus;
use crate::error::{EngineError, Result};
use crate::models::{
    ChatMessage, ChatSettings, ChatSettingsPatch, ChatStatistics, ChatUser, MessageId,
    MessageKind, NewChatMessage, OutboundEvent,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use validator::Validate;

/// Ordered message log and roster for one session.
///
/// Messages are never physically removed; deletion tombstones them so the
/// audit trail stays intact. Ids start at 1 and map directly onto the log.
pub struct ChatStore {
    bus: EventBus,
    settings: ChatSettings,
    messages: Vec<ChatMessage>,
    users: HashMap<String, ChatUser>,
    owner_id: Option<String>,
    /// Moderator roles outlive a leave/join cycle
    moderators: HashSet<String>,
    last_chat_at: HashMap<String, DateTime<Utc>>,
    peak_users: usize,
}

impl ChatStore {
    pub fn new(bus: EventBus, settings: ChatSettings) -> Self {
        Self {
            bus,
            settings,
            messages: Vec::new(),
            users: HashMap::new(),
            owner_id: None,
            moderators: HashSet::new(),
            last_chat_at: HashMap::new(),
            peak_users: 0,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// All-or-nothing: an invalid patch leaves the settings untouched
    pub fn update_settings(&mut self, patch: &ChatSettingsPatch) -> Result<ChatSettings> {
        let next = self.settings.patched(patch);
        next.validate()?;
        info!(
            session_id = %self.bus.session_id(),
            max_message_length = next.max_message_length,
            slow_mode_seconds = next.slow_mode_seconds,
            subscriber_only = next.subscriber_only,
            "chat settings updated"
        );
        self.settings = next.clone();
        Ok(next)
    }

    pub fn set_owner(&mut self, owner_id: impl Into<String>) {
        let owner_id = owner_id.into();
        if let Some(user) = self.users.get_mut(&owner_id) {
            user.is_owner = true;
        }
        self.owner_id = Some(owner_id);
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }

    pub fn is_moderator(&self, user_id: &str) -> bool {
        self.moderators.contains(user_id)
    }

    /// Chat-mode gate for plain messages. Paid messages bypass it.
    pub fn admit(&self, user_id: &str) -> Result<()> {
        if self.is_owner(user_id) || self.is_moderator(user_id) {
            return Ok(());
        }

        if self.settings.subscriber_only {
            let subscribed = self
                .users
                .get(user_id)
                .map(|u| u.is_subscriber)
                .unwrap_or(false);
            if !subscribed {
                return Err(EngineError::Permission(
                    "chat is in subscriber-only mode".to_string(),
                ));
            }
        }

        if self.settings.slow_mode_seconds > 0 {
            if let Some(last) = self.last_chat_at.get(user_id) {
                let interval = Duration::seconds(self.settings.slow_mode_seconds as i64);
                let elapsed = self.bus.now() - *last;
                if elapsed < interval {
                    let wait = (interval - elapsed).num_seconds().max(1);
                    return Err(EngineError::validation(format!(
                        "slow mode is on, wait {}s before sending another message",
                        wait
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn append_message(&mut self, msg: NewChatMessage) -> Result<ChatMessage> {
        let body = msg.body.trim();
        if body.is_empty() {
            return Err(EngineError::validation("message body is empty"));
        }
        let length = body.chars().count();
        if length > self.settings.max_message_length {
            return Err(EngineError::validation(format!(
                "message is {} characters, maximum is {}",
                length, self.settings.max_message_length
            )));
        }
        if msg.user_id.trim().is_empty() {
            return Err(EngineError::validation("message has no author"));
        }

        let now = self.bus.now();
        let message = ChatMessage {
            id: MessageId(self.messages.len() as u64 + 1),
            user_id: msg.user_id,
            username: msg.username,
            body: body.to_string(),
            timestamp: now,
            kind: msg.kind,
            paid_metadata: msg.paid_metadata,
            deleted: false,
            deleted_by: None,
            deleted_at: None,
        };

        if message.kind == MessageKind::Message {
            self.last_chat_at.insert(message.user_id.clone(), now);
        }

        debug!(
            session_id = %self.bus.session_id(),
            message_id = %message.id,
            user_id = %message.user_id,
            kind = message.kind.as_str(),
            "message appended"
        );

        self.messages.push(message.clone());
        Ok(message)
    }

    fn slot(&self, id: MessageId) -> Option<usize> {
        let index = id.0.checked_sub(1)? as usize;
        (index < self.messages.len()).then_some(index)
    }

    pub fn message(&self, id: MessageId) -> Option<&ChatMessage> {
        self.slot(id).map(|i| &self.messages[i])
    }

    /// Tombstones a message and announces its removal. Deleting an already
    /// removed message returns it unchanged without a second announcement.
    pub fn delete_message(&mut self, id: MessageId, moderator_id: &str) -> Result<ChatMessage> {
        let index = self
            .slot(id)
            .ok_or_else(|| EngineError::not_found("message", id))?;
        let now = self.bus.now();
        let message = &mut self.messages[index];

        if message.deleted {
            return Ok(message.clone());
        }

        message.deleted = true;
        message.deleted_by = Some(moderator_id.to_string());
        message.deleted_at = Some(now);
        let removed = message.clone();

        self.bus.publish(OutboundEvent::MessageRemoved {
            message_id: removed.id,
            user_id: removed.user_id.clone(),
            moderator_id: moderator_id.to_string(),
        });
        Ok(removed)
    }

    /// Reverses a tombstone after a false positive
    pub fn restore_message(&mut self, id: MessageId) -> Result<ChatMessage> {
        let index = self
            .slot(id)
            .ok_or_else(|| EngineError::not_found("message", id))?;
        let message = &mut self.messages[index];

        if !message.deleted {
            return Err(EngineError::validation(format!(
                "message {} is not removed",
                id
            )));
        }

        message.deleted = false;
        message.deleted_by = None;
        message.deleted_at = None;
        let restored = message.clone();

        self.bus.publish(OutboundEvent::MessageRestored {
            message: restored.clone(),
        });
        Ok(restored)
    }

    /// Adds the user, or refreshes the existing record on a repeated join
    pub fn join_user(&mut self, mut user: ChatUser) {
        user.is_owner = self.is_owner(&user.id);
        user.is_moderator = user.is_moderator || self.moderators.contains(&user.id);
        if user.is_moderator {
            self.moderators.insert(user.id.clone());
        }

        let rejoin = self.users.insert(user.id.clone(), user).is_some();
        self.peak_users = self.peak_users.max(self.users.len());

        debug!(
            session_id = %self.bus.session_id(),
            active_users = self.users.len(),
            rejoin,
            "user joined"
        );
    }

    pub fn leave_user(&mut self, user_id: &str) {
        if self.users.remove(user_id).is_some() {
            debug!(
                session_id = %self.bus.session_id(),
                user_id = %user_id,
                active_users = self.users.len(),
                "user left"
            );
        }
    }

    pub fn user(&self, user_id: &str) -> Option<&ChatUser> {
        self.users.get(user_id)
    }

    pub fn list_users(&self) -> Vec<ChatUser> {
        self.users.values().cloned().collect()
    }

    /// Marks a connected user as subscribed after a subscription is recorded
    pub fn grant_subscription(&mut self, user_id: &str, tier_id: &str) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.is_subscriber = true;
            user.subscription_tier = Some(tier_id.to_string());
            user.badges.insert("subscriber".to_string());
        }
    }

    pub fn find_user_by_name(&self, username: &str) -> Option<&ChatUser> {
        self.users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
    }

    /// Grants the moderator role to a connected user, looked up by name
    pub fn add_moderator(&mut self, username: &str) -> Result<ChatUser> {
        let user_id = self
            .find_user_by_name(username)
            .map(|u| u.id.clone())
            .ok_or_else(|| EngineError::not_found("user", username))?;

        self.moderators.insert(user_id.clone());
        let user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| EngineError::not_found("user", username))?;
        user.is_moderator = true;
        user.badges.insert("moderator".to_string());

        info!(session_id = %self.bus.session_id(), user_id = %user_id, "moderator added");
        Ok(user.clone())
    }

    pub fn remove_moderator(&mut self, user_id: &str) -> Result<()> {
        if self.is_owner(user_id) {
            return Err(EngineError::validation(
                "the stream owner cannot be removed as moderator",
            ));
        }
        if !self.moderators.remove(user_id) {
            return Err(EngineError::not_found("moderator", user_id));
        }
        if let Some(user) = self.users.get_mut(user_id) {
            user.is_moderator = false;
            user.badges.remove("moderator");
        }

        info!(session_id = %self.bus.session_id(), user_id = %user_id, "moderator removed");
        Ok(())
    }

    pub fn moderators(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.moderators.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Messages of one user inside the trailing window, oldest first.
    /// Tombstoned messages are included: deleting spam must not reset the count.
    pub fn recent_messages(&self, user_id: &str, window_seconds: u64) -> Vec<&ChatMessage> {
        let cutoff = self.bus.now() - Duration::seconds(window_seconds as i64);
        let mut recent: Vec<&ChatMessage> = self
            .messages
            .iter()
            .rev()
            .take_while(|m| m.timestamp >= cutoff)
            .filter(|m| m.user_id == user_id)
            .collect();
        recent.reverse();
        recent
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn visible_messages(&self, limit: usize) -> Vec<&ChatMessage> {
        let mut visible: Vec<&ChatMessage> = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.is_visible())
            .take(limit)
            .collect();
        visible.reverse();
        visible
    }

    pub fn statistics(&self, moderation_action_count: usize) -> ChatStatistics {
        ChatStatistics {
            message_count: self.messages.len(),
            deleted_message_count: self.messages.iter().filter(|m| m.deleted).count(),
            active_user_count: self.users.len(),
            peak_user_count: self.peak_users,
            moderation_action_count,
        }
    }
}
