use super::chat_store::ChatStore;
use super::event_bus::EventBus;
use super::rule_matcher::RuleMatcher;
use crate::config::ModerationConfig;
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::models::{
    ActionType, AutoModSettings, AutoModSettingsPatch, ChatMessage, ManualAction,
    ModerationAction, ModerationRule, ModerationStats, ModeratorCount, OutboundEvent, RuleKind,
    RulePatch, Sensitivity, UserModerationState, SYSTEM_MODERATOR,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Timeout applied by a timeout rule that does not name its own duration
pub const DEFAULT_RULE_TIMEOUT_SECS: u64 = 300;

/// Longest timeout a rule or an operator may impose (30 days)
pub const MAX_TIMEOUT_SECS: u64 = 30 * 24 * 60 * 60;

const TOP_MODERATOR_LIMIT: usize = 5;

/// Settings and rule enablement captured when emergency mode starts
#[derive(Debug, Clone)]
struct EmergencySnapshot {
    settings: AutoModSettings,
    enabled: HashMap<String, bool>,
}

/// Rule evaluation and the per-user warn/timeout/ban state machine.
///
/// All user state lives in `states` and is only touched from `execute`, so
/// auto and manual actions go through the same bookkeeping.
pub struct ModerationEngine {
    bus: EventBus,
    settings: AutoModSettings,
    rules: Vec<ModerationRule>,
    states: HashMap<String, UserModerationState>,
    actions: Vec<ModerationAction>,
    matcher: RuleMatcher,
    emergency: Option<EmergencySnapshot>,
}

impl ModerationEngine {
    pub fn new(bus: EventBus, settings: AutoModSettings, rules: Vec<ModerationRule>) -> Self {
        Self {
            bus,
            settings,
            rules,
            states: HashMap::new(),
            actions: Vec::new(),
            matcher: RuleMatcher::new(),
            emergency: None,
        }
    }

    pub fn from_config(bus: EventBus, config: &ModerationConfig) -> Self {
        Self::new(bus, config.auto_mod_settings(), Self::default_rules(config))
    }

    /// Built-in rule set in evaluation order. Links are off until an
    /// operator turns them on.
    pub fn default_rules(config: &ModerationConfig) -> Vec<ModerationRule> {
        let mut rules = Vec::new();
        if !config.blocked_terms.is_empty() {
            rules.push(
                ModerationRule::new("blocked-terms", RuleKind::Keyword, ActionType::Delete)
                    .with_pattern(config.blocked_terms.join("|"))
                    .with_severity(6),
            );
        }
        rules.push(
            ModerationRule::new("spam", RuleKind::Spam, ActionType::Timeout)
                .with_severity(6)
                .with_duration(DEFAULT_RULE_TIMEOUT_SECS),
        );
        rules.push(
            ModerationRule::new("excessive-caps", RuleKind::ExcessiveCaps, ActionType::Warn)
                .with_severity(4),
        );
        rules.push(
            ModerationRule::new("links", RuleKind::Link, ActionType::Delete)
                .with_severity(5)
                .disabled(),
        );
        rules
    }

    // ---- user state -------------------------------------------------------

    /// Current state of a user, with any elapsed timeout folded back in
    pub fn user_state(&self, user_id: &str) -> UserModerationState {
        let now = self.bus.now();
        self.states
            .get(user_id)
            .map(|s| s.settled(now))
            .unwrap_or_else(|| UserModerationState::clean(user_id))
    }

    pub fn user_states(&self) -> Vec<UserModerationState> {
        let now = self.bus.now();
        let mut states: Vec<UserModerationState> =
            self.states.values().map(|s| s.settled(now)).collect();
        states.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        states
    }

    pub fn is_banned(&self, user_id: &str) -> bool {
        self.states.get(user_id).map(|s| s.is_banned).unwrap_or(false)
    }

    pub fn is_user_timed_out(&self, user_id: &str) -> bool {
        let now = self.bus.now();
        self.states
            .get(user_id)
            .map(|s| s.is_timed_out(now))
            .unwrap_or(false)
    }

    fn state_mut(&mut self, user_id: &str) -> &mut UserModerationState {
        let now = self.bus.now();
        let state = self
            .states
            .entry(user_id.to_string())
            .or_insert_with(|| UserModerationState::clean(user_id));
        state.settle(now);
        state
    }

    // ---- evaluation -------------------------------------------------------

    /// Decides what, if anything, should happen to `message`. Nothing is
    /// recorded; pass the result to `apply` to execute it.
    pub fn evaluate(&self, message: &ChatMessage, store: &ChatStore) -> Option<ModerationAction> {
        let user_id = message.user_id.as_str();

        if self.is_banned(user_id) {
            return Some(self.auto_action(ActionType::Delete, message, "user is banned", None));
        }
        if self.is_user_timed_out(user_id) {
            return Some(self.auto_action(ActionType::Delete, message, "user is timed out", None));
        }

        if !self.settings.enabled {
            return None;
        }
        if store.is_owner(user_id) || store.is_moderator(user_id) {
            return None;
        }

        let min_severity = self.settings.sensitivity.min_severity();
        let history = store.recent_messages(user_id, self.settings.spam_window_secs);

        for rule in &self.rules {
            if !rule.enabled || !rule.auto_apply || rule.severity < min_severity {
                continue;
            }
            if let Some(reason) = self.matcher.check(rule, message, &history, &self.settings) {
                debug!(
                    session_id = %self.bus.session_id(),
                    rule_id = %rule.id,
                    user_id = %user_id,
                    message_id = %message.id,
                    "moderation rule matched"
                );
                let duration = match rule.action {
                    ActionType::Timeout => {
                        Some(rule.duration_seconds.unwrap_or(DEFAULT_RULE_TIMEOUT_SECS))
                    }
                    _ => None,
                };
                return Some(self.auto_action(rule.action, message, &reason, duration));
            }
        }

        None
    }

    fn auto_action(
        &self,
        action_type: ActionType,
        message: &ChatMessage,
        reason: &str,
        duration_seconds: Option<u64>,
    ) -> ModerationAction {
        ModerationAction {
            id: Uuid::new_v4(),
            action_type,
            target_user_id: message.user_id.clone(),
            moderator_id: SYSTEM_MODERATOR.to_string(),
            reason: reason.to_string(),
            timestamp: self.bus.now(),
            duration_seconds,
            message_id: Some(message.id),
        }
    }

    /// Evaluate then execute; returns the executed action, if any
    pub fn moderate(
        &mut self,
        message: &ChatMessage,
        store: &mut ChatStore,
    ) -> Result<Option<ModerationAction>> {
        match self.evaluate(message, store) {
            Some(action) => self.apply(action, store).map(Some),
            None => Ok(None),
        }
    }

    // ---- execution --------------------------------------------------------

    pub fn execute_manual_action(
        &mut self,
        request: ManualAction,
        store: &mut ChatStore,
    ) -> Result<ModerationAction> {
        if request.moderator_id.trim().is_empty() || request.moderator_id == SYSTEM_MODERATOR {
            return Err(EngineError::Permission(
                "manual actions need a human moderator".to_string(),
            ));
        }
        if request.target_user_id.trim().is_empty() {
            return Err(EngineError::validation("target user is required"));
        }
        if store.is_owner(&request.target_user_id) && request.action_type != ActionType::Approve {
            return Err(EngineError::Permission(
                "the stream owner cannot be moderated".to_string(),
            ));
        }

        let duration_seconds = match request.action_type {
            ActionType::Timeout => match request.duration_seconds {
                Some(0) => return Err(EngineError::validation("timeout duration must be positive")),
                Some(d) if d > MAX_TIMEOUT_SECS => {
                    return Err(EngineError::validation(format!(
                        "timeout duration {}s exceeds the {}s maximum",
                        d, MAX_TIMEOUT_SECS
                    )))
                }
                Some(d) => Some(d),
                None => Some(self.settings.escalation_timeout_secs),
            },
            _ => None,
        };

        let action = ModerationAction {
            id: Uuid::new_v4(),
            action_type: request.action_type,
            target_user_id: request.target_user_id,
            moderator_id: request.moderator_id,
            reason: request.reason,
            timestamp: self.bus.now(),
            duration_seconds,
            message_id: request.message_id,
        };
        self.apply(action, store)
    }

    /// Shared execution path for auto and manual actions. Every check that
    /// can fail runs before the first mutation.
    pub fn apply(
        &mut self,
        action: ModerationAction,
        store: &mut ChatStore,
    ) -> Result<ModerationAction> {
        if let Some(id) = action.message_id {
            let message = store
                .message(id)
                .ok_or_else(|| EngineError::not_found("message", id))?;
            if message.user_id != action.target_user_id {
                return Err(EngineError::validation(format!(
                    "message {} was not sent by {}",
                    id, action.target_user_id
                )));
            }
        }

        match action.action_type {
            ActionType::Delete | ActionType::Approve if action.message_id.is_none() => {
                return Err(EngineError::validation(format!(
                    "{} requires a message id",
                    action.action_type.as_str()
                )));
            }
            ActionType::Approve => {
                let deleted = action
                    .message_id
                    .and_then(|id| store.message(id))
                    .map(|m| m.deleted)
                    .unwrap_or(false);
                if !deleted {
                    return Err(EngineError::validation("only removed messages can be approved"));
                }
            }
            ActionType::Unban if !self.is_banned(&action.target_user_id) => {
                return Err(EngineError::validation(format!(
                    "user {} is not banned",
                    action.target_user_id
                )));
            }
            _ => {}
        }

        let mut escalation = None;
        match action.action_type {
            ActionType::Warn => escalation = self.warn(&action),
            ActionType::Timeout => self.timeout(&action),
            ActionType::Ban => self.ban(&action),
            ActionType::Unban => self.unban(&action),
            ActionType::Delete => {}
            ActionType::Approve => {
                if let Some(id) = action.message_id {
                    store.restore_message(id)?;
                }
            }
        }

        if action.action_type.removes_message() {
            if let Some(id) = action.message_id {
                store.delete_message(id, &action.moderator_id)?;
            }
        }

        self.record(action.clone());

        if let Some(timeout) = escalation {
            self.timeout(&timeout);
            self.record(timeout);
        }

        Ok(action)
    }

    /// Returns the synthesized timeout when this warning reaches the threshold.
    /// The counter resets in the same step, so a later warn starts a new cycle.
    fn warn(&mut self, action: &ModerationAction) -> Option<ModerationAction> {
        let threshold = self.settings.warnings_before_timeout;
        let escalation_secs = self.settings.escalation_timeout_secs;
        let now = self.bus.now();

        let state = self.state_mut(&action.target_user_id);
        if state.is_banned {
            return None;
        }
        state.warning_count += 1;
        let warning_count = state.warning_count;
        let escalate = warning_count >= threshold;
        if escalate {
            state.warning_count = 0;
        }

        self.bus.publish(OutboundEvent::UserWarned {
            user_id: action.target_user_id.clone(),
            warning_count,
            reason: action.reason.clone(),
        });

        escalate.then(|| {
            info!(
                session_id = %self.bus.session_id(),
                user_id = %action.target_user_id,
                warnings = warning_count,
                "warning threshold reached, escalating to timeout"
            );
            ModerationAction {
                id: Uuid::new_v4(),
                action_type: ActionType::Timeout,
                target_user_id: action.target_user_id.clone(),
                moderator_id: SYSTEM_MODERATOR.to_string(),
                reason: format!("escalation after {} warnings", warning_count),
                timestamp: now,
                duration_seconds: Some(escalation_secs),
                message_id: None,
            }
        })
    }

    fn timeout(&mut self, action: &ModerationAction) {
        let seconds = action
            .duration_seconds
            .unwrap_or(self.settings.escalation_timeout_secs);
        let now = self.bus.now();

        let state = self.state_mut(&action.target_user_id);
        if state.is_banned {
            return;
        }
        let until = i64::try_from(seconds.min(MAX_TIMEOUT_SECS))
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state.timeout_until = Some(until);

        self.bus.publish(OutboundEvent::UserTimedOut {
            user_id: action.target_user_id.clone(),
            until,
            reason: action.reason.clone(),
        });
    }

    fn ban(&mut self, action: &ModerationAction) {
        let state = self.state_mut(&action.target_user_id);
        state.is_banned = true;
        state.timeout_until = None;
        state.warning_count = 0;

        self.bus.publish(OutboundEvent::UserBanned {
            user_id: action.target_user_id.clone(),
            reason: action.reason.clone(),
        });
    }

    fn unban(&mut self, action: &ModerationAction) {
        let user_id = action.target_user_id.clone();
        self.states
            .insert(user_id.clone(), UserModerationState::clean(user_id.clone()));
        self.bus.publish(OutboundEvent::UserUnbanned { user_id });
    }

    fn record(&mut self, action: ModerationAction) {
        info!(
            session_id = %self.bus.session_id(),
            action = action.action_type.as_str(),
            user_id = %action.target_user_id,
            moderator_id = %action.moderator_id,
            reason = %action.reason,
            "moderation action executed"
        );
        metrics::record_moderation_action(action.action_type.as_str(), action.is_automatic());
        self.bus.publish(OutboundEvent::ModerationRecorded {
            action: action.clone(),
        });
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[ModerationAction] {
        &self.actions
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    // ---- rules ------------------------------------------------------------

    pub fn rules(&self) -> &[ModerationRule] {
        &self.rules
    }

    fn check_rule(rule: &ModerationRule) -> Result<()> {
        if rule.id.trim().is_empty() {
            return Err(EngineError::validation("rule id is required"));
        }
        if !(1..=10).contains(&rule.severity) {
            return Err(EngineError::validation("rule severity must be between 1 and 10"));
        }
        if matches!(rule.action, ActionType::Unban | ActionType::Approve) {
            return Err(EngineError::validation(format!(
                "{} is not a rule action",
                rule.action.as_str()
            )));
        }
        if matches!(rule.kind, RuleKind::Keyword | RuleKind::Regex) && rule.pattern.trim().is_empty() {
            return Err(EngineError::validation(format!(
                "{} rules need a pattern",
                rule.kind.as_str()
            )));
        }
        match rule.duration_seconds {
            Some(0) => {
                return Err(EngineError::validation("rule timeout duration must be positive"))
            }
            Some(d) if d > MAX_TIMEOUT_SECS => {
                return Err(EngineError::validation(format!(
                    "rule timeout duration {}s exceeds the {}s maximum",
                    d, MAX_TIMEOUT_SECS
                )))
            }
            _ => {}
        }
        Ok(())
    }

    pub fn add_rule(&mut self, rule: ModerationRule) -> Result<ModerationRule> {
        Self::check_rule(&rule)?;
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(EngineError::validation(format!("rule {} already exists", rule.id)));
        }
        if rule.kind == RuleKind::Regex && regex::Regex::new(&rule.pattern).is_err() {
            warn!(rule_id = %rule.id, "regex rule added with an invalid pattern, it will never match");
        }
        info!(session_id = %self.bus.session_id(), rule_id = %rule.id, kind = rule.kind.as_str(), "rule added");
        self.rules.push(rule.clone());
        Ok(rule)
    }

    pub fn update_rule(&mut self, rule_id: &str, patch: &RulePatch) -> Result<ModerationRule> {
        let index = self
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| EngineError::not_found("rule", rule_id))?;

        let mut next = self.rules[index].clone();
        if let Some(pattern) = &patch.pattern {
            next.pattern = pattern.clone();
        }
        if let Some(action) = patch.action {
            next.action = action;
        }
        if let Some(severity) = patch.severity {
            next.severity = severity;
        }
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(auto_apply) = patch.auto_apply {
            next.auto_apply = auto_apply;
        }
        if let Some(duration) = patch.duration_seconds {
            next.duration_seconds = Some(duration);
        }
        Self::check_rule(&next)?;

        info!(session_id = %self.bus.session_id(), rule_id = %rule_id, "rule updated");
        self.rules[index] = next.clone();
        self.prune_pattern_cache();
        Ok(next)
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> Result<ModerationRule> {
        let index = self
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| EngineError::not_found("rule", rule_id))?;
        info!(session_id = %self.bus.session_id(), rule_id = %rule_id, "rule removed");
        let removed = self.rules.remove(index);
        self.prune_pattern_cache();
        Ok(removed)
    }

    fn prune_pattern_cache(&self) {
        self.matcher.retain_patterns(
            self.rules
                .iter()
                .filter(|r| r.kind == RuleKind::Regex)
                .map(|r| r.pattern.as_str()),
        );
    }

    // ---- settings ---------------------------------------------------------

    pub fn settings(&self) -> &AutoModSettings {
        &self.settings
    }

    pub fn update_settings(&mut self, patch: &AutoModSettingsPatch) -> Result<AutoModSettings> {
        let next = self.settings.patched(patch);
        next.validate()?;
        info!(
            session_id = %self.bus.session_id(),
            enabled = next.enabled,
            sensitivity = ?next.sensitivity,
            "auto-moderation settings updated"
        );
        self.settings = next.clone();
        Ok(next)
    }

    pub fn emergency_mode(&self) -> bool {
        self.emergency.is_some()
    }

    /// Raises sensitivity to maximum and switches every rule on in one step.
    /// Calling it again while active changes nothing.
    pub fn enable_emergency_mode(&mut self) -> bool {
        if self.emergency.is_some() {
            return false;
        }

        self.emergency = Some(EmergencySnapshot {
            settings: self.settings.clone(),
            enabled: self
                .rules
                .iter()
                .map(|r| (r.id.clone(), r.enabled))
                .collect(),
        });
        self.settings.enabled = true;
        self.settings.sensitivity = Sensitivity::Maximum;
        for rule in &mut self.rules {
            rule.enabled = true;
        }

        warn!(session_id = %self.bus.session_id(), "emergency moderation mode enabled");
        true
    }

    /// Restores settings and rule enablement from before emergency mode.
    /// Rules added while it was active keep their current enablement.
    pub fn disable_emergency_mode(&mut self) -> bool {
        let Some(snapshot) = self.emergency.take() else {
            return false;
        };

        self.settings = snapshot.settings;
        for rule in &mut self.rules {
            if let Some(enabled) = snapshot.enabled.get(&rule.id) {
                rule.enabled = *enabled;
            }
        }

        info!(session_id = %self.bus.session_id(), "emergency moderation mode disabled");
        true
    }

    // ---- reporting --------------------------------------------------------

    pub fn stats(&self) -> ModerationStats {
        let mut actions_by_type: BTreeMap<ActionType, usize> = BTreeMap::new();
        let mut by_moderator: HashMap<&str, usize> = HashMap::new();
        let mut automatic = 0usize;

        for action in &self.actions {
            *actions_by_type.entry(action.action_type).or_insert(0) += 1;
            if action.is_automatic() {
                automatic += 1;
            } else {
                *by_moderator.entry(action.moderator_id.as_str()).or_insert(0) += 1;
            }
        }

        let mut top_moderators: Vec<ModeratorCount> = by_moderator
            .into_iter()
            .map(|(id, actions)| ModeratorCount {
                moderator_id: id.to_string(),
                actions,
            })
            .collect();
        top_moderators.sort_by(|a, b| {
            b.actions
                .cmp(&a.actions)
                .then_with(|| a.moderator_id.cmp(&b.moderator_id))
        });
        top_moderators.truncate(TOP_MODERATOR_LIMIT);

        let total_actions = self.actions.len();
        let auto_moderation_share = if total_actions == 0 {
            0.0
        } else {
            automatic as f64 / total_actions as f64
        };

        ModerationStats {
            total_actions,
            actions_by_type,
            top_moderators,
            auto_moderation_share,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatSettings, NewChatMessage};
    use crate::services::clock::ManualClock;
    use std::sync::Arc;

    struct Fixture {
        engine: ModerationEngine,
        store: ChatStore,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let bus = EventBus::new(Uuid::new_v4(), 256, Arc::new(clock.clone()));
        let store = ChatStore::new(bus.clone(), ChatSettings::default());
        let engine = ModerationEngine::from_config(bus, &ModerationConfig::default());
        Fixture {
            engine,
            store,
            clock,
        }
    }

    fn manual(action_type: ActionType, target: &str) -> ManualAction {
        ManualAction {
            action_type,
            target_user_id: target.to_string(),
            moderator_id: "mod-1".to_string(),
            reason: "manual".to_string(),
            duration_seconds: None,
            message_id: None,
        }
    }

    fn say(f: &mut Fixture, user: &str, body: &str) -> ChatMessage {
        f.store
            .append_message(NewChatMessage::text(user, user, body))
            .unwrap()
    }

    #[test]
    fn test_clean_message_passes() {
        let mut f = fixture();
        let msg = say(&mut f, "alice", "hello everyone");
        assert!(f.engine.evaluate(&msg, &f.store).is_none());
    }

    #[test]
    fn test_third_warning_escalates_once() {
        let mut f = fixture();
        for _ in 0..2 {
            f.engine
                .execute_manual_action(manual(ActionType::Warn, "bob"), &mut f.store)
                .unwrap();
        }
        assert_eq!(f.engine.user_state("bob").warning_count, 2);

        f.engine
            .execute_manual_action(manual(ActionType::Warn, "bob"), &mut f.store)
            .unwrap();
        let state = f.engine.user_state("bob");
        assert_eq!(state.warning_count, 0);
        assert!(f.engine.is_user_timed_out("bob"));

        let timeouts: Vec<_> = f
            .engine
            .actions()
            .iter()
            .filter(|a| a.action_type == ActionType::Timeout)
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert!(timeouts[0].is_automatic());
        assert_eq!(timeouts[0].duration_seconds, Some(300));
    }

    #[test]
    fn test_timeout_expires_on_read() {
        let mut f = fixture();
        let mut req = manual(ActionType::Timeout, "carol");
        req.duration_seconds = Some(60);
        f.engine.execute_manual_action(req, &mut f.store).unwrap();
        assert!(f.engine.is_user_timed_out("carol"));

        f.clock.advance_secs(61);
        assert!(!f.engine.is_user_timed_out("carol"));
        assert_eq!(f.engine.user_state("carol").timeout_until, None);
    }

    #[test]
    fn test_ban_clears_and_supersedes() {
        let mut f = fixture();
        f.engine
            .execute_manual_action(manual(ActionType::Warn, "dave"), &mut f.store)
            .unwrap();
        f.engine
            .execute_manual_action(manual(ActionType::Timeout, "dave"), &mut f.store)
            .unwrap();
        f.engine
            .execute_manual_action(manual(ActionType::Ban, "dave"), &mut f.store)
            .unwrap();

        let state = f.engine.user_state("dave");
        assert!(state.is_banned);
        assert_eq!(state.warning_count, 0);
        assert_eq!(state.timeout_until, None);

        let msg = say(&mut f, "dave", "hello");
        let action = f.engine.evaluate(&msg, &f.store).unwrap();
        assert_eq!(action.action_type, ActionType::Delete);
        assert_eq!(action.reason, "user is banned");

        // warnings do not accumulate while banned
        f.engine
            .execute_manual_action(manual(ActionType::Warn, "dave"), &mut f.store)
            .unwrap();
        assert_eq!(f.engine.user_state("dave").warning_count, 0);
    }

    #[test]
    fn test_unban_resets_and_requires_ban() {
        let mut f = fixture();
        let err = f
            .engine
            .execute_manual_action(manual(ActionType::Unban, "erin"), &mut f.store)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        f.engine
            .execute_manual_action(manual(ActionType::Ban, "erin"), &mut f.store)
            .unwrap();
        f.engine
            .execute_manual_action(manual(ActionType::Unban, "erin"), &mut f.store)
            .unwrap();
        assert_eq!(f.engine.user_state("erin"), UserModerationState::clean("erin"));
    }

    #[test]
    fn test_auto_delete_tombstones_message() {
        let mut f = fixture();
        f.engine
            .add_rule(
                ModerationRule::new("terms", RuleKind::Keyword, ActionType::Delete)
                    .with_pattern("scam"),
            )
            .unwrap();
        let msg = say(&mut f, "frank", "this is a SCAM");
        let action = f.engine.moderate(&msg, &mut f.store).unwrap().unwrap();

        assert_eq!(action.action_type, ActionType::Delete);
        assert!(action.is_automatic());
        assert!(f.store.message(msg.id).unwrap().deleted);
    }

    #[test]
    fn test_rule_order_first_match_wins() {
        let mut f = fixture();
        f.engine
            .add_rule(
                ModerationRule::new("shout-ban", RuleKind::Regex, ActionType::Ban)
                    .with_pattern("(?i)banme"),
            )
            .unwrap();
        // caps rule comes first in the set and matches too
        let msg = say(&mut f, "gina", "PLEASE BANME RIGHT NOW");
        let action = f.engine.evaluate(&msg, &f.store).unwrap();
        assert_eq!(action.action_type, ActionType::Warn);
    }

    #[test]
    fn test_sensitivity_filters_low_severity_rules() {
        let mut f = fixture();
        f.engine
            .update_settings(&AutoModSettingsPatch {
                sensitivity: Some(Sensitivity::Low),
                ..Default::default()
            })
            .unwrap();
        let msg = say(&mut f, "hank", "HELLO THIS IS ALL CAPS TEXT");
        assert!(f.engine.evaluate(&msg, &f.store).is_none());
    }

    #[test]
    fn test_emergency_mode_round_trip() {
        let mut f = fixture();
        let before_settings = f.engine.settings().clone();
        assert!(!f.engine.rules().iter().find(|r| r.id == "links").unwrap().enabled);

        assert!(f.engine.enable_emergency_mode());
        assert!(!f.engine.enable_emergency_mode());
        assert_eq!(f.engine.settings().sensitivity, Sensitivity::Maximum);
        assert!(f.engine.rules().iter().all(|r| r.enabled));

        let msg = say(&mut f, "ivan", "see https://example.com");
        assert_eq!(
            f.engine.evaluate(&msg, &f.store).unwrap().action_type,
            ActionType::Delete
        );

        assert!(f.engine.disable_emergency_mode());
        assert_eq!(f.engine.settings(), &before_settings);
        assert!(!f.engine.rules().iter().find(|r| r.id == "links").unwrap().enabled);
    }

    #[test]
    fn test_approve_restores_message() {
        let mut f = fixture();
        let msg = say(&mut f, "jill", "innocent");
        let mut req = manual(ActionType::Delete, "jill");
        req.message_id = Some(msg.id);
        f.engine.execute_manual_action(req, &mut f.store).unwrap();
        assert!(f.store.message(msg.id).unwrap().deleted);

        let mut req = manual(ActionType::Approve, "jill");
        req.message_id = Some(msg.id);
        f.engine.execute_manual_action(req.clone(), &mut f.store).unwrap();
        assert!(!f.store.message(msg.id).unwrap().deleted);

        // second approve has nothing to restore
        assert!(f.engine.execute_manual_action(req, &mut f.store).is_err());
        assert_eq!(f.engine.action_count(), 2);
    }

    #[test]
    fn test_rule_management_validation() {
        let mut f = fixture();
        assert!(f
            .engine
            .add_rule(ModerationRule::new("spam", RuleKind::Spam, ActionType::Warn))
            .is_err());
        assert!(f
            .engine
            .add_rule(ModerationRule::new("empty", RuleKind::Keyword, ActionType::Warn))
            .is_err());
        assert!(f
            .engine
            .add_rule(ModerationRule::new("bad", RuleKind::Spam, ActionType::Unban))
            .is_err());

        let updated = f
            .engine
            .update_rule(
                "links",
                &RulePatch {
                    enabled: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated.enabled);
        assert!(f.engine.update_rule("missing", &RulePatch::default()).is_err());
        assert!(f.engine.remove_rule("links").is_ok());
        assert!(matches!(
            f.engine.remove_rule("links"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_stats_scan_matches_log() {
        let mut f = fixture();
        let msg = say(&mut f, "kim", "HELLO THIS IS ALL CAPS TEXT");
        f.engine.moderate(&msg, &mut f.store).unwrap();
        f.engine
            .execute_manual_action(manual(ActionType::Ban, "lee"), &mut f.store)
            .unwrap();

        let stats = f.engine.stats();
        assert_eq!(stats.total_actions, 2);
        assert_eq!(stats.actions_by_type.get(&ActionType::Warn), Some(&1));
        assert_eq!(stats.actions_by_type.get(&ActionType::Ban), Some(&1));
        assert_eq!(stats.top_moderators[0].moderator_id, "mod-1");
        assert!((stats.auto_moderation_share - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_system_actor_rejected_for_manual_actions() {
        let mut f = fixture();
        let mut req = manual(ActionType::Warn, "mia");
        req.moderator_id = SYSTEM_MODERATOR.to_string();
        assert!(matches!(
            f.engine.execute_manual_action(req, &mut f.store),
            Err(EngineError::Permission(_))
        ));
    }

    /// Test: manual timeouts longer than the ceiling
    ///
    /// Verifies:
    /// - huge durations are rejected before anything is logged
    /// - the target is left untouched
    /// - the ceiling itself is accepted
    #[test]
    fn test_manual_timeout_duration_ceiling() {
        let mut f = fixture();
        for seconds in [MAX_TIMEOUT_SECS + 1, 100_000_000_000_000_000, u64::MAX] {
            let mut req = manual(ActionType::Timeout, "nora");
            req.duration_seconds = Some(seconds);
            assert!(matches!(
                f.engine.execute_manual_action(req, &mut f.store),
                Err(EngineError::Validation(_))
            ));
        }
        assert!(f.engine.actions().is_empty());
        assert!(!f.engine.is_user_timed_out("nora"));
        assert_eq!(f.engine.user_state("nora").timeout_until, None);

        let mut req = manual(ActionType::Timeout, "nora");
        req.duration_seconds = Some(MAX_TIMEOUT_SECS);
        f.engine.execute_manual_action(req, &mut f.store).unwrap();
        f.clock.advance_secs(MAX_TIMEOUT_SECS as i64 - 1);
        assert!(f.engine.is_user_timed_out("nora"));
        f.clock.advance_secs(2);
        assert!(!f.engine.is_user_timed_out("nora"));
    }

    #[test]
    fn test_rule_timeout_duration_ceiling() {
        let mut f = fixture();
        let err = f
            .engine
            .add_rule(
                ModerationRule::new("forever", RuleKind::Keyword, ActionType::Timeout)
                    .with_pattern("forever")
                    .with_duration(u64::MAX),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(f.engine.rules().iter().all(|r| r.id != "forever"));

        let before = f.engine.rules().to_vec();
        let err = f
            .engine
            .update_rule(
                "spam",
                &RulePatch {
                    duration_seconds: Some(MAX_TIMEOUT_SECS + 1),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(f.engine.rules(), before.as_slice());
    }

    /// Test: regex compilations follow the live rule set
    #[test]
    fn test_pattern_cache_drops_replaced_and_removed_rules() {
        let mut f = fixture();
        for (id, pattern) in [("order-ids", r"#\d{6}"), ("promo", r"(?i)promo\s*code")] {
            f.engine
                .add_rule(
                    ModerationRule::new(id, RuleKind::Regex, ActionType::Delete)
                        .with_pattern(pattern),
                )
                .unwrap();
        }
        let msg = say(&mut f, "omar", "just saying hello");
        assert!(f.engine.evaluate(&msg, &f.store).is_none());
        assert_eq!(f.engine.matcher.cached_patterns(), 2);

        for round in 0..5 {
            f.engine
                .update_rule(
                    "order-ids",
                    &RulePatch {
                        pattern: Some(format!(r"#\d{{{}}}", 6 + round)),
                        ..Default::default()
                    },
                )
                .unwrap();
            let msg = say(&mut f, &format!("viewer-{}", round), "still here");
            f.engine.evaluate(&msg, &f.store);
            assert_eq!(f.engine.matcher.cached_patterns(), 2);
        }

        f.engine.remove_rule("promo").unwrap();
        assert_eq!(f.engine.matcher.cached_patterns(), 1);
        f.engine.remove_rule("order-ids").unwrap();
        assert_eq!(f.engine.matcher.cached_patterns(), 0);
    }
}
