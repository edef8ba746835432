use crate::models::{AutoModSettings, ChatMessage, ModerationRule, RuleKind};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:https?://|www\.)[^\s]+").expect("URL regex pattern is valid")
});

/// Why a spam rule fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamSignal {
    Duplicates(usize),
    Flood(usize),
}

/// Stateless checks for each rule kind, plus a compile cache for regex rules.
///
/// A pattern that fails to compile is cached as a miss so the warning is
/// logged once per distinct pattern rather than once per message.
#[derive(Default)]
pub struct RuleMatcher {
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl RuleMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reason string when `rule` matches `message`, None otherwise.
    /// `history` is the author's messages inside the spam window.
    pub fn check(
        &self,
        rule: &ModerationRule,
        message: &ChatMessage,
        history: &[&ChatMessage],
        settings: &AutoModSettings,
    ) -> Option<String> {
        match rule.kind {
            RuleKind::Keyword => {
                matched_keyword(&rule.pattern, &message.body).map(|t| format!("blocked term \"{}\"", t))
            }
            RuleKind::Regex => self
                .matches_regex(&rule.id, &rule.pattern, &message.body)
                .then(|| format!("matched pattern rule {}", rule.id)),
            RuleKind::Spam => spam_signal(message, history, settings).map(|signal| match signal {
                SpamSignal::Duplicates(n) => format!(
                    "spam: {} identical messages within {}s",
                    n, settings.spam_window_secs
                ),
                SpamSignal::Flood(n) => format!(
                    "spam: {} messages within {}s",
                    n, settings.spam_window_secs
                ),
            }),
            RuleKind::ExcessiveCaps => has_excessive_caps(
                &message.body,
                settings.caps_threshold,
                settings.caps_min_letters as usize,
            )
            .then(|| "excessive capitalization".to_string()),
            RuleKind::Link => contains_link(&message.body).then(|| "links are not allowed".to_string()),
        }
    }

    pub fn matches_regex(&self, rule_id: &str, pattern: &str, text: &str) -> bool {
        let mut compiled = self.compiled.lock();
        let entry = compiled.entry(pattern.to_string()).or_insert_with(|| {
            match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!(
                        rule_id = %rule_id,
                        pattern = %pattern,
                        error = %e,
                        "invalid regex in moderation rule, treating as non-match"
                    );
                    None
                }
            }
        });
        entry.as_ref().map(|r| r.is_match(text)).unwrap_or(false)
    }

    pub fn cached_patterns(&self) -> usize {
        self.compiled.lock().len()
    }

    /// Drops cached compilations whose pattern is not in `live`
    pub fn retain_patterns<'a>(&self, live: impl IntoIterator<Item = &'a str>) {
        let live: HashSet<&str> = live.into_iter().collect();
        self.compiled.lock().retain(|pattern, _| live.contains(pattern.as_str()));
    }
}

/// Case-insensitive substring match against pipe-delimited terms
pub fn matched_keyword<'a>(pattern: &'a str, text: &str) -> Option<&'a str> {
    let normalized = text.to_lowercase();
    pattern
        .split('|')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .find(|term| normalized.contains(&term.to_lowercase()))
}

/// Uppercase ratio above `threshold`, only once there are enough letters to judge
pub fn has_excessive_caps(text: &str, threshold: f64, min_letters: usize) -> bool {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();

    if letters.len() < min_letters {
        return false;
    }

    let caps_count = letters.iter().filter(|c| c.is_uppercase()).count();
    let caps_ratio = caps_count as f64 / letters.len() as f64;

    caps_ratio > threshold
}

pub fn contains_link(text: &str) -> bool {
    URL_PATTERN.is_match(text)
}

fn normalize_body(body: &str) -> String {
    body.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Duplicate bodies or flooding inside the window. The message under
/// evaluation counts once whether or not it is already in `history`.
pub fn spam_signal(
    message: &ChatMessage,
    history: &[&ChatMessage],
    settings: &AutoModSettings,
) -> Option<SpamSignal> {
    let others: Vec<&&ChatMessage> = history.iter().filter(|m| m.id != message.id).collect();
    let body = normalize_body(&message.body);

    let duplicates = 1 + others
        .iter()
        .filter(|m| normalize_body(&m.body) == body)
        .count();
    if duplicates >= settings.spam_duplicate_threshold as usize {
        return Some(SpamSignal::Duplicates(duplicates));
    }

    let total = 1 + others.len();
    if total > settings.spam_rate_limit as usize {
        return Some(SpamSignal::Flood(total));
    }

    None
}
