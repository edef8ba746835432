use crate::error::Result;
use crate::models::ChatUser;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Profile data owned by the identity directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub badges: BTreeSet<String>,
    #[serde(default)]
    pub subscription_tier: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            badges: BTreeSet::new(),
            subscription_tier: None,
        }
    }

    pub fn with_tier(mut self, tier_id: impl Into<String>) -> Self {
        self.subscription_tier = Some(tier_id.into());
        self
    }

    pub fn with_badge(mut self, badge: impl Into<String>) -> Self {
        self.badges.insert(badge.into());
        self
    }

    /// Fold the directory view into a roster entry built from a join event
    pub fn enrich(&self, user: &mut ChatUser) {
        user.badges.extend(self.badges.iter().cloned());
        if let Some(tier) = &self.subscription_tier {
            user.is_subscriber = true;
            user.subscription_tier = Some(tier.clone());
        }
    }
}

/// Read-only user lookup
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>>;
}

pub type SharedDirectory = Arc<dyn IdentityDirectory>;

/// In-memory directory, used by the binary and in tests
#[derive(Debug, Default)]
pub struct StaticDirectory {
    profiles: DashMap<String, UserProfile>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        let directory = Self::new();
        for profile in profiles {
            directory.insert(profile);
        }
        directory
    }

    pub fn insert(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(user_id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_and_enrich() {
        let directory = StaticDirectory::with_profiles(vec![UserProfile::new("u1", "alice")
            .with_tier("tier2")
            .with_badge("founder")]);

        let profile = directory.lookup("u1").await.unwrap().unwrap();
        let mut user = ChatUser::new("u1", "alice");
        profile.enrich(&mut user);

        assert!(user.is_subscriber);
        assert_eq!(user.subscription_tier.as_deref(), Some("tier2"));
        assert!(user.badges.contains("founder"));
        assert!(directory.lookup("nobody").await.unwrap().is_none());
    }
}
