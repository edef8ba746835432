use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaidEventKind {
    SuperChat,
    Donation,
    Subscription,
    Tip,
}

impl PaidEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaidEventKind::SuperChat => "super_chat",
            PaidEventKind::Donation => "donation",
            PaidEventKind::Subscription => "subscription",
            PaidEventKind::Tip => "tip",
        }
    }
}

/// Super chat highlight colors, declared coolest to hottest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierColor {
    Blue,
    Cyan,
    Green,
    Yellow,
    Orange,
    Red,
}

impl TierColor {
    pub fn hex(&self) -> &'static str {
        match self {
            TierColor::Blue => "#1565C0",
            TierColor::Cyan => "#00B8D4",
            TierColor::Green => "#00BFA5",
            TierColor::Yellow => "#FFB300",
            TierColor::Orange => "#E65100",
            TierColor::Red => "#D00000",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperChatTier {
    /// Smallest amount that lands in this tier
    pub threshold: f64,
    pub color: TierColor,
    pub pin_duration_seconds: u64,
}

impl SuperChatTier {
    pub fn new(threshold: f64, color: TierColor, pin_duration_seconds: u64) -> Self {
        Self {
            threshold,
            color,
            pin_duration_seconds,
        }
    }
}

pub fn default_super_chat_ladder() -> Vec<SuperChatTier> {
    vec![
        SuperChatTier::new(1.0, TierColor::Blue, 30),
        SuperChatTier::new(5.0, TierColor::Cyan, 60),
        SuperChatTier::new(10.0, TierColor::Green, 120),
        SuperChatTier::new(20.0, TierColor::Yellow, 180),
        SuperChatTier::new(50.0, TierColor::Orange, 240),
        SuperChatTier::new(100.0, TierColor::Red, 300),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionTier {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub currency: String,
    pub badge_color: String,
    pub benefits: Vec<String>,
}

pub fn default_subscription_tiers(currency: &str) -> Vec<SubscriptionTier> {
    vec![
        SubscriptionTier {
            id: "tier1".to_string(),
            name: "Supporter".to_string(),
            price: 4.99,
            currency: currency.to_string(),
            badge_color: "#8E24AA".to_string(),
            benefits: vec!["subscriber badge".to_string(), "custom emotes".to_string()],
        },
        SubscriptionTier {
            id: "tier2".to_string(),
            name: "Champion".to_string(),
            price: 9.99,
            currency: currency.to_string(),
            badge_color: "#1E88E5".to_string(),
            benefits: vec![
                "subscriber badge".to_string(),
                "custom emotes".to_string(),
                "ad-free viewing".to_string(),
            ],
        },
        SubscriptionTier {
            id: "tier3".to_string(),
            name: "Legend".to_string(),
            price: 24.99,
            currency: currency.to_string(),
            badge_color: "#F4511E".to_string(),
            benefits: vec![
                "subscriber badge".to_string(),
                "custom emotes".to_string(),
                "ad-free viewing".to_string(),
                "priority chat highlight".to_string(),
            ],
        },
    ]
}

/// Kind-specific metadata of a recorded paid event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaidEventDetails {
    SuperChat {
        tier: SuperChatTier,
    },
    Donation,
    Subscription {
        tier_id: String,
        tier_name: String,
        badge_color: String,
        benefits: Vec<String>,
    },
    Tip,
}

impl PaidEventDetails {
    pub fn kind(&self) -> PaidEventKind {
        match self {
            PaidEventDetails::SuperChat { .. } => PaidEventKind::SuperChat,
            PaidEventDetails::Donation => PaidEventKind::Donation,
            PaidEventDetails::Subscription { .. } => PaidEventKind::Subscription,
            PaidEventDetails::Tip => PaidEventKind::Tip,
        }
    }
}

/// Immutable record of a captured paid event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonetizationEvent {
    pub id: Uuid,
    pub details: PaidEventDetails,
    pub user_id: String,
    pub username: String,
    pub amount: f64,
    pub currency: String,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub transaction_id: Option<String>,
}

impl MonetizationEvent {
    pub fn kind(&self) -> PaidEventKind {
        self.details.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorSummary {
    pub user_id: String,
    pub username: String,
    pub total: f64,
    pub transaction_count: u64,
    pub first_event_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RevenueMetrics {
    pub total_revenue: f64,
    pub revenue_by_type: BTreeMap<PaidEventKind, f64>,
    pub transaction_count: u64,
    pub average_transaction: f64,
    pub top_donor: Option<DonorSummary>,
    /// Keyed by the start of each hour
    pub revenue_by_hour: BTreeMap<DateTime<Utc>, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_ladder_heats_up() {
        let ladder = default_super_chat_ladder();
        for pair in ladder.windows(2) {
            assert!(pair[0].threshold < pair[1].threshold);
            assert!(pair[0].color < pair[1].color);
            assert!(pair[0].pin_duration_seconds < pair[1].pin_duration_seconds);
        }
    }

    #[test]
    fn test_details_serialize_with_type_tag() {
        let details = PaidEventDetails::Subscription {
            tier_id: "tier1".into(),
            tier_name: "Supporter".into(),
            badge_color: "#8E24AA".into(),
            benefits: vec![],
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["type"], "subscription");
        assert_eq!(details.kind(), PaidEventKind::Subscription);
    }
}
