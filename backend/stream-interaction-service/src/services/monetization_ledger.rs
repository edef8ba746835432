use super::event_bus::EventBus;
use super::payment::{self, ChargeRequest, SharedPaymentProcessor};
use crate::config::MonetizationConfig;
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::models::{
    default_subscription_tiers, default_super_chat_ladder, DonorSummary, MonetizationEvent,
    OutboundEvent, PaidEventDetails, PaidEventKind, RevenueMetrics, SubscriptionTier,
    SuperChatTier,
};
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Start of the hour `timestamp` falls in
pub fn hour_bucket(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(Duration::hours(1))
        .unwrap_or(timestamp)
}

/// Incremental revenue aggregate. Folding the full event log into a fresh
/// accumulator yields the same figures as the running one.
#[derive(Debug, Clone, Default)]
struct RevenueAccumulator {
    metrics: RevenueMetrics,
    donors: HashMap<String, DonorSummary>,
}

impl RevenueAccumulator {
    fn add(&mut self, event: &MonetizationEvent) {
        let m = &mut self.metrics;
        m.total_revenue += event.amount;
        *m.revenue_by_type.entry(event.kind()).or_insert(0.0) += event.amount;
        m.transaction_count += 1;
        m.average_transaction = m.total_revenue / m.transaction_count as f64;
        *m.revenue_by_hour
            .entry(hour_bucket(event.timestamp))
            .or_insert(0.0) += event.amount;

        let donor = self
            .donors
            .entry(event.user_id.clone())
            .or_insert_with(|| DonorSummary {
                user_id: event.user_id.clone(),
                username: event.username.clone(),
                total: 0.0,
                transaction_count: 0,
                first_event_at: event.timestamp,
            });
        donor.total += event.amount;
        donor.transaction_count += 1;

        // first to reach a total keeps the lead on ties
        let replace = match &m.top_donor {
            None => true,
            Some(top) if top.user_id == donor.user_id => true,
            Some(top) => donor.total > top.total,
        };
        if replace {
            m.top_donor = Some(donor.clone());
        }
    }

    fn fold<'a>(events: impl Iterator<Item = &'a MonetizationEvent>) -> Self {
        let mut acc = Self::default();
        for event in events {
            acc.add(event);
        }
        acc
    }
}

/// Validates, tiers and records paid events for one session
pub struct MonetizationLedger {
    bus: EventBus,
    config: MonetizationConfig,
    /// Ascending by threshold
    ladder: Vec<SuperChatTier>,
    tiers: Vec<SubscriptionTier>,
    payments: SharedPaymentProcessor,
    events: Vec<MonetizationEvent>,
    running: RevenueAccumulator,
}

impl MonetizationLedger {
    pub fn new(bus: EventBus, config: MonetizationConfig, payments: SharedPaymentProcessor) -> Self {
        let tiers = default_subscription_tiers(&config.default_currency);
        Self {
            bus,
            config,
            ladder: default_super_chat_ladder(),
            tiers,
            payments,
            events: Vec::new(),
            running: RevenueAccumulator::default(),
        }
    }

    pub fn with_ladder(mut self, mut ladder: Vec<SuperChatTier>) -> Self {
        ladder.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
        self.ladder = ladder;
        self
    }

    pub fn with_subscription_tiers(mut self, tiers: Vec<SubscriptionTier>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn config(&self) -> &MonetizationConfig {
        &self.config
    }

    pub fn super_chat_ladder(&self) -> &[SuperChatTier] {
        &self.ladder
    }

    pub fn subscription_tiers(&self) -> &[SubscriptionTier] {
        &self.tiers
    }

    /// Highest tier whose threshold does not exceed `amount`; amounts below
    /// the ladder land in its first rung
    pub fn resolve_tier(&self, amount: f64) -> Option<&SuperChatTier> {
        self.ladder
            .iter()
            .rev()
            .find(|tier| tier.threshold <= amount)
            .or_else(|| self.ladder.first())
    }

    fn currency_or_default(&self, currency: Option<&str>) -> Result<String> {
        let currency = currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.config.default_currency.clone());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(EngineError::validation(format!(
                "unsupported currency code {:?}",
                currency
            )));
        }
        Ok(currency)
    }

    fn check_bounds(label: &str, amount: f64, min: f64, max: f64) -> Result<()> {
        if !amount.is_finite() || amount < min || amount > max {
            return Err(EngineError::validation(format!(
                "{} amount {} is outside {}..={}",
                label, amount, min, max
            )));
        }
        Ok(())
    }

    async fn charge(&self, user_id: &str, amount: f64, currency: &str, description: &str) -> Result<String> {
        let request = ChargeRequest {
            amount,
            currency: currency.to_string(),
            payer_id: user_id.to_string(),
            description: description.to_string(),
        };

        payment::capture(self.payments.as_ref(), &request, self.config.payment_timeout())
            .await
            .map_err(|e| {
                metrics::record_payment_failure();
                warn!(
                    session_id = %self.bus.session_id(),
                    user_id = %user_id,
                    amount,
                    error = %e,
                    "payment failed, event not recorded"
                );
                e
            })
    }

    pub async fn process_super_chat(
        &mut self,
        user_id: &str,
        username: &str,
        amount: f64,
        message: &str,
        currency: Option<&str>,
    ) -> Result<MonetizationEvent> {
        if !self.config.super_chat_enabled {
            return Err(EngineError::validation("super chat is disabled for this stream"));
        }
        Self::check_bounds(
            "super chat",
            amount,
            self.config.super_chat_min,
            self.config.super_chat_max,
        )?;
        let currency = self.currency_or_default(currency)?;
        let tier = self
            .resolve_tier(amount)
            .cloned()
            .ok_or_else(|| EngineError::Config("super chat ladder is empty".to_string()))?;

        let transaction_id = self.charge(user_id, amount, &currency, "super chat").await?;

        Ok(self.record(
            PaidEventDetails::SuperChat { tier },
            user_id,
            username,
            amount,
            currency,
            non_empty(message),
            Some(transaction_id),
        ))
    }

    pub async fn process_donation(
        &mut self,
        user_id: &str,
        username: &str,
        amount: f64,
        message: Option<&str>,
        currency: Option<&str>,
    ) -> Result<MonetizationEvent> {
        Self::check_bounds(
            "donation",
            amount,
            self.config.donation_min,
            self.config.donation_max,
        )?;
        let currency = self.currency_or_default(currency)?;

        let transaction_id = self.charge(user_id, amount, &currency, "donation").await?;

        Ok(self.record(
            PaidEventDetails::Donation,
            user_id,
            username,
            amount,
            currency,
            message.and_then(non_empty),
            Some(transaction_id),
        ))
    }

    pub fn process_subscription(
        &mut self,
        user_id: &str,
        username: &str,
        tier_id: &str,
    ) -> Result<MonetizationEvent> {
        let tier = self
            .tiers
            .iter()
            .find(|t| t.id == tier_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("subscription tier", tier_id))?;

        Ok(self.record(
            PaidEventDetails::Subscription {
                tier_id: tier.id,
                tier_name: tier.name,
                badge_color: tier.badge_color,
                benefits: tier.benefits,
            },
            user_id,
            username,
            tier.price,
            tier.currency,
            None,
            None,
        ))
    }

    pub fn process_tip(
        &mut self,
        user_id: &str,
        username: &str,
        amount: f64,
        currency: Option<&str>,
    ) -> Result<MonetizationEvent> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::validation("tip amount must be positive"));
        }
        let currency = self.currency_or_default(currency)?;

        Ok(self.record(
            PaidEventDetails::Tip,
            user_id,
            username,
            amount,
            currency,
            None,
            None,
        ))
    }

    /// Single write path for every paid event kind
    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        details: PaidEventDetails,
        user_id: &str,
        username: &str,
        amount: f64,
        currency: String,
        message: Option<String>,
        transaction_id: Option<String>,
    ) -> MonetizationEvent {
        let event = MonetizationEvent {
            id: Uuid::new_v4(),
            details,
            user_id: user_id.to_string(),
            username: username.to_string(),
            amount,
            currency,
            message,
            timestamp: self.bus.now(),
            transaction_id,
        };

        let kind = event.kind();
        match &event.details {
            PaidEventDetails::SuperChat { tier } => info!(
                session_id = %self.bus.session_id(),
                user_id = %user_id,
                amount,
                color = ?tier.color,
                pin_seconds = tier.pin_duration_seconds,
                "super chat recorded"
            ),
            PaidEventDetails::Subscription { tier_id, .. } => info!(
                session_id = %self.bus.session_id(),
                user_id = %user_id,
                tier_id = %tier_id,
                "subscription recorded"
            ),
            PaidEventDetails::Donation | PaidEventDetails::Tip => info!(
                session_id = %self.bus.session_id(),
                user_id = %user_id,
                amount,
                kind = kind.as_str(),
                "payment recorded"
            ),
        }

        self.running.add(&event);
        self.events.push(event.clone());
        metrics::record_revenue(kind.as_str(), amount);

        self.bus.publish(OutboundEvent::RevenueUpdated {
            event: event.clone(),
            metrics: self.running.metrics.clone(),
        });
        event
    }

    pub fn revenue(&self) -> &RevenueMetrics {
        &self.running.metrics
    }

    pub fn events(&self) -> &[MonetizationEvent] {
        &self.events
    }

    pub fn events_since(&self, since: DateTime<Utc>) -> Vec<&MonetizationEvent> {
        self.events.iter().filter(|e| e.timestamp >= since).collect()
    }

    /// Descending by cumulative amount; ties go to whoever paid first
    pub fn top_donors(&self, limit: usize) -> Vec<DonorSummary> {
        let mut donors: Vec<DonorSummary> = self.running.donors.values().cloned().collect();
        donors.sort_by(|a, b| {
            b.total
                .total_cmp(&a.total)
                .then_with(|| a.first_event_at.cmp(&b.first_event_at))
        });
        donors.truncate(limit);
        donors
    }

    /// Metrics over events in `[start, end)`, recomputed from the log
    pub fn revenue_by_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> RevenueMetrics {
        RevenueAccumulator::fold(
            self.events
                .iter()
                .filter(|e| e.timestamp >= start && e.timestamp < end),
        )
        .metrics
    }

    pub fn revenue_for_kind(&self, kind: PaidEventKind) -> f64 {
        self.running
            .metrics
            .revenue_by_type
            .get(&kind)
            .copied()
            .unwrap_or(0.0)
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
