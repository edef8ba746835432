// Shared fixtures for the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use stream_interaction_service::models::{
    InboundEvent, InboundPayload, PaidRequest, StreamMetadata,
};
use stream_interaction_service::services::{
    ChargeRequest, ManualClock, PaymentOutcome, PaymentProcessor, SandboxPaymentProcessor,
    StaticDirectory, StreamOrchestrator, UserProfile,
};
use stream_interaction_service::{Config, Result};
use tokio::sync::Notify;
use uuid::Uuid;

pub const OWNER: &str = "owner-1";

pub fn metadata() -> StreamMetadata {
    StreamMetadata {
        stream_id: Uuid::new_v4(),
        title: "Late night build".to_string(),
        owner_id: OWNER.to_string(),
        owner_username: "streamer".to_string(),
        category: Some("software".to_string()),
    }
}

pub fn directory() -> StaticDirectory {
    StaticDirectory::with_profiles(vec![
        UserProfile::new("sub-1", "subscriber").with_tier("tier1"),
        UserProfile::new("vip-1", "vip").with_badge("vip"),
    ])
}

pub fn orchestrator_with(
    config: &Config,
    clock: &ManualClock,
    payments: Arc<dyn PaymentProcessor>,
) -> StreamOrchestrator {
    StreamOrchestrator::new(
        Uuid::new_v4(),
        config,
        Arc::new(clock.clone()),
        payments,
        Arc::new(directory()),
    )
}

/// Initialized and live, with the default sandbox processor
pub fn live_orchestrator(clock: &ManualClock) -> StreamOrchestrator {
    let mut orch = orchestrator_with(
        &Config::default(),
        clock,
        Arc::new(SandboxPaymentProcessor::default()),
    );
    orch.initialize_stream(metadata()).expect("initialize");
    orch.start_live_stream().expect("start");
    orch
}

pub fn chat(session_id: Uuid, user_id: &str, body: &str) -> InboundEvent {
    InboundEvent {
        session_id,
        user_id: user_id.to_string(),
        payload: InboundPayload::Chat {
            username: user_id.to_string(),
            body: body.to_string(),
        },
    }
}

pub fn join(session_id: Uuid, user_id: &str, username: &str) -> InboundEvent {
    InboundEvent {
        session_id,
        user_id: user_id.to_string(),
        payload: InboundPayload::Join {
            username: username.to_string(),
            badges: BTreeSet::new(),
        },
    }
}

pub fn leave(session_id: Uuid, user_id: &str) -> InboundEvent {
    InboundEvent {
        session_id,
        user_id: user_id.to_string(),
        payload: InboundPayload::Leave,
    }
}

pub fn paid(session_id: Uuid, user_id: &str, request: PaidRequest) -> InboundEvent {
    InboundEvent {
        session_id,
        user_id: user_id.to_string(),
        payload: InboundPayload::PaidMessage(request),
    }
}

pub fn super_chat(amount: f64, message: &str) -> PaidRequest {
    PaidRequest::SuperChat {
        username: "payer".to_string(),
        amount,
        currency: None,
        message: message.to_string(),
    }
}

pub fn donation(amount: f64) -> PaidRequest {
    PaidRequest::Donation {
        username: "payer".to_string(),
        amount,
        currency: None,
        message: None,
    }
}

/// Processor that parks every charge until the test releases it
#[derive(Default)]
pub struct GatedProcessor {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl PaymentProcessor for GatedProcessor {
    async fn authorize_and_capture(&self, request: &ChargeRequest) -> Result<PaymentOutcome> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(PaymentOutcome::Approved {
            transaction_id: format!("gated-{}", request.payer_id),
        })
    }
}

/// Declines every charge
pub struct DecliningProcessor;

#[async_trait]
impl PaymentProcessor for DecliningProcessor {
    async fn authorize_and_capture(&self, _request: &ChargeRequest) -> Result<PaymentOutcome> {
        Ok(PaymentOutcome::Declined {
            error_code: "insufficient_funds".to_string(),
        })
    }
}
