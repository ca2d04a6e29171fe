use std::sync::Arc;

use chrono::Utc;

use crate::{config::QuotaConfig, domain::entities::entitlement::PlanTier};

use super::session_entitlement::SessionEntitlement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    LimitReached { limit: u32 },
}

/// Decides access to paid features from the entitlement the backend
/// confirmed this session. Cached entitlements never unlock anything here.
#[derive(Clone)]
pub struct FeatureGate {
    session: Arc<SessionEntitlement>,
    quotas: QuotaConfig,
}

impl FeatureGate {
    pub fn new(session: Arc<SessionEntitlement>, quotas: QuotaConfig) -> Self {
        Self { session, quotas }
    }

    pub fn plan(&self) -> PlanTier {
        match self.session.current() {
            Some(e) if e.is_active && !e.is_expired_at(Utc::now()) => e.plan,
            _ => PlanTier::Free,
        }
    }

    /// May the user create another idea, given how many they have?
    pub fn check_idea_quota(&self, current_ideas: u32) -> QuotaDecision {
        self.check(current_ideas, self.quotas.free_idea_limit)
    }

    /// May the user send another message in an idea thread?
    pub fn check_message_quota(&self, current_messages: u32) -> QuotaDecision {
        self.check(current_messages, self.quotas.free_messages_per_idea)
    }

    fn check(&self, current: u32, free_limit: u32) -> QuotaDecision {
        match self.plan() {
            PlanTier::Pro => QuotaDecision::Allowed,
            PlanTier::Free if current < free_limit => QuotaDecision::Allowed,
            PlanTier::Free => QuotaDecision::LimitReached { limit: free_limit },
        }
    }
}
