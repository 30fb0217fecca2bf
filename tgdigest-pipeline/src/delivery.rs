//! Delivery authorizer
//!
//! Decides whether a digest may leave the pipeline. Precedence: a failed run
//! is `blocked_failure`; otherwise a missing scope is `blocked_rbac` whatever
//! the quality verdict; otherwise a failed verdict is `blocked_quality`.

use tgdigest_core::{ConversationWindow, Delivery, DeliveryConfig, DeliveryStatus};

/// Scope check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    MissingScope(String),
}

#[derive(Debug, Clone)]
pub struct DeliveryAuthorizer {
    required_scope: String,
    format: String,
}

impl DeliveryAuthorizer {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            required_scope: config.required_scope.clone(),
            format: config.format.clone(),
        }
    }

    pub fn required_scope(&self) -> &str {
        &self.required_scope
    }

    pub fn authorize(&self, window: &ConversationWindow) -> Authorization {
        if window.has_scope(&self.required_scope) {
            Authorization::Granted
        } else {
            Authorization::MissingScope(self.required_scope.clone())
        }
    }

    fn delivery(&self, status: DeliveryStatus, reason: Option<String>) -> Delivery {
        Delivery {
            status,
            format: self.format.clone(),
            reason,
        }
    }

    /// Delivery for a run that stopped before producing a digest.
    pub fn failed(&self, reason: impl Into<String>) -> Delivery {
        self.delivery(DeliveryStatus::BlockedFailure, Some(reason.into()))
    }

    /// Delivery for an evaluated digest.
    pub fn decide(
        &self,
        authorization: &Authorization,
        quality_pass: bool,
        quality_score: f64,
        threshold: f64,
    ) -> Delivery {
        match authorization {
            Authorization::MissingScope(scope) => self.delivery(
                DeliveryStatus::BlockedRbac,
                Some(format!("missing required scope: {}", scope)),
            ),
            Authorization::Granted if !quality_pass => self.delivery(
                DeliveryStatus::BlockedQuality,
                Some(format!(
                    "quality score {:.2} below threshold {:.2}",
                    quality_score, threshold
                )),
            ),
            Authorization::Granted => self.delivery(DeliveryStatus::Pending, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tgdigest_core::{GroupId, TenantId, WindowId};

    fn window(scopes: &[&str]) -> ConversationWindow {
        ConversationWindow {
            window_id: WindowId::now_v7(),
            group_id: GroupId(1),
            tenant_id: TenantId::new("acme"),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            message_count: 0,
            participant_count: 0,
        }
    }

    #[test]
    fn test_missing_scope_beats_quality() {
        let authorizer = DeliveryAuthorizer::new(&DeliveryConfig::default());
        let auth = authorizer.authorize(&window(&["digest:read"]));
        assert_eq!(auth, Authorization::MissingScope("digest:deliver".to_string()));

        let delivery = authorizer.decide(&auth, false, 0.3, 0.6);
        assert_eq!(delivery.status, DeliveryStatus::BlockedRbac);
        assert!(delivery.reason.unwrap().contains("digest:deliver"));
    }

    #[test]
    fn test_granted_delivery_follows_quality() {
        let authorizer = DeliveryAuthorizer::new(&DeliveryConfig::default());
        let auth = authorizer.authorize(&window(&["digest:deliver"]));
        assert_eq!(auth, Authorization::Granted);

        let pending = authorizer.decide(&auth, true, 0.78, 0.6);
        assert_eq!(pending.status, DeliveryStatus::Pending);
        assert_eq!(pending.format, "html");
        assert!(pending.reason.is_none());

        let blocked = authorizer.decide(&auth, false, 0.51, 0.6);
        assert_eq!(blocked.status, DeliveryStatus::BlockedQuality);
        assert_eq!(blocked.reason.as_deref(), Some("quality score 0.51 below threshold 0.60"));
    }

    #[test]
    fn test_failed_delivery() {
        let authorizer = DeliveryAuthorizer::new(&DeliveryConfig::default());
        let delivery = authorizer.failed("synthesis_failed");
        assert_eq!(delivery.status, DeliveryStatus::BlockedFailure);
        assert_eq!(delivery.reason.as_deref(), Some("synthesis_failed"));
    }
}
