//! tgdigest Test Utilities
//!
//! Centralized test infrastructure for the tgdigest workspace:
//! - A scripted model capability standing in for the model service
//! - Test fixtures for the end-to-end digest scenarios
//! - Proptest generators for windows and messages
//! - Custom assertions for pipeline result invariants

// Re-export core types for convenience
pub use tgdigest_core::{
    ContextConfig, ConversationWindow, DeadLetterRecord, DeliveryStatus, DigestConfig, ErrorCode,
    GroupId, LlmError, Message, MessageId, ModelResponse, PipelineResult, ReplyRef, StageMode,
    StageName, TenantId, Timestamp, WindowId,
};
pub use tgdigest_llm::{InvokeRequest, ModelCapability};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// SCRIPTED MODEL
// ============================================================================

type Outcome = Result<String, LlmError>;

/// Model capability answering from a script.
///
/// Queued outcomes for a `(stage, mode)` pair are served first, in order.
/// Once the queue is empty the stage's default outcome is served on every
/// call. Unscripted stages answer with `InvalidResponse`.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    defaults: HashMap<StageName, Outcome>,
    delays: HashMap<StageName, Duration>,
    queued: Mutex<HashMap<(StageName, StageMode), VecDeque<Outcome>>>,
    calls: Mutex<Vec<InvokeRequest>>,
    not_ready: AtomicBool,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stage answers with its well-formed fixture (scenario A).
    pub fn well_formed() -> Self {
        StageName::ALL
            .into_iter()
            .fold(Self::new(), |model, stage| {
                model.with_response(stage, fixtures::well_formed_response(stage))
            })
    }

    /// Default answer of a stage, for every mode.
    pub fn with_response(mut self, stage: StageName, text: impl Into<String>) -> Self {
        self.defaults.insert(stage, Ok(text.into()));
        self
    }

    /// Every call of a stage fails with `error`.
    pub fn with_failure(mut self, stage: StageName, error: LlmError) -> Self {
        self.defaults.insert(stage, Err(error));
        self
    }

    /// Calls of a stage take `delay` before answering.
    pub fn with_delay(mut self, stage: StageName, delay: Duration) -> Self {
        self.delays.insert(stage, delay);
        self
    }

    /// Queue one outcome for one mode of a stage.
    pub fn enqueue(&self, stage: StageName, mode: StageMode, outcome: Outcome) {
        self.queued
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry((stage, mode))
            .or_default()
            .push_back(outcome);
    }

    pub fn set_ready(&self, ready: bool) {
        self.not_ready.store(!ready, Ordering::SeqCst);
    }

    /// Requests received so far, in call order.
    pub fn calls(&self) -> Vec<InvokeRequest> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn calls_for(&self, stage: StageName) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|c| c.stage == stage)
            .count()
    }

    fn next_outcome(&self, stage: StageName, mode: StageMode) -> Outcome {
        let queued = self
            .queued
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(&(stage, mode))
            .and_then(VecDeque::pop_front);
        queued.unwrap_or_else(|| {
            self.defaults.get(&stage).cloned().unwrap_or_else(|| {
                Err(LlmError::InvalidResponse {
                    provider: "scripted".to_string(),
                    reason: format!("no script for {}", stage),
                })
            })
        })
    }
}

#[async_trait]
impl ModelCapability for ScriptedModel {
    async fn invoke(&self, request: InvokeRequest) -> Result<ModelResponse, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());
        let outcome = self.next_outcome(request.stage, request.mode);
        if let Some(delay) = self.delays.get(&request.stage) {
            tokio::time::sleep(*delay).await;
        }
        outcome.map(|text| ModelResponse {
            text,
            model: request.model_alias.clone(),
            prompt_alias: request.prompt_alias.clone(),
        })
    }

    async fn is_ready(&self) -> bool {
        !self.not_ready.load(Ordering::SeqCst)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use tgdigest_core::{RetryConfig, Timestamp};

    pub const DELIVER_SCOPE: &str = "digest:deliver";

    pub const SYNTHESIS_SUMMARY: &str =
        "<p>The team agreed to ship the release on Friday now that the migration fix has landed.</p>";

    pub fn window_start() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 10, 1, 10, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Window descriptor for `tenant` holding the given scopes.
    pub fn window(tenant: &str, scopes: &[&str]) -> ConversationWindow {
        let start = window_start();
        ConversationWindow {
            window_id: WindowId::now_v7(),
            group_id: GroupId(-1001),
            tenant_id: TenantId::new(tenant),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            window_start: start,
            window_end: start + ChronoDuration::hours(2),
            message_count: 2,
            participant_count: 2,
        }
    }

    pub fn message(window: &ConversationWindow, id: MessageId, sender: &str, minute: i64, text: &str) -> Message {
        Message {
            id,
            group_id: window.group_id,
            tenant_id: window.tenant_id.clone(),
            sender_username: Some(sender.to_string()),
            sender_tg_id: 1000 + id,
            posted_at: Some(window.window_start + ChronoDuration::minutes(minute)),
            content: text.to_string(),
            reply_to: None,
            reaction_count: 0,
            has_media: false,
        }
    }

    /// Two messages, the second replying to the first.
    pub fn scenario_messages(window: &ConversationWindow) -> Vec<Message> {
        let first = message(
            window,
            1,
            "alice",
            5,
            "Should we ship the release on Friday or wait for the migration fix?",
        );
        let mut second = message(
            window,
            2,
            "bob",
            7,
            "Friday works, the migration fix landed this morning.",
        );
        second.reply_to = Some(ReplyRef { message_id: 1 });
        vec![first, second]
    }

    /// Scenario window with the delivery scope granted.
    pub fn scenario() -> (ConversationWindow, Vec<Message>) {
        let window = window("acme", &["digest:read", DELIVER_SCOPE]);
        let messages = scenario_messages(&window);
        (window, messages)
    }

    /// Config with fast retries suitable for paused-clock tests.
    pub fn digest_config() -> DigestConfig {
        let mut config = DigestConfig {
            retry: RetryConfig {
                initial_interval_ms: 10,
                multiplier: 2.0,
                max_interval_ms: 100,
                max_attempts: 2,
                jitter: false,
            },
            ..DigestConfig::default()
        };
        config.pipeline.call_timeout_ms = 1_000;
        config.pipeline.run_deadline_ms = 30_000;
        config.quality.threshold = 0.6;
        config
    }

    pub fn segmentation_json() -> String {
        "```json\n{\"threads\": [{\"thread_id\": \"t1\", \"title\": \"Release timing\", \"message_ids\": [1, 2]}]}\n```"
            .to_string()
    }

    pub fn emotion_json() -> String {
        serde_json::json!({
            "tone": "positive",
            "intensity": 0.4,
            "conflict": 0.05,
            "collaboration": 0.9,
            "stress": 0.1,
            "enthusiasm": 0.6
        })
        .to_string()
    }

    pub fn roles_json() -> String {
        serde_json::json!({
            "participants": [{
                "username": "alice",
                "roles": [{"name": "initiator", "weight": 0.9}],
                "dominant_role": "initiator",
                "message_ids": [1],
                "comment": "Opened the release discussion"
            }]
        })
        .to_string()
    }

    pub fn topics_json() -> String {
        topics_json_with(&["Friday release"])
    }

    pub fn topics_json_with(titles: &[&str]) -> String {
        let topics: Vec<serde_json::Value> = titles
            .iter()
            .map(|title| {
                serde_json::json!({
                    "title": title,
                    "priority": "high",
                    "msg_count": 2,
                    "threads": ["t1"],
                    "summary": "Team agreed to ship on Friday"
                })
            })
            .collect();
        serde_json::json!({ "topics": topics }).to_string()
    }

    pub fn synthesis_json() -> String {
        serde_json::json!({ "summary_html": SYNTHESIS_SUMMARY }).to_string()
    }

    pub fn evaluation_json(quality_score: f64) -> String {
        serde_json::json!({
            "faithfulness": 0.8,
            "coherence": 0.75,
            "coverage": 0.7,
            "focus": 0.8,
            "quality_score": quality_score,
            "notes": "covers the release decision"
        })
        .to_string()
    }

    /// Well-formed output of a stage; evaluation scores 0.78.
    pub fn well_formed_response(stage: StageName) -> String {
        match stage {
            StageName::Segmentation => segmentation_json(),
            StageName::Emotion => emotion_json(),
            StageName::Roles => roles_json(),
            StageName::Topics => topics_json(),
            StageName::Synthesis => synthesis_json(),
            StageName::Evaluation => evaluation_json(0.78),
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;

    const PHRASES: [&str; 6] = [
        "deploy is scheduled for friday",
        "deploy is scheduled for friday!",
        "who owns the migration script",
        "lunch at noon anyone",
        "the flaky test is fixed in main",
        "please review the release notes",
    ];

    /// Message content drawn from a small vocabulary so duplicates are common.
    pub fn arb_content() -> impl Strategy<Value = String> {
        prop_oneof![
            proptest::sample::select(PHRASES.to_vec()).prop_map(str::to_string),
            "[a-z ]{0,60}",
        ]
    }

    /// Content, minute offset (`None` marks a malformed message), reply seed,
    /// reactions, media flag and sender index.
    fn arb_message_parts() -> impl Strategy<Value = (String, Option<i64>, Option<u8>, u32, bool, u8)> {
        (
            arb_content(),
            proptest::option::weighted(0.95, 0i64..120),
            proptest::option::of(0u8..40),
            0u32..20,
            any::<bool>(),
            0u8..6,
        )
    }

    /// A window and up to `max` messages, ids ascending in insertion order.
    pub fn arb_window_input(max: usize) -> impl Strategy<Value = (ConversationWindow, Vec<Message>)> {
        proptest::collection::vec(arb_message_parts(), 0..=max).prop_map(|parts| {
            let window = fixtures::window("prop", &[fixtures::DELIVER_SCOPE]);
            let messages = parts
                .into_iter()
                .enumerate()
                .map(|(i, (content, minute, reply, reactions, media, sender))| {
                    let id = i as MessageId + 1;
                    Message {
                        id,
                        group_id: window.group_id,
                        tenant_id: window.tenant_id.clone(),
                        sender_username: Some(format!("user{}", sender)),
                        sender_tg_id: i64::from(sender),
                        posted_at: minute.map(|m| window.window_start + ChronoDuration::minutes(m)),
                        content,
                        reply_to: reply
                            .map(|r| i64::from(r) % id)
                            .filter(|target| *target > 0)
                            .map(|message_id| ReplyRef { message_id }),
                        reaction_count: reactions,
                        has_media: media,
                    }
                })
                .collect();
            (window, messages)
        })
    }

    /// Quality score in [0, 1].
    pub fn arb_quality_score() -> impl Strategy<Value = f64> {
        0.0f64..=1.0
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// When evaluation ran, `quality_pass` is false iff a quality dead letter exists.
    pub fn assert_quality_invariant(result: &PipelineResult) {
        if result.evaluation.is_some() {
            assert_eq!(
                !result.quality_pass,
                result.has_quality_dead_letter(),
                "quality_pass={} but dlq_events={:?}",
                result.quality_pass,
                result.dlq_events
            );
        }
    }

    /// Skipped runs are exactly the runs blocked by a failure.
    pub fn assert_skip_matches_status(result: &PipelineResult) {
        assert_eq!(
            result.skip,
            result.delivery.status == DeliveryStatus::BlockedFailure,
            "skip={} status={:?}",
            result.skip,
            result.delivery.status
        );
    }

    /// Exactly one dead letter carries `code`.
    pub fn assert_single_dead_letter(result: &PipelineResult, code: &ErrorCode) -> DeadLetterRecord {
        let matching: Vec<&DeadLetterRecord> = result.dlq_with_code(code).collect();
        assert_eq!(matching.len(), 1, "expected one {} record in {:?}", code, result.dlq_events);
        matching[0].clone()
    }
}
