//! Structured input variables sent with each stage prompt

use serde_json::{json, Value};
use tgdigest_context::BuiltContext;
use tgdigest_core::{EmotionMetrics, Evaluation, ParticipantProfile, StageName, Thread, Topic};

/// Validated outputs of the stages completed so far in one run.
#[derive(Debug, Clone, Default)]
pub struct StageOutputs {
    pub threads: Vec<Thread>,
    pub metrics: Option<EmotionMetrics>,
    pub participants: Vec<ParticipantProfile>,
    pub topics: Vec<Topic>,
    pub summary: Option<String>,
    pub evaluation: Option<Evaluation>,
}

/// Ranked context as prompt input, in chronological order.
pub fn context_messages(context: &BuiltContext) -> Value {
    Value::Array(
        context
            .chronological()
            .into_iter()
            .map(|ranked| {
                let m = &ranked.message;
                json!({
                    "id": m.id,
                    "sender": m.sender_label(),
                    "posted_at": m.posted_at,
                    "text": m.content,
                    "reply_to": m.reply_target(),
                    "reactions": m.reaction_count,
                    "has_media": m.has_media,
                    "score": ranked.score,
                })
            })
            .collect(),
    )
}

/// Variables for `stage`: the ranked context plus the prior-stage outputs it reads.
pub fn for_stage(
    stage: StageName,
    context: &BuiltContext,
    outputs: &StageOutputs,
    variant: Option<&str>,
    format: &str,
) -> Value {
    let mut vars = json!({
        "messages": context_messages(context),
        "history_links": context.history_links,
    });
    let extra = match stage {
        StageName::Segmentation => json!({}),
        StageName::Emotion => json!({ "threads": outputs.threads }),
        StageName::Roles => json!({
            "threads": outputs.threads,
            "metrics": outputs.metrics,
        }),
        StageName::Topics => json!({
            "threads": outputs.threads,
            "participants": outputs.participants,
        }),
        StageName::Synthesis => json!({
            "threads": outputs.threads,
            "metrics": outputs.metrics,
            "participants": outputs.participants,
            "topics": outputs.topics,
            "format": format,
        }),
        StageName::Evaluation => json!({
            "topics": outputs.topics,
            "summary": outputs.summary,
        }),
    };
    if let (Some(target), Value::Object(extra)) = (vars.as_object_mut(), extra) {
        target.extend(extra);
        if let Some(variant) = variant {
            target.insert("variant".to_string(), Value::String(variant.to_string()));
        }
    }
    vars
}
