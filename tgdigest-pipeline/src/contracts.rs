//! Output contracts of the analytical stages
//!
//! Each stage has one validation function turning raw model text into a typed
//! payload or a `ContractError`. Nothing is coerced: a number sent as a string,
//! an unknown enum value or a missing key is a violation.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tgdigest_core::{
    ContractError, EmotionMetrics, Evaluation, MessageId, ParticipantProfile, RoleName, RoleWeight,
    StageName, Thread, Tone, Topic, TopicPriority,
};

type Object = Map<String, Value>;

// ============================================================================
// EXTRACTION
// ============================================================================

/// Strip Markdown code fences and surrounding prose, returning the outermost
/// JSON object text.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // Drop the info string (e.g. `json`) on the fence line
        body = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        body = body.trim_end();
        body = body.strip_suffix("```").unwrap_or(body);
    }
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&body[start..=end])
}

fn parse_object(stage: StageName, text: &str) -> Result<Object, ContractError> {
    let json = extract_json_object(text).ok_or_else(|| ContractError::Parse {
        stage,
        reason: "no JSON object found".to_string(),
    })?;
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ContractError::Parse {
            stage,
            reason: "top-level value is not an object".to_string(),
        }),
        Err(e) => Err(ContractError::Parse {
            stage,
            reason: e.to_string(),
        }),
    }
}

// ============================================================================
// FIELD ACCESS
// ============================================================================

struct Fields<'a> {
    stage: StageName,
    obj: &'a Object,
    path: String,
}

impl<'a> Fields<'a> {
    fn root(stage: StageName, obj: &'a Object) -> Self {
        Self {
            stage,
            obj,
            path: String::new(),
        }
    }

    fn name(&self, field: &str) -> String {
        if self.path.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.path, field)
        }
    }

    fn invalid(&self, field: &str, reason: impl Into<String>) -> ContractError {
        ContractError::InvalidValue {
            stage: self.stage,
            field: self.name(field),
            reason: reason.into(),
        }
    }

    fn get(&self, field: &str) -> Result<&'a Value, ContractError> {
        match self.obj.get(field) {
            Some(Value::Null) | None => Err(ContractError::MissingField {
                stage: self.stage,
                field: self.name(field),
            }),
            Some(value) => Ok(value),
        }
    }

    fn string(&self, field: &str) -> Result<String, ContractError> {
        self.get(field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(field, "expected a string"))
    }

    fn non_empty_string(&self, field: &str) -> Result<String, ContractError> {
        let value = self.string(field)?;
        if value.trim().is_empty() {
            return Err(self.invalid(field, "must not be empty"));
        }
        Ok(value)
    }

    fn unit(&self, field: &str) -> Result<f64, ContractError> {
        let value = self
            .get(field)?
            .as_f64()
            .ok_or_else(|| self.invalid(field, "expected a number"))?;
        if !(0.0..=1.0).contains(&value) {
            return Err(self.invalid(field, format!("{} is outside [0, 1]", value)));
        }
        Ok(value)
    }

    fn count(&self, field: &str) -> Result<u32, ContractError> {
        self.get(field)?
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| self.invalid(field, "expected a non-negative integer"))
    }

    fn array(&self, field: &str) -> Result<&'a Vec<Value>, ContractError> {
        self.get(field)?
            .as_array()
            .ok_or_else(|| self.invalid(field, "expected an array"))
    }

    fn ids(&self, field: &str) -> Result<Vec<MessageId>, ContractError> {
        self.array(field)?
            .iter()
            .map(|v| v.as_i64().ok_or_else(|| self.invalid(field, "expected integer message ids")))
            .collect()
    }

    fn strings(&self, field: &str) -> Result<Vec<String>, ContractError> {
        self.array(field)?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid(field, "expected an array of strings"))
            })
            .collect()
    }

    /// Objects of an array field, each with its own path for error reporting.
    fn objects(&self, field: &str) -> Result<Vec<Fields<'a>>, ContractError> {
        self.array(field)?
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let obj = v
                    .as_object()
                    .ok_or_else(|| self.invalid(field, format!("element {} is not an object", i)))?;
                Ok(Fields {
                    stage: self.stage,
                    obj,
                    path: format!("{}[{}]", self.name(field), i),
                })
            })
            .collect()
    }

    fn variant<T: Copy>(
        &self,
        field: &str,
        all: &[T],
        as_str: impl Fn(&T) -> &'static str,
    ) -> Result<T, ContractError> {
        let raw = self.string(field)?;
        all.iter()
            .find(|candidate| as_str(candidate) == raw)
            .copied()
            .ok_or_else(|| ContractError::UnknownVariant {
                stage: self.stage,
                field: self.name(field),
                value: raw,
            })
    }
}

const PRIORITIES: [TopicPriority; 3] = [TopicPriority::High, TopicPriority::Medium, TopicPriority::Low];

// ============================================================================
// STAGE CONTRACTS
// ============================================================================

/// `{threads: [{thread_id, title, message_ids}]}`; every id must be in the
/// ranked context.
pub fn segmentation(text: &str, known_ids: &HashSet<MessageId>) -> Result<Vec<Thread>, ContractError> {
    let stage = StageName::Segmentation;
    let obj = parse_object(stage, text)?;
    let root = Fields::root(stage, &obj);

    root.objects("threads")?
        .into_iter()
        .map(|t| {
            let message_ids = t.ids("message_ids")?;
            if let Some(unknown) = message_ids.iter().find(|id| !known_ids.contains(id)) {
                return Err(t.invalid(
                    "message_ids",
                    format!("message {} is not in the ranked context", unknown),
                ));
            }
            Ok(Thread {
                thread_id: t.non_empty_string("thread_id")?,
                title: t.string("title")?,
                message_ids,
            })
        })
        .collect()
}

/// `{tone, intensity, conflict, collaboration, stress, enthusiasm}`.
pub fn emotion(text: &str) -> Result<EmotionMetrics, ContractError> {
    let stage = StageName::Emotion;
    let obj = parse_object(stage, text)?;
    let f = Fields::root(stage, &obj);
    Ok(EmotionMetrics {
        tone: f.variant("tone", &Tone::ALL, Tone::as_str)?,
        intensity: f.unit("intensity")?,
        conflict: f.unit("conflict")?,
        collaboration: f.unit("collaboration")?,
        stress: f.unit("stress")?,
        enthusiasm: f.unit("enthusiasm")?,
    })
}

/// `{participants: [{username, roles, dominant_role, message_ids, comment}]}`.
pub fn roles(text: &str) -> Result<Vec<ParticipantProfile>, ContractError> {
    let stage = StageName::Roles;
    let obj = parse_object(stage, text)?;
    let root = Fields::root(stage, &obj);

    root.objects("participants")?
        .into_iter()
        .map(|p| {
            let roles = p
                .objects("roles")?
                .into_iter()
                .map(|r| {
                    Ok(RoleWeight {
                        name: r.variant("name", &RoleName::ALL, RoleName::as_str)?,
                        weight: r.unit("weight")?,
                    })
                })
                .collect::<Result<Vec<_>, ContractError>>()?;
            let dominant_role = p.variant("dominant_role", &RoleName::ALL, RoleName::as_str)?;
            if !roles.iter().any(|r| r.name == dominant_role) {
                return Err(p.invalid(
                    "dominant_role",
                    format!("{} is not among the listed roles", dominant_role.as_str()),
                ));
            }
            Ok(ParticipantProfile {
                username: p.non_empty_string("username")?,
                roles,
                dominant_role,
                message_ids: p.ids("message_ids")?,
                comment: p.string("comment")?,
            })
        })
        .collect()
}

/// `{topics: [{title, priority, msg_count, threads, summary}]}`.
pub fn topics(text: &str) -> Result<Vec<Topic>, ContractError> {
    let stage = StageName::Topics;
    let obj = parse_object(stage, text)?;
    let root = Fields::root(stage, &obj);

    root.objects("topics")?
        .into_iter()
        .map(|t| {
            Ok(Topic {
                title: t.non_empty_string("title")?,
                priority: t.variant("priority", &PRIORITIES, TopicPriority::as_str)?,
                msg_count: t.count("msg_count")?,
                threads: t.strings("threads")?,
                summary: t.string("summary")?,
            })
        })
        .collect()
}

/// `{summary_html}` or `{summary}`; shorter than `min_chars` is low information.
pub fn synthesis(text: &str, min_chars: usize) -> Result<String, ContractError> {
    let stage = StageName::Synthesis;
    let obj = parse_object(stage, text)?;
    let f = Fields::root(stage, &obj);

    let field = if obj.contains_key("summary_html") {
        "summary_html"
    } else {
        "summary"
    };
    let summary = f.non_empty_string(field)?;
    let chars = summary.trim().chars().count();
    if chars < min_chars {
        return Err(ContractError::LowInformation {
            stage,
            chars,
            min: min_chars,
        });
    }
    Ok(summary)
}

/// `{faithfulness, coherence, coverage, focus, quality_score, notes}`.
pub fn evaluation(text: &str) -> Result<Evaluation, ContractError> {
    let stage = StageName::Evaluation;
    let obj = parse_object(stage, text)?;
    let f = Fields::root(stage, &obj);
    Ok(Evaluation {
        faithfulness: f.unit("faithfulness")?,
        coherence: f.unit("coherence")?,
        coverage: f.unit("coverage")?,
        focus: f.unit("focus")?,
        quality_score: f.unit("quality_score")?,
        notes: f.string("notes")?,
    })
}
