use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::{
    error::AppError,
    storage::types::{
        artifact_revision::ArtifactRevision,
        semantic_event::{EventActor, EventCategory, EventSubject},
    },
};

use crate::llm_instructions::{
    get_event_canonicalization_schema, get_event_extraction_schema,
    EVENT_CANONICALIZATION_SYSTEM_MESSAGE, EVENT_EXTRACTION_SYSTEM_MESSAGE,
};

/// A piece of revision text handed to Phase A. Unchunked revisions pass a
/// single piece with `start_char` 0 and no chunk id.
#[derive(Debug, Clone)]
pub struct ExtractionChunk {
    pub chunk_id: Option<String>,
    pub content: String,
    pub start_char: usize,
}

/// A validated, artifact-relative event ready for the write path.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    pub category: EventCategory,
    pub event_time: Option<DateTime<Utc>>,
    pub narrative: String,
    pub subject: EventSubject,
    pub actors: Vec<EventActor>,
    pub confidence: f32,
    pub evidence: Vec<CanonicalEvidence>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvidence {
    pub quote: String,
    pub start_char: usize,
    pub end_char: usize,
    pub chunk_id: Option<String>,
}

/// LLM wire shapes. Unknown fields are ignored; missing required fields
/// fail the parse and the job goes terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEventList {
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub category: String,
    pub narrative: String,
    #[serde(default)]
    pub event_time: Option<String>,
    pub subject: RawSubject,
    pub actors: Vec<RawActor>,
    pub confidence: f64,
    pub evidence: Vec<RawSpan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSubject {
    #[serde(rename = "type")]
    pub subject_type: String,
    #[serde(rename = "ref")]
    pub subject_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawActor {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSpan {
    pub quote: String,
    pub start_char: i64,
    pub end_char: i64,
    #[serde(default)]
    pub chunk_id: Option<String>,
}

/// Seam between the worker and the LLM; tests script this.
#[async_trait]
pub trait EventExtractor: Send + Sync {
    async fn extract(
        &self,
        revision: &ArtifactRevision,
        content_len: usize,
        chunks: &[ExtractionChunk],
    ) -> Result<Vec<CanonicalEvent>, AppError>;
}

/// Two-phase LLM extraction: per-chunk structured extraction, then a
/// cross-chunk canonicalization pass.
pub struct LlmExtractionService {
    client: Arc<Client<OpenAIConfig>>,
    chat_model: String,
}

impl LlmExtractionService {
    pub fn new(client: Arc<Client<OpenAIConfig>>, chat_model: String) -> Self {
        Self { client, chat_model }
    }

    fn build_request(
        &self,
        system_message: &str,
        user_message: String,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Structured semantic event output".into()),
                name: schema_name.into(),
                schema: Some(schema),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .temperature(0.0)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_message).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .response_format(response_format)
            .build()?;

        Ok(request)
    }

    async fn run_request(&self, request: CreateChatCompletionRequest) -> Result<String, AppError> {
        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::terminal("LLM_SCHEMA", "no content in LLM response"))
    }
}

#[async_trait]
impl EventExtractor for LlmExtractionService {
    async fn extract(
        &self,
        revision: &ArtifactRevision,
        content_len: usize,
        chunks: &[ExtractionChunk],
    ) -> Result<Vec<CanonicalEvent>, AppError> {
        // Phase A: one structured call per chunk; offsets come back
        // chunk-relative and are shifted by the chunk's start.
        let mut phase_a: Vec<CanonicalEvent> = Vec::new();
        for chunk in chunks {
            let request = self.build_request(
                EVENT_EXTRACTION_SYSTEM_MESSAGE,
                format!("Artifact kind: {:?}\n\nText:\n{}", revision.kind, chunk.content),
                "event_extraction",
                get_event_extraction_schema(),
            )?;
            let body = self.run_request(request).await?;
            let raw = parse_event_list(&body)?;
            phase_a.extend(validate_phase_a_events(raw.events, chunk, content_len));
        }

        if phase_a.is_empty() {
            return Ok(Vec::new());
        }
        if chunks.len() == 1 {
            // Nothing to merge across chunks.
            return Ok(phase_a);
        }

        // Phase B: canonicalize across chunks. A response that fails to
        // parse or validate falls back to the Phase A union.
        let payload = serde_json::to_string(&to_raw_events(&phase_a))?;
        let request = self.build_request(
            EVENT_CANONICALIZATION_SYSTEM_MESSAGE,
            format!("Events extracted per chunk:\n{payload}"),
            "event_canonicalization",
            get_event_canonicalization_schema(),
        )?;

        match self.run_request(request).await.and_then(|body| parse_event_list(&body)) {
            Ok(raw) => {
                let canonical = validate_canonical_events(raw.events, content_len);
                if canonical.is_empty() {
                    warn!("canonicalization produced no valid events; using phase A union");
                    Ok(merge_phase_a_union(phase_a))
                } else {
                    Ok(canonical)
                }
            }
            Err(err) => {
                warn!(error = %err, "canonicalization failed; using phase A union");
                Ok(merge_phase_a_union(phase_a))
            }
        }
    }
}

pub fn parse_event_list(body: &str) -> Result<RawEventList, AppError> {
    serde_json::from_str::<RawEventList>(body).map_err(|e| {
        AppError::terminal("LLM_SCHEMA", format!("LLM output failed schema validation: {e}"))
    })
}

/// Validate Phase A output for one chunk: closed-set category (invalid
/// drops the event, not the extraction), confidence clamped to [0, 1],
/// offsets shifted to artifact-relative and bounds-checked.
pub fn validate_phase_a_events(
    raw_events: Vec<RawEvent>,
    chunk: &ExtractionChunk,
    content_len: usize,
) -> Vec<CanonicalEvent> {
    let mut out = Vec::with_capacity(raw_events.len());

    for raw in raw_events {
        let Ok(category) = raw.category.parse::<EventCategory>() else {
            warn!(category = %raw.category, "dropping event with unknown category");
            continue;
        };

        let evidence = raw
            .evidence
            .into_iter()
            .filter_map(|span| {
                let start = usize::try_from(span.start_char).ok()?;
                let end = usize::try_from(span.end_char).ok()?;
                let start = start + chunk.start_char;
                let end = end + chunk.start_char;
                if start > end || end > content_len {
                    warn!(start, end, content_len, "dropping out-of-bounds evidence span");
                    return None;
                }
                Some(CanonicalEvidence {
                    quote: span.quote,
                    start_char: start,
                    end_char: end,
                    chunk_id: chunk.chunk_id.clone(),
                })
            })
            .collect();

        out.push(CanonicalEvent {
            category,
            event_time: parse_event_time(raw.event_time.as_deref()),
            narrative: raw.narrative,
            subject: EventSubject {
                subject_type: raw.subject.subject_type,
                subject_ref: raw.subject.subject_ref,
            },
            actors: raw
                .actors
                .into_iter()
                .map(|actor| EventActor {
                    ref_name: actor.ref_name,
                    role: actor.role,
                })
                .collect(),
            confidence: (raw.confidence as f32).clamp(0.0, 1.0),
            evidence,
        });
    }

    debug!(events = out.len(), "validated phase A chunk output");
    out
}

/// Validate Phase B output; offsets are already artifact-relative.
pub fn validate_canonical_events(
    raw_events: Vec<RawEvent>,
    content_len: usize,
) -> Vec<CanonicalEvent> {
    let whole = ExtractionChunk {
        chunk_id: None,
        content: String::new(),
        start_char: 0,
    };
    let mut events = validate_phase_a_events(raw_events, &whole, content_len);
    // Phase B may carry chunk ids through; validate_phase_a_events cleared
    // them via the pseudo chunk, which is fine: canonical events span
    // chunks.
    for event in &mut events {
        for span in &mut event.evidence {
            span.chunk_id = None;
        }
    }
    events
}

/// Fallback when Phase B output is unusable: the Phase A union with exact
/// duplicates merged (same category and narrative), evidence combined.
pub fn merge_phase_a_union(events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    let mut out: Vec<CanonicalEvent> = Vec::new();

    for event in events {
        let duplicate = out.iter_mut().find(|existing| {
            existing.category == event.category
                && existing.narrative.trim().eq_ignore_ascii_case(event.narrative.trim())
        });

        match duplicate {
            Some(existing) => {
                existing.confidence = existing.confidence.max(event.confidence);
                for span in event.evidence {
                    if !existing.evidence.contains(&span) {
                        existing.evidence.push(span);
                    }
                }
            }
            None => out.push(event),
        }
    }

    out
}

fn to_raw_events(events: &[CanonicalEvent]) -> RawEventList {
    RawEventList {
        events: events
            .iter()
            .map(|event| RawEvent {
                category: event.category.as_str().to_owned(),
                narrative: event.narrative.clone(),
                event_time: event.event_time.map(|t| t.to_rfc3339()),
                subject: RawSubject {
                    subject_type: event.subject.subject_type.clone(),
                    subject_ref: event.subject.subject_ref.clone(),
                },
                actors: event
                    .actors
                    .iter()
                    .map(|actor| RawActor {
                        ref_name: actor.ref_name.clone(),
                        role: actor.role.clone(),
                    })
                    .collect(),
                confidence: f64::from(event.confidence),
                evidence: event
                    .evidence
                    .iter()
                    .map(|span| RawSpan {
                        quote: span.quote.clone(),
                        start_char: span.start_char as i64,
                        end_char: span.end_char as i64,
                        chunk_id: span.chunk_id.clone(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn parse_event_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_event(category: &str, narrative: &str, spans: Vec<(i64, i64)>) -> RawEvent {
        RawEvent {
            category: category.to_string(),
            narrative: narrative.to_string(),
            event_time: None,
            subject: RawSubject {
                subject_type: "project".to_string(),
                subject_ref: "release".to_string(),
            },
            actors: vec![RawActor {
                ref_name: "Alice".to_string(),
                role: "owner".to_string(),
            }],
            confidence: 0.9,
            evidence: spans
                .into_iter()
                .map(|(start, end)| RawSpan {
                    quote: "q".to_string(),
                    start_char: start,
                    end_char: end,
                    chunk_id: None,
                })
                .collect(),
        }
    }

    fn chunk_at(start_char: usize) -> ExtractionChunk {
        ExtractionChunk {
            chunk_id: Some("art_1::chunk::001::aabbccdd".to_string()),
            content: String::new(),
            start_char,
        }
    }

    #[test]
    fn schema_violations_fail_the_parse() {
        assert!(parse_event_list(r#"{"events": []}"#).is_ok());
        assert!(parse_event_list("not json at all").is_err());
        // Missing required narrative.
        let missing = r#"{"events": [{"category": "Decision", "subject": {"type": "a", "ref": "b"}, "actors": [], "confidence": 1.0, "evidence": []}]}"#;
        assert!(parse_event_list(missing).is_err());
        // Unknown top-level fields are tolerated.
        let extra = r#"{"events": [], "model_notes": "ignored"}"#;
        assert!(parse_event_list(extra).is_ok());
    }

    #[test]
    fn invalid_categories_drop_the_event_only() {
        let events = vec![
            raw_event("Decision", "keep me", vec![(0, 5)]),
            raw_event("Gossip", "drop me", vec![(0, 5)]),
        ];
        let validated = validate_phase_a_events(events, &chunk_at(0), 100);
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].narrative, "keep me");
    }

    #[test]
    fn offsets_shift_by_the_chunk_start() {
        let events = vec![raw_event("Decision", "shifted", vec![(10, 20)])];
        let validated = validate_phase_a_events(events, &chunk_at(500), 1000);
        let span = &validated[0].evidence[0];
        assert_eq!(span.start_char, 510);
        assert_eq!(span.end_char, 520);
        assert_eq!(
            span.chunk_id.as_deref(),
            Some("art_1::chunk::001::aabbccdd")
        );
    }

    #[test]
    fn out_of_bounds_spans_are_dropped_but_the_event_survives() {
        let events = vec![raw_event(
            "Decision",
            "partially grounded",
            vec![(0, 10), (90, 200), (-5, 10)],
        )];
        let validated = validate_phase_a_events(events, &chunk_at(0), 100);
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].evidence.len(), 1);
        assert_eq!(validated[0].evidence[0].end_char, 10);
    }

    #[test]
    fn confidence_is_clamped_to_unit_range() {
        let mut event = raw_event("Decision", "confident", vec![]);
        event.confidence = 3.5;
        let validated = validate_phase_a_events(vec![event], &chunk_at(0), 100);
        assert!((validated[0].confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn event_times_parse_leniently() {
        let mut event = raw_event("Decision", "timed", vec![]);
        event.event_time = Some("2024-04-01T09:30:00Z".to_string());
        let validated = validate_phase_a_events(vec![event], &chunk_at(0), 100);
        assert!(validated[0].event_time.is_some());

        let mut event = raw_event("Decision", "untimed", vec![]);
        event.event_time = Some("around easter".to_string());
        let validated = validate_phase_a_events(vec![event], &chunk_at(0), 100);
        assert!(validated[0].event_time.is_none(), "unparseable times become null");
    }

    #[test]
    fn union_fallback_merges_exact_duplicates_across_chunks() {
        let a = validate_phase_a_events(
            vec![raw_event("Decision", "Ship in April", vec![(0, 10)])],
            &chunk_at(0),
            2000,
        );
        let b = validate_phase_a_events(
            vec![
                raw_event("Decision", "ship in april", vec![(5, 15)]),
                raw_event("Commitment", "Bob owns rollout", vec![(20, 30)]),
            ],
            &chunk_at(800),
            2000,
        );

        let merged = merge_phase_a_union(a.into_iter().chain(b).collect());
        assert_eq!(merged.len(), 2);

        let decision = merged
            .iter()
            .find(|e| e.category == EventCategory::Decision)
            .expect("decision kept");
        assert_eq!(decision.evidence.len(), 2, "evidence lists are combined");
    }
}
