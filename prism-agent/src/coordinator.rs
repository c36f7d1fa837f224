// ABOUTME: Deduplication and coordination of backend signals into events and messages.
// ABOUTME: One logical tool call, skill load or sub-agent run yields exactly one terminal occurrence.

use crate::event::{
    EventPayload, QuestionData, SkillData, SkillStatus, SubagentCompleteData, SubagentStartData,
    TextData, ThinkingData, ToolExecutionCompleteData, ToolExecutionStartData, ToolResultData,
    ToolUseData,
};
use crate::message::NormalizedMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceKind {
    Tool,
    Skill,
    Subagent,
    Question,
}

/// Identity of one logical action: occurrence kind plus name or id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OccurrenceKey {
    pub kind: OccurrenceKind,
    pub id: String,
}

impl OccurrenceKey {
    pub fn new(kind: OccurrenceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn tool(call_id: impl Into<String>) -> Self {
        Self::new(OccurrenceKind::Tool, call_id)
    }

    pub fn skill(name: impl Into<String>) -> Self {
        Self::new(OccurrenceKind::Skill, name)
    }

    pub fn subagent(id: impl Into<String>) -> Self {
        Self::new(OccurrenceKind::Subagent, id)
    }

    pub fn question(id: impl Into<String>) -> Self {
        Self::new(OccurrenceKind::Question, id)
    }
}

impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            OccurrenceKind::Tool => "tool",
            OccurrenceKind::Skill => "skill",
            OccurrenceKind::Subagent => "subagent",
            OccurrenceKind::Question => "question",
        };
        write!(f, "{}:{}", kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceStatus {
    Started,
    Completed,
    Failed,
}

impl OccurrenceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OccurrenceStatus::Started)
    }
}

impl From<SkillStatus> for OccurrenceStatus {
    fn from(status: SkillStatus) -> Self {
        match status {
            SkillStatus::Loading => OccurrenceStatus::Started,
            SkillStatus::Loaded => OccurrenceStatus::Completed,
            SkillStatus::Error => OccurrenceStatus::Failed,
        }
    }
}

/// What to do with a signal for an occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First signal for this key: forward the full occurrence
    Announce,
    /// Known, not yet terminal, now terminal: forward only the transition
    Transition(OccurrenceStatus),
    /// Redundant signal
    Suppress,
}

/// Session-scoped record of every occurrence already reported
#[derive(Debug, Default)]
pub struct OccurrenceRegistry {
    entries: HashMap<OccurrenceKey, OccurrenceStatus>,
    aliases: HashMap<String, OccurrenceKey>,
}

impl OccurrenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, key: &OccurrenceKey, status: OccurrenceStatus) -> Verdict {
        match self.entries.get(key).copied() {
            None => {
                self.entries.insert(key.clone(), status);
                Verdict::Announce
            }
            Some(previous) if previous.is_terminal() => Verdict::Suppress,
            Some(_) if status.is_terminal() => {
                self.entries.insert(key.clone(), status);
                Verdict::Transition(status)
            }
            Some(_) => Verdict::Suppress,
        }
    }

    pub fn status(&self, key: &OccurrenceKey) -> Option<OccurrenceStatus> {
        self.entries.get(key).copied()
    }

    /// Route a native tool-call id to the semantic occurrence it was folded into
    pub fn alias(&mut self, call_id: impl Into<String>, key: OccurrenceKey) {
        self.aliases.insert(call_id.into(), key);
    }

    pub fn resolve(&self, call_id: &str) -> Option<&OccurrenceKey> {
        self.aliases.get(call_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.aliases.clear();
    }
}

/// Where the occurrence key of a semantically surfaced tool comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// The native tool-call id also identifies the semantic occurrence
    CallId,
    /// A field of the tool input names the occurrence (e.g. the skill name)
    InputField(&'static str),
    /// Only the semantic channel reports it; the generic signal is dropped
    ChannelOnly,
}

/// How a generic tool signal is routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRoute {
    Generic,
    Fold(OccurrenceKey),
    Drop(OccurrenceKind),
}

/// Rendering-relevance filter built from each adapter's declaration of the
/// tool names it also reports through a dedicated semantic channel.
#[derive(Debug, Clone, Default)]
pub struct SemanticTools {
    routes: HashMap<String, (OccurrenceKind, KeySource)>,
}

impl SemanticTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, tool_name: &str, kind: OccurrenceKind, source: KeySource) -> Self {
        self.routes.insert(tool_name.to_string(), (kind, source));
        self
    }

    pub fn classify(&self, tool_name: &str, call_id: &str, input: &Value) -> ToolRoute {
        let Some((kind, source)) = self.routes.get(tool_name) else {
            return ToolRoute::Generic;
        };

        match source {
            KeySource::CallId => ToolRoute::Fold(OccurrenceKey::new(*kind, call_id)),
            KeySource::InputField(field) => match input.get(*field).and_then(|v| v.as_str()) {
                Some(name) if !name.is_empty() => ToolRoute::Fold(OccurrenceKey::new(*kind, name)),
                _ => {
                    tracing::debug!(
                        tool = %tool_name,
                        field = %field,
                        "Semantic tool input lacks its key field, keying by call id"
                    );
                    ToolRoute::Fold(OccurrenceKey::new(*kind, call_id))
                }
            },
            KeySource::ChannelOnly => ToolRoute::Drop(*kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Thinking,
}

/// Granularity of the "already streamed via delta" flag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeltaScope {
    /// Per backend message id and content kind
    Message(ContentKind, String),
    /// Whole turn, per content kind; survives tool-call boundaries
    Turn(ContentKind),
}

/// Tracks which content already went out as deltas so the materialized copy
/// is suppressed, and which messages were left partial.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    streamed: HashSet<DeltaScope>,
    open: Vec<String>,
}

impl DeltaTracker {
    pub fn mark(&mut self, scope: DeltaScope) {
        self.streamed.insert(scope);
    }

    pub fn was_streamed(&self, scope: &DeltaScope) -> bool {
        self.streamed.contains(scope)
    }

    fn open(&mut self, message_id: &str) {
        if !self.open.iter().any(|id| id == message_id) {
            self.open.push(message_id.to_string());
        }
    }

    /// The materialized form of this message arrived
    pub fn finish(&mut self, message_id: &str) {
        self.open.retain(|id| id != message_id);
    }

    /// Message ids with yielded deltas and no final form yet
    pub fn incomplete(&self) -> Vec<String> {
        self.open.clone()
    }

    pub fn reset(&mut self) {
        self.streamed.clear();
        self.open.clear();
    }
}

/// A fragment or materialized block of text or reasoning
#[derive(Debug, Clone, PartialEq)]
pub struct ContentChunk {
    pub message_id: Option<String>,
    pub scope: DeltaScope,
    pub text: String,
}

impl ContentChunk {
    /// Chunk flagged per message id (empty id when the backend gave none).
    /// Reasoning and text of one message are flagged separately.
    pub fn for_message(
        kind: ContentKind,
        message_id: Option<String>,
        text: impl Into<String>,
    ) -> Self {
        let scope = DeltaScope::Message(kind, message_id.clone().unwrap_or_default());
        Self {
            message_id,
            scope,
            text: text.into(),
        }
    }

    /// Chunk flagged for the whole turn
    pub fn for_turn(kind: ContentKind, message_id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            message_id,
            scope: DeltaScope::Turn(kind),
            text: text.into(),
        }
    }
}

/// Backend-neutral signal produced by an adapter's translation step
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    TextDelta(ContentChunk),
    Text(ContentChunk),
    ThinkingDelta(ContentChunk),
    Thinking(ContentChunk),
    ToolStart {
        call_id: String,
        name: String,
        input: Value,
    },
    ToolEnd {
        call_id: String,
        name: Option<String>,
        success: bool,
        output: Option<Value>,
        error: Option<String>,
    },
    SubagentStart {
        id: String,
        subagent_type: Option<String>,
        description: Option<String>,
    },
    SubagentEnd {
        id: String,
        success: bool,
        result: Option<String>,
        error: Option<String>,
    },
    Skill {
        name: String,
        status: SkillStatus,
        path: Option<String>,
        description: Option<String>,
    },
}

/// Output of one ingest: events to dispatch, at most one message to yield
#[derive(Debug, Default, PartialEq)]
pub struct Ingested {
    pub events: Vec<EventPayload>,
    pub message: Option<NormalizedMessage>,
}

impl Ingested {
    fn none() -> Self {
        Self::default()
    }

    fn events(events: Vec<EventPayload>) -> Self {
        Self {
            events,
            message: None,
        }
    }
}

/// Session-scoped coordination state. Adapters translate native payloads
/// into [`Signal`]s; this decides what becomes observable.
#[derive(Debug, Default)]
pub struct Coordinator {
    occurrences: OccurrenceRegistry,
    semantic: SemanticTools,
    deltas: DeltaTracker,
    tool_names: HashMap<String, String>,
    dropped_calls: HashSet<String>,
}

impl Coordinator {
    pub fn new(semantic: SemanticTools) -> Self {
        Self {
            semantic,
            ..Self::default()
        }
    }

    pub fn set_semantic_tools(&mut self, semantic: SemanticTools) {
        self.semantic = semantic;
    }

    /// Start of a turn: delta flags are per turn, occurrences per session
    pub fn begin_turn(&mut self) {
        self.deltas.reset();
    }

    pub fn incomplete_messages(&self) -> Vec<String> {
        self.deltas.incomplete()
    }

    pub fn reset(&mut self) {
        self.occurrences.clear();
        self.deltas.reset();
        self.tool_names.clear();
        self.dropped_calls.clear();
    }

    pub fn ingest(&mut self, signal: Signal) -> Ingested {
        match signal {
            Signal::TextDelta(chunk) => self.delta(ContentKind::Text, chunk),
            Signal::ThinkingDelta(chunk) => self.delta(ContentKind::Thinking, chunk),
            Signal::Text(chunk) => self.materialized(ContentKind::Text, chunk),
            Signal::Thinking(chunk) => self.materialized(ContentKind::Thinking, chunk),
            Signal::ToolStart {
                call_id,
                name,
                input,
            } => self.tool_start(call_id, name, input),
            Signal::ToolEnd {
                call_id,
                name,
                success,
                output,
                error,
            } => self.tool_end(call_id, name, success, output, error),
            Signal::SubagentStart {
                id,
                subagent_type,
                description,
            } => {
                let key = OccurrenceKey::subagent(&id);
                match self.occurrences.observe(&key, OccurrenceStatus::Started) {
                    Verdict::Announce => Ingested::events(vec![EventPayload::SubagentStart(
                        SubagentStartData {
                            subagent_id: id,
                            subagent_type,
                            description,
                        },
                    )]),
                    _ => {
                        tracing::debug!(occurrence = %key, "Suppressing repeated subagent start");
                        Ingested::none()
                    }
                }
            }
            Signal::SubagentEnd {
                id,
                success,
                result,
                error,
            } => self.subagent_end(OccurrenceKey::subagent(id), success, result, error),
            Signal::Skill {
                name,
                status,
                path,
                description,
            } => {
                let key = OccurrenceKey::skill(&name);
                match self.occurrences.observe(&key, status.into()) {
                    Verdict::Announce => Ingested::events(vec![EventPayload::SkillInvoked(SkillData {
                        name,
                        status,
                        path,
                        description,
                    })]),
                    Verdict::Transition(_) => {
                        Ingested::events(vec![EventPayload::SkillInvoked(SkillData {
                            name,
                            status,
                            path: None,
                            description: None,
                        })])
                    }
                    Verdict::Suppress => {
                        tracing::debug!(occurrence = %key, "Skill already reported");
                        Ingested::none()
                    }
                }
            }
        }
    }

    fn delta(&mut self, kind: ContentKind, chunk: ContentChunk) -> Ingested {
        if chunk.text.is_empty() {
            return Ingested::none();
        }
        self.deltas.mark(chunk.scope.clone());
        if let Some(id) = &chunk.message_id {
            self.deltas.open(id);
        }
        content(kind, chunk.message_id, chunk.text, true)
    }

    fn materialized(&mut self, kind: ContentKind, chunk: ContentChunk) -> Ingested {
        if let Some(id) = &chunk.message_id {
            self.deltas.finish(id);
        }
        if self.deltas.was_streamed(&chunk.scope) {
            tracing::debug!(
                message_id = ?chunk.message_id,
                ?kind,
                "Content already streamed as deltas, dropping materialized copy"
            );
            return Ingested::none();
        }
        if chunk.text.is_empty() {
            return Ingested::none();
        }
        content(kind, chunk.message_id, chunk.text, false)
    }

    fn tool_start(&mut self, call_id: String, name: String, input: Value) -> Ingested {
        self.tool_names.insert(call_id.clone(), name.clone());

        match self.semantic.classify(&name, &call_id, &input) {
            ToolRoute::Generic => {
                let key = OccurrenceKey::tool(&call_id);
                if self.occurrences.observe(&key, OccurrenceStatus::Started) != Verdict::Announce {
                    tracing::debug!(occurrence = %key, "Suppressing duplicate tool start");
                    return Ingested::none();
                }
                let message = NormalizedMessage::tool_use(&call_id, &name, input.clone());
                Ingested {
                    events: vec![
                        EventPayload::ToolUse(ToolUseData {
                            tool_call_id: call_id.clone(),
                            tool_name: name.clone(),
                            input: input.clone(),
                        }),
                        EventPayload::ToolExecutionStart(ToolExecutionStartData {
                            tool_call_id: call_id,
                            tool_name: name,
                            input,
                        }),
                    ],
                    message: Some(message),
                }
            }
            ToolRoute::Fold(key) => {
                self.occurrences.alias(&call_id, key.clone());
                if self.occurrences.observe(&key, OccurrenceStatus::Started) != Verdict::Announce {
                    tracing::debug!(occurrence = %key, tool = %name, "Semantic occurrence already announced");
                    return Ingested::none();
                }
                let payload = match key.kind {
                    OccurrenceKind::Skill => EventPayload::SkillInvoked(SkillData {
                        name: key.id,
                        status: SkillStatus::Loading,
                        path: None,
                        description: None,
                    }),
                    OccurrenceKind::Subagent => EventPayload::SubagentStart(SubagentStartData {
                        subagent_id: key.id,
                        subagent_type: string_field(&input, &["subagent_type", "agent_type", "agentName"]),
                        description: string_field(&input, &["description", "prompt"]),
                    }),
                    OccurrenceKind::Question => EventPayload::QuestionAsked(QuestionData {
                        question_id: key.id,
                        input,
                    }),
                    OccurrenceKind::Tool => EventPayload::ToolExecutionStart(ToolExecutionStartData {
                        tool_call_id: call_id,
                        tool_name: name,
                        input,
                    }),
                };
                Ingested::events(vec![payload])
            }
            ToolRoute::Drop(kind) => {
                tracing::debug!(tool = %name, call_id = %call_id, ?kind, "Tool surfaced by a semantic channel, not as a generic tool");
                self.dropped_calls.insert(call_id);
                Ingested::none()
            }
        }
    }

    fn tool_end(
        &mut self,
        call_id: String,
        name: Option<String>,
        success: bool,
        output: Option<Value>,
        error: Option<String>,
    ) -> Ingested {
        let recorded_name = self.tool_names.remove(&call_id);
        if self.dropped_calls.remove(&call_id) {
            return Ingested::none();
        }

        let key = self
            .occurrences
            .resolve(&call_id)
            .cloned()
            .unwrap_or_else(|| OccurrenceKey::tool(&call_id));
        let name = name.filter(|n| !n.is_empty()).or(recorded_name);

        match key.kind {
            OccurrenceKind::Tool => {
                if self.occurrences.status(&key).is_none() {
                    tracing::warn!(call_id = %call_id, "Tool completion without a start, dropping");
                    return Ingested::none();
                }
                let status = if success {
                    OccurrenceStatus::Completed
                } else {
                    OccurrenceStatus::Failed
                };
                if self.occurrences.observe(&key, status) == Verdict::Suppress {
                    tracing::debug!(occurrence = %key, "Tool already completed");
                    return Ingested::none();
                }
                let output_value = output
                    .clone()
                    .or_else(|| error.clone().map(Value::String))
                    .unwrap_or(Value::Null);
                let message =
                    NormalizedMessage::tool_result(&call_id, name.as_deref(), output_value.clone(), !success);
                Ingested {
                    events: vec![
                        EventPayload::ToolResult(ToolResultData {
                            tool_call_id: call_id.clone(),
                            tool_name: name.clone(),
                            output: output_value,
                            is_error: !success,
                        }),
                        EventPayload::ToolExecutionComplete(ToolExecutionCompleteData {
                            tool_call_id: call_id,
                            tool_name: name,
                            success,
                            output,
                            error,
                        }),
                    ],
                    message: Some(message),
                }
            }
            OccurrenceKind::Skill => {
                let status = if success {
                    SkillStatus::Loaded
                } else {
                    SkillStatus::Error
                };
                match self.occurrences.observe(&key, status.into()) {
                    Verdict::Suppress => Ingested::none(),
                    _ => Ingested::events(vec![EventPayload::SkillInvoked(SkillData {
                        name: key.id,
                        status,
                        path: None,
                        description: None,
                    })]),
                }
            }
            OccurrenceKind::Subagent => {
                let result = output.as_ref().map(value_text);
                self.subagent_end(key, success, result, error)
            }
            OccurrenceKind::Question => {
                let status = if success {
                    OccurrenceStatus::Completed
                } else {
                    OccurrenceStatus::Failed
                };
                self.occurrences.observe(&key, status);
                Ingested::none()
            }
        }
    }

    fn subagent_end(
        &mut self,
        key: OccurrenceKey,
        success: bool,
        result: Option<String>,
        error: Option<String>,
    ) -> Ingested {
        if self.occurrences.status(&key).is_none() {
            tracing::warn!(occurrence = %key, "Subagent completion without a start, dropping");
            return Ingested::none();
        }
        let status = if success {
            OccurrenceStatus::Completed
        } else {
            OccurrenceStatus::Failed
        };
        match self.occurrences.observe(&key, status) {
            Verdict::Transition(_) => Ingested::events(vec![EventPayload::SubagentComplete(
                SubagentCompleteData {
                    subagent_id: key.id,
                    success,
                    result,
                    error,
                },
            )]),
            _ => {
                tracing::debug!(occurrence = %key, "Subagent already completed");
                Ingested::none()
            }
        }
    }
}

fn content(kind: ContentKind, message_id: Option<String>, text: String, partial: bool) -> Ingested {
    let (payload, mut message) = match kind {
        ContentKind::Text => (
            EventPayload::Text(TextData {
                message_id: message_id.clone(),
                text: text.clone(),
                partial,
            }),
            NormalizedMessage::text(text),
        ),
        ContentKind::Thinking => (
            EventPayload::Thinking(ThinkingData {
                message_id: message_id.clone(),
                text: text.clone(),
                partial,
            }),
            NormalizedMessage::thinking(text),
        ),
    };
    if let Some(id) = message_id {
        message = message.with_metadata("messageId", id);
    }
    if partial {
        message = message.with_metadata("partial", true);
    }
    Ingested {
        events: vec![payload],
        message: Some(message),
    }
}

fn string_field(input: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| input.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Render a tool output as plain text for subagent results
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observe_announces_then_transitions_then_suppresses() {
        let mut registry = OccurrenceRegistry::new();
        let key = OccurrenceKey::skill("review");

        assert_eq!(registry.observe(&key, OccurrenceStatus::Started), Verdict::Announce);
        assert_eq!(registry.observe(&key, OccurrenceStatus::Started), Verdict::Suppress);
        assert_eq!(
            registry.observe(&key, OccurrenceStatus::Completed),
            Verdict::Transition(OccurrenceStatus::Completed)
        );
        assert_eq!(registry.observe(&key, OccurrenceStatus::Failed), Verdict::Suppress);
        assert_eq!(registry.observe(&key, OccurrenceStatus::Started), Verdict::Suppress);
    }

    #[test]
    fn test_terminal_first_signal_blocks_everything_after() {
        let mut registry = OccurrenceRegistry::new();
        let key = OccurrenceKey::subagent("a1");

        assert_eq!(registry.observe(&key, OccurrenceStatus::Completed), Verdict::Announce);
        assert_eq!(registry.observe(&key, OccurrenceStatus::Completed), Verdict::Suppress);
        assert_eq!(registry.observe(&key, OccurrenceStatus::Started), Verdict::Suppress);
    }

    #[test]
    fn test_keys_differ_by_kind() {
        let mut registry = OccurrenceRegistry::new();
        assert_eq!(
            registry.observe(&OccurrenceKey::tool("x"), OccurrenceStatus::Started),
            Verdict::Announce
        );
        assert_eq!(
            registry.observe(&OccurrenceKey::skill("x"), OccurrenceStatus::Started),
            Verdict::Announce
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_classify_routes() {
        let tools = SemanticTools::new()
            .route("skill", OccurrenceKind::Skill, KeySource::InputField("skill"))
            .route("task", OccurrenceKind::Subagent, KeySource::CallId)
            .route("Task", OccurrenceKind::Subagent, KeySource::ChannelOnly);

        assert_eq!(
            tools.classify("skill", "c1", &json!({"skill": "pdf"})),
            ToolRoute::Fold(OccurrenceKey::skill("pdf"))
        );
        assert_eq!(
            tools.classify("skill", "c1", &json!({})),
            ToolRoute::Fold(OccurrenceKey::skill("c1"))
        );
        assert_eq!(
            tools.classify("task", "c2", &json!({})),
            ToolRoute::Fold(OccurrenceKey::subagent("c2"))
        );
        assert_eq!(
            tools.classify("Task", "c3", &json!({})),
            ToolRoute::Drop(OccurrenceKind::Subagent)
        );
        assert_eq!(tools.classify("bash", "c4", &json!({})), ToolRoute::Generic);
    }

    #[test]
    fn test_delta_tracker_lists_unfinished_messages() {
        let mut coordinator = Coordinator::default();
        coordinator.ingest(Signal::TextDelta(ContentChunk::for_message(ContentKind::Text, Some("m1".into()), "he")));
        coordinator.ingest(Signal::TextDelta(ContentChunk::for_message(ContentKind::Text, Some("m2".into()), "yo")));
        coordinator.ingest(Signal::Text(ContentChunk::for_message(ContentKind::Text, Some("m1".into()), "hello")));

        assert_eq!(coordinator.incomplete_messages(), vec!["m2".to_string()]);

        coordinator.begin_turn();
        assert!(coordinator.incomplete_messages().is_empty());
    }

    #[test]
    fn test_empty_delta_is_ignored_and_does_not_mark_scope() {
        let mut coordinator = Coordinator::default();
        let out = coordinator.ingest(Signal::TextDelta(ContentChunk::for_message(ContentKind::Text, Some("m1".into()), "")));
        assert!(out.message.is_none());

        let out = coordinator.ingest(Signal::Text(ContentChunk::for_message(ContentKind::Text, Some("m1".into()), "full")));
        assert_eq!(out.message.unwrap().as_text(), Some("full"));
    }

    #[test]
    fn test_thinking_delta_does_not_suppress_text_of_same_message() {
        let mut coordinator = Coordinator::default();
        let id = || Some("m1".to_string());

        let out = coordinator.ingest(Signal::ThinkingDelta(ContentChunk::for_message(ContentKind::Thinking, id(), "hmm")));
        assert!(out.message.is_some());

        let out = coordinator.ingest(Signal::Thinking(ContentChunk::for_message(ContentKind::Thinking, id(), "hmm")));
        assert!(out.message.is_none());

        let out = coordinator.ingest(Signal::Text(ContentChunk::for_message(ContentKind::Text, id(), "answer")));
        assert_eq!(out.message.unwrap().as_text(), Some("answer"));
    }

    #[test]
    fn test_tool_name_is_forgotten_once_the_call_ends() {
        let mut coordinator = Coordinator::default();
        coordinator.ingest(Signal::ToolStart {
            call_id: "c1".to_string(),
            name: "bash".to_string(),
            input: json!({"command": "ls"}),
        });
        assert_eq!(coordinator.tool_names.len(), 1);

        let out = coordinator.ingest(Signal::ToolEnd {
            call_id: "c1".to_string(),
            name: None,
            success: true,
            output: Some(json!("a.rs")),
            error: None,
        });
        let result = out.message.unwrap();
        assert_eq!(result.metadata["toolName"], "bash");
        assert!(coordinator.tool_names.is_empty());
    }
}
