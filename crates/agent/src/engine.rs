//! Reasoning-action loop engine — orchestrates one conversational turn.
//!
//! State machine per turn: `Running → {Running, WaitingForUser, Finished,
//! Fallback}`. Each iteration assembles a prompt from the instruction
//! template, tool catalogue, intent guidance, the scratchpad, and the latest
//! user message; invokes the text-generation endpoint; parses the response;
//! and either dispatches a tool or ends the turn.
//!
//! Error discipline: an invalid parse, an unknown tool, a bad action input,
//! or a captured tool failure is a *recoverable* condition recorded as an
//! observation — the loop continues. A generation-endpoint failure or an
//! infrastructure error escaping tool dispatch is caught once and converts
//! the turn to `Fallback` with a canned apology.
//!
//! The engine knows nothing about conversations or transports: it emits
//! [`TurnEvent`]s through a [`TurnEmitter`] and treats the ids inside its
//! [`ToolContext`] as an opaque turn handle filled in by the boundary.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vitalis_core::event::{ToolCallPhase, TurnEvent};
use vitalis_core::tool::{ToolContext, ToolRegistry, FOLLOW_UP_TOOL};
use vitalis_core::{Error, Role, TextGenerator};

use crate::guidance::{guidance_for, Intent};
use crate::parser::parse_decision;
use crate::scratchpad::{self, ScratchpadEntry};

/// Canned apology when the iteration budget runs out.
const MAX_ITERATIONS_APOLOGY: &str =
    "I'm sorry — I couldn't finish reasoning about your question this time. \
     Could you rephrase it, or ask about one thing at a time?";

/// Canned apology for an unexpected failure mid-turn.
const TURN_FAILURE_APOLOGY: &str =
    "I'm sorry — something went wrong while working on your question. Please try again in a moment.";

/// Fixed instruction template; tool catalogue, guidance, scratchpad, and
/// user message are appended per iteration.
const INSTRUCTION_TEMPLATE: &str = "\
You are Vitalis, a careful conversational health assistant. You reason step by \
step and use tools to ground your answers. You never diagnose; for severe or \
persistent symptoms you recommend seeing a clinician.

Respond in exactly this format:

Thought: <your reasoning about what to do next>
Action: <one tool name from the catalogue>
Action Input: <a JSON object with the tool's input>

When you have enough information, use the `finish` action with \
{\"answer\": \"<your final answer>\"}.";

/// Content deltas are emitted in chunks of at most this many characters.
const DELTA_CHUNK_CHARS: usize = 160;

/// The state of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Still iterating.
    Running,
    /// A follow-up question yielded the turn back to the user.
    WaitingForUser,
    /// The terminal action was dispatched.
    Finished,
    /// Turn-fatal condition; `fallback_response` carries the apology.
    Fallback,
}

/// One message of conversation history handed to the engine.
#[derive(Debug, Clone)]
pub struct TurnMessage {
    pub role: Role,
    pub content: String,
}

/// Everything the engine needs for one turn. The ids inside `context` are
/// stamped by the boundary; the engine never inspects them.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Conversation history; the last user message is the turn's subject.
    pub messages: Vec<TurnMessage>,
    /// Pre-classified intent of the latest user message.
    pub intent: Intent,
    /// Opaque turn handle for tool dispatch.
    pub context: ToolContext,
    /// Per-turn override of the configured iteration budget.
    pub max_iterations: Option<u32>,
}

/// The final state of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: TurnState,
    /// The synthesized answer (Finished) or follow-up question (WaitingForUser).
    pub answer: Option<String>,
    /// The canned apology when `state` is `Fallback`.
    pub fallback_response: Option<String>,
    /// Tool names in dispatch order, duplicates included.
    pub tools_used: Vec<String>,
    pub iterations: u32,
}

impl TurnOutcome {
    pub fn is_finished(&self) -> bool {
        self.state == TurnState::Finished
    }
}

/// Hands turn events out of the engine without blocking the loop.
///
/// The emitter is conversation-agnostic; the boundary that owns the
/// receiving end stamps conversation ids before publishing on the bus.
#[derive(Clone)]
pub struct TurnEmitter {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl TurnEmitter {
    /// A fresh emitter plus the receiving end for the boundary to drain.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. A dropped receiver is ignored — event delivery must
    /// never stall the reasoning loop.
    pub fn emit(&self, event: TurnEvent) {
        let _ = self.tx.send(event);
    }

    fn thinking(&self, content: &str) {
        self.emit(TurnEvent::Thinking {
            content: content.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn error(&self, message: &str) {
        self.emit(TurnEvent::ErrorOccurred {
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// The reasoning-action loop engine.
pub struct TurnEngine {
    generator: Arc<dyn TextGenerator>,
    tools: Arc<ToolRegistry>,
    max_iterations: u32,
    scratchpad_max_entries: usize,
}

/// What one iteration decided.
enum StepOutcome {
    /// Keep iterating with the updated scratchpad.
    Continue(String),
    /// The terminal action was dispatched; carries the final answer.
    Finished(String),
    /// The follow-up tool succeeded; carries the question text.
    WaitingForUser(String),
}

impl TurnEngine {
    pub fn new(generator: Arc<dyn TextGenerator>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            generator,
            tools,
            max_iterations: 8,
            scratchpad_max_entries: 12,
        }
    }

    /// Set the iteration budget per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Set how many scratchpad entries are kept in the prompt.
    pub fn with_scratchpad_max_entries(mut self, max: usize) -> Self {
        self.scratchpad_max_entries = max.max(1);
        self
    }

    /// Run one conversational turn to completion.
    ///
    /// Never fails: every turn-fatal condition is converted into a
    /// `Fallback` outcome with a user-safe apology. After at most
    /// `max_iterations` iterations the returned state is one of
    /// `Finished`, `WaitingForUser`, or `Fallback` — never `Running`.
    pub async fn run_turn(&self, request: TurnRequest, emitter: &TurnEmitter) -> TurnOutcome {
        let max_iterations = request.max_iterations.unwrap_or(self.max_iterations).max(1);
        let user_message = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let guidance = guidance_for(request.intent);
        let catalogue = render_catalogue(&self.tools);

        let mut scratchpad = String::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut iterations = 0u32;
        let mut state = TurnState::Running;
        let mut answer: Option<String> = None;
        let mut fallback: Option<String> = None;

        info!(intent = %request.intent, max_iterations, "turn starting");

        while state == TurnState::Running {
            if iterations >= max_iterations {
                warn!(max_iterations, "iteration budget exhausted, falling back");
                emitter.error(MAX_ITERATIONS_APOLOGY);
                fallback = Some(MAX_ITERATIONS_APOLOGY.to_string());
                state = TurnState::Fallback;
                break;
            }

            let ctx = request.context.at_iteration(iterations);
            let step = self
                .step(
                    &ctx,
                    guidance,
                    &catalogue,
                    &request.messages,
                    &scratchpad,
                    &user_message,
                    emitter,
                    &mut tools_used,
                )
                .await;
            iterations += 1;

            match step {
                Ok(StepOutcome::Continue(log)) => {
                    scratchpad = scratchpad::truncate(&log, self.scratchpad_max_entries);
                }
                Ok(StepOutcome::Finished(text)) => {
                    answer = Some(text);
                    state = TurnState::Finished;
                }
                Ok(StepOutcome::WaitingForUser(question)) => {
                    answer = Some(question);
                    state = TurnState::WaitingForUser;
                }
                Err(e) => {
                    warn!(error = %e, iteration = iterations, "turn-fatal error, falling back");
                    emitter.error(TURN_FAILURE_APOLOGY);
                    fallback = Some(TURN_FAILURE_APOLOGY.to_string());
                    state = TurnState::Fallback;
                }
            }
        }

        match state {
            TurnState::Finished => {
                let text = answer.clone().unwrap_or_default();
                emit_deltas(emitter, &request.context, &text);
                emitter.emit(TurnEvent::Done {
                    message_id: request.context.message_id.clone(),
                    iterations,
                    tools_used: tools_used.clone(),
                    timestamp: Utc::now(),
                });
            }
            TurnState::WaitingForUser => {
                // The question streams to the client, but no Done is
                // emitted: the conversation stays open for the next user
                // turn and nothing is flushed yet.
                let text = answer.clone().unwrap_or_default();
                emit_deltas(emitter, &request.context, &text);
            }
            TurnState::Fallback | TurnState::Running => {}
        }

        info!(?state, iterations, tools = tools_used.len(), "turn ended");

        TurnOutcome {
            state,
            answer,
            fallback_response: fallback,
            tools_used,
            iterations,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn step(
        &self,
        ctx: &ToolContext,
        guidance: &str,
        catalogue: &str,
        messages: &[TurnMessage],
        scratchpad: &str,
        user_message: &str,
        emitter: &TurnEmitter,
        tools_used: &mut Vec<String>,
    ) -> Result<StepOutcome, Error> {
        let prompt = build_prompt(guidance, catalogue, messages, scratchpad, user_message);
        let completion = self.generator.invoke(&prompt).await?;
        let decision = parse_decision(&completion.text);

        if let Some(thought) = &decision.thought {
            emitter.thinking(thought);
        }

        if !decision.is_usable() {
            debug!("unusable model output, recording diagnostic observation");
            return Ok(StepOutcome::Continue(scratchpad::append_observation(
                scratchpad,
                "The previous output could not be parsed. Respond using the \
                 Thought / Action / Action Input format.",
            )));
        }

        let Some(action) = decision.action.clone() else {
            return Ok(StepOutcome::Continue(scratchpad::append_observation(
                scratchpad,
                "No action was provided. Choose a tool from the catalogue or use `finish`.",
            )));
        };

        if decision.is_finished() {
            let text = decision
                .action_input
                .as_ref()
                .and_then(|m| m.get("answer"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| decision.thought.clone())
                .unwrap_or_default();
            return Ok(StepOutcome::Finished(text));
        }

        let Some(input) = decision.action_input.clone() else {
            let reason = decision
                .parse_error
                .unwrap_or_else(|| "missing input".into());
            debug!(%action, %reason, "action input unusable, recording diagnostic observation");
            return Ok(StepOutcome::Continue(scratchpad::append_observation(
                scratchpad,
                &format!(
                    "The input for action '{action}' could not be parsed ({reason}). \
                     Provide the Action Input as a valid JSON object."
                ),
            )));
        };

        if !self.tools.contains(&action) {
            debug!(%action, "unknown tool requested");
            return Ok(StepOutcome::Continue(scratchpad::append_observation(
                scratchpad,
                &format!(
                    "Unknown tool '{action}'. Available tools: {}.",
                    self.tools.names().join(", ")
                ),
            )));
        }

        // ── Dispatch ──
        let call_id = Uuid::new_v4().to_string();
        tools_used.push(action.clone());
        emitter.emit(TurnEvent::ToolCall {
            id: call_id.clone(),
            name: action.clone(),
            phase: ToolCallPhase::Running,
            input: Some(Value::Object(input.clone())),
            output: None,
            error: None,
            error_type: None,
            duration_ms: None,
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let result = match self
            .tools
            .execute(&action, Value::Object(input.clone()), ctx)
            .await
        {
            Ok(result) => result,
            // A tool rejecting its input is a bad-action-input condition,
            // recoverable like a parse failure. Anything else escaping
            // dispatch is turn-fatal.
            Err(vitalis_core::error::ToolError::InvalidArguments(reason)) => {
                emitter.emit(TurnEvent::ToolCall {
                    id: call_id,
                    name: action.clone(),
                    phase: ToolCallPhase::Failed,
                    input: None,
                    output: None,
                    error: Some(reason.clone()),
                    error_type: Some("invalid_arguments".into()),
                    duration_ms: Some(started.elapsed().as_millis() as u64),
                    timestamp: Utc::now(),
                });
                return Ok(StepOutcome::Continue(scratchpad::append_observation(
                    scratchpad,
                    &format!("The tool '{action}' rejected the input: {reason}."),
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let thought = decision
            .thought
            .unwrap_or_else(|| "(no rationale given)".into());

        if result.success {
            emitter.emit(TurnEvent::ToolCall {
                id: call_id,
                name: action.clone(),
                phase: ToolCallPhase::Completed,
                input: None,
                output: Some(result.output.clone()),
                error: None,
                error_type: None,
                duration_ms: Some(duration_ms),
                timestamp: Utc::now(),
            });

            if let Some(Value::Object(entries)) = &result.data {
                emitter.emit(TurnEvent::Metadata {
                    entries: entries.clone(),
                    timestamp: Utc::now(),
                });
            }

            let entry = ScratchpadEntry {
                thought,
                action: action.clone(),
                action_input: input,
                observation: result.output.clone(),
            };
            let log = scratchpad::append(scratchpad, &entry);

            // A follow-up question always yields the turn back to the user.
            if action == FOLLOW_UP_TOOL {
                return Ok(StepOutcome::WaitingForUser(result.output));
            }
            Ok(StepOutcome::Continue(log))
        } else {
            let error_type = result.error_type.unwrap_or_else(|| "tool_failure".into());
            emitter.emit(TurnEvent::ToolCall {
                id: call_id,
                name: action.clone(),
                phase: ToolCallPhase::Failed,
                input: None,
                output: None,
                error: Some(result.output.clone()),
                error_type: Some(error_type),
                duration_ms: Some(duration_ms),
                timestamp: Utc::now(),
            });

            let entry = ScratchpadEntry {
                thought,
                action,
                action_input: input,
                observation: format!("Error: {}", result.output),
            };
            Ok(StepOutcome::Continue(scratchpad::append(scratchpad, &entry)))
        }
    }
}

/// Emit the answer text as ordered content deltas.
fn emit_deltas(emitter: &TurnEmitter, ctx: &ToolContext, text: &str) {
    if text.is_empty() {
        return;
    }
    let mut chars = text.chars();
    loop {
        let chunk: String = chars.by_ref().take(DELTA_CHUNK_CHARS).collect();
        if chunk.is_empty() {
            break;
        }
        emitter.emit(TurnEvent::ContentDelta {
            message_id: ctx.message_id.clone(),
            delta: chunk,
            timestamp: Utc::now(),
        });
    }
}

fn render_catalogue(tools: &ToolRegistry) -> String {
    let mut out = String::new();
    for def in tools.definitions() {
        out.push_str(&format!(
            "- {}: {}\n  input schema: {}\n",
            def.name,
            def.description,
            serde_json::to_string(&def.parameters).unwrap_or_default()
        ));
    }
    out
}

fn build_prompt(
    guidance: &str,
    catalogue: &str,
    messages: &[TurnMessage],
    scratchpad: &str,
    user_message: &str,
) -> String {
    let mut prompt = String::from(INSTRUCTION_TEMPLATE);

    prompt.push_str("\n\n## Available tools\n");
    prompt.push_str(catalogue);

    prompt.push_str("\n## Guidance\n");
    prompt.push_str(guidance);

    if messages.len() > 1 {
        prompt.push_str("\n\n## Conversation so far\n");
        for message in &messages[..messages.len() - 1] {
            let label = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(&format!("{label}: {}\n", message.content));
        }
    }

    if !scratchpad.is_empty() {
        prompt.push_str("\n\n## Your reasoning so far\n");
        prompt.push_str(scratchpad);
    }

    prompt.push_str("\n\nUser message: ");
    prompt.push_str(user_message);
    prompt.push_str("\n\nThought:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use vitalis_core::conversation::{ConversationId, MessageId};
    use vitalis_core::event::TurnEvent;

    fn request(intent: Intent) -> TurnRequest {
        TurnRequest {
            messages: vec![TurnMessage {
                role: Role::User,
                content: "我头疼".into(),
            }],
            intent,
            context: ToolContext {
                conversation_id: ConversationId::from("c1"),
                message_id: MessageId::from("m1"),
                user_id: "u1".into(),
                iteration: 0,
            },
            max_iterations: None,
        }
    }

    fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn immediate_finish() {
        let generator = SequentialGenerator::new(vec![
            "Thought: Simple question, I can answer directly.\nAction: finish\nAction Input: {\"answer\": \"Drink water and rest.\"}".into(),
        ]);
        let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()));
        let (emitter, rx) = TurnEmitter::channel();

        let outcome = engine
            .run_turn(request(Intent::SymptomConsult), &emitter)
            .await;

        assert_eq!(outcome.state, TurnState::Finished);
        assert_eq!(outcome.answer.as_deref(), Some("Drink water and rest."));
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.tools_used.is_empty());

        let events = drain(rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::Thinking { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::ContentDelta { .. })));
        assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));
    }

    #[tokio::test]
    async fn tool_then_finish() {
        let generator = SequentialGenerator::new(vec![
            "Thought: Look up headache causes first.\nAction: lookup\nAction Input: {\"query\": \"headache\"}".into(),
            "Thought: I have what I need.\nAction: finish\nAction Input: {\"answer\": \"Likely a tension headache; rest and hydrate.\"}".into(),
        ]);
        let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()));
        let (emitter, rx) = TurnEmitter::channel();

        let outcome = engine
            .run_turn(request(Intent::SymptomConsult), &emitter)
            .await;

        assert_eq!(outcome.state, TurnState::Finished);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tools_used, vec!["lookup".to_string()]);

        let events = drain(rx);
        let running = events.iter().any(|e| {
            matches!(e, TurnEvent::ToolCall { name, phase, .. }
                if name == "lookup" && *phase == ToolCallPhase::Running)
        });
        let completed = events.iter().any(|e| {
            matches!(e, TurnEvent::ToolCall { name, phase, .. }
                if name == "lookup" && *phase == ToolCallPhase::Completed)
        });
        assert!(running, "missing running tool-call event");
        assert!(completed, "missing completed tool-call event");
    }

    #[tokio::test]
    async fn unknown_tool_is_recoverable() {
        let generator = SequentialGenerator::new(vec![
            "Thought: try this\nAction: teleport\nAction Input: {\"to\": \"mars\"}".into(),
            "Thought: fine\nAction: finish\nAction Input: {\"answer\": \"done\"}".into(),
        ]);
        let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()));
        let (emitter, _rx) = TurnEmitter::channel();

        let outcome = engine.run_turn(request(Intent::General), &emitter).await;

        assert_eq!(outcome.state, TurnState::Finished);
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.tools_used.is_empty());
    }

    #[tokio::test]
    async fn bad_action_input_is_recoverable() {
        let generator = SequentialGenerator::new(vec![
            "Thought: searching\nAction: lookup\nAction Input: not even close".into(),
            "Thought: ok\nAction: finish\nAction Input: {\"answer\": \"done\"}".into(),
        ]);
        let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()));
        let (emitter, _rx) = TurnEmitter::channel();

        let outcome = engine.run_turn(request(Intent::General), &emitter).await;
        assert_eq!(outcome.state, TurnState::Finished);
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn diagnostic_observation_reaches_next_prompt() {
        let generator = SequentialGenerator::new(vec![
            "complete garbage with no markers".into(),
            "Thought: ok\nAction: finish\nAction Input: {\"answer\": \"done\"}".into(),
        ]);
        let prompts = generator.prompts();
        let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()));
        let (emitter, _rx) = TurnEmitter::channel();

        let outcome = engine.run_turn(request(Intent::General), &emitter).await;
        assert_eq!(outcome.state, TurnState::Finished);

        let recorded = prompts.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert!(recorded[1].contains("could not be parsed"));
    }

    #[tokio::test]
    async fn max_iterations_yields_fallback() {
        let generator = SequentialGenerator::repeating(
            "Thought: still thinking\nAction: lookup\nAction Input: {\"query\": \"x\"}".into(),
        );
        let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()))
            .with_max_iterations(3);
        let (emitter, rx) = TurnEmitter::channel();

        let outcome = engine.run_turn(request(Intent::General), &emitter).await;

        assert_eq!(outcome.state, TurnState::Fallback);
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.fallback_response.is_some());
        assert!(outcome.answer.is_none());

        let events = drain(rx);
        assert!(events.iter().any(|e| matches!(
            e,
            TurnEvent::ErrorOccurred { message, .. } if message.contains("sorry")
        )));
        // No Done: the turn did not complete.
        assert!(!events.iter().any(|e| matches!(e, TurnEvent::Done { .. })));
    }

    #[tokio::test]
    async fn generator_failure_yields_fallback() {
        let engine = TurnEngine::new(Arc::new(FailingGenerator), Arc::new(test_registry()));
        let (emitter, rx) = TurnEmitter::channel();

        let outcome = engine.run_turn(request(Intent::General), &emitter).await;

        assert_eq!(outcome.state, TurnState::Fallback);
        assert_eq!(outcome.iterations, 1);
        let apology = outcome.fallback_response.unwrap();
        assert!(apology.contains("sorry"));
        // The raw network error never surfaces on the event stream.
        let events = drain(rx);
        for event in &events {
            if let TurnEvent::ErrorOccurred { message, .. } = event {
                assert!(!message.contains("connection refused"));
            }
        }
    }

    #[tokio::test]
    async fn follow_up_question_yields_turn() {
        let generator = SequentialGenerator::new(vec![
            "Thought: too vague, ask back\nAction: ask_followup_question\nAction Input: {\"question\": \"How long has the pain lasted?\"}".into(),
        ]);
        let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()));
        let (emitter, rx) = TurnEmitter::channel();

        let outcome = engine
            .run_turn(request(Intent::SymptomConsult), &emitter)
            .await;

        assert_eq!(outcome.state, TurnState::WaitingForUser);
        assert_eq!(
            outcome.answer.as_deref(),
            Some("How long has the pain lasted?")
        );

        let events = drain(rx);
        // The question streams out, but no Done event: no flush yet.
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::ContentDelta { .. })));
        assert!(!events.iter().any(|e| matches!(e, TurnEvent::Done { .. })));
    }

    #[tokio::test]
    async fn captured_tool_failure_is_recoverable() {
        let generator = SequentialGenerator::new(vec![
            "Thought: try the flaky one\nAction: flaky\nAction Input: {\"q\": \"x\"}".into(),
            "Thought: ok without it\nAction: finish\nAction Input: {\"answer\": \"done anyway\"}".into(),
        ]);
        let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()));
        let (emitter, rx) = TurnEmitter::channel();

        let outcome = engine.run_turn(request(Intent::General), &emitter).await;

        assert_eq!(outcome.state, TurnState::Finished);
        let events = drain(rx);
        assert!(events.iter().any(|e| {
            matches!(e, TurnEvent::ToolCall { phase, error_type, .. }
                if *phase == ToolCallPhase::Failed && error_type.is_some())
        }));
    }

    #[tokio::test]
    async fn loop_always_terminates_in_terminal_state() {
        for responses in [
            vec!["garbage".to_string()],
            vec!["Thought: only thinking".to_string()],
            vec!["Action: lookup\nAction Input: {\"query\": \"x\"}".to_string()],
        ] {
            let generator = SequentialGenerator::repeating(responses[0].clone());
            let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()))
                .with_max_iterations(4);
            let (emitter, _rx) = TurnEmitter::channel();
            let outcome = engine.run_turn(request(Intent::General), &emitter).await;
            assert_ne!(outcome.state, TurnState::Running);
            assert!(outcome.iterations <= 4);
        }
    }

    #[tokio::test]
    async fn long_answer_reassembles_from_ordered_deltas() {
        let long_answer = "A".repeat(500);
        let generator = SequentialGenerator::new(vec![format!(
            "Thought: done\nAction: finish\nAction Input: {{\"answer\": \"{long_answer}\"}}"
        )]);
        let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()));
        let (emitter, rx) = TurnEmitter::channel();

        engine.run_turn(request(Intent::General), &emitter).await;

        let events = drain(rx);
        let reassembled: String = events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::ContentDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(reassembled, long_answer);
        let delta_count = events
            .iter()
            .filter(|e| matches!(e, TurnEvent::ContentDelta { .. }))
            .count();
        assert!(delta_count > 1, "long answers should be chunked");
    }

    #[tokio::test]
    async fn metadata_from_tool_data_is_emitted() {
        let generator = SequentialGenerator::new(vec![
            "Thought: look it up\nAction: lookup\nAction Input: {\"query\": \"headache\"}".into(),
            "Thought: done\nAction: finish\nAction Input: {\"answer\": \"ok\"}".into(),
        ]);
        let engine = TurnEngine::new(Arc::new(generator), Arc::new(test_registry()));
        let (emitter, rx) = TurnEmitter::channel();

        engine
            .run_turn(request(Intent::SymptomConsult), &emitter)
            .await;

        let events = drain(rx);
        assert!(events.iter().any(|e| {
            matches!(e, TurnEvent::Metadata { entries, .. } if entries.contains_key("sources"))
        }));
    }
}
