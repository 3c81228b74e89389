use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai_sdk::{Message, Role, ToolCall, ToolSchema};
use crate::cancel::Canceller;
use crate::client::CompletionClient;
use crate::config::Config;
use crate::context::{ContextBudget, compact_messages, estimate_fragment_tokens};
use crate::error::AgentError;
use crate::fallback;
use crate::prompt::build_system_prompt;
use crate::protocol::AgentEvent;
use crate::stream::{StreamEvent, ToolCallAccumulator};
use crate::tools::{ToolContext, ToolExecutor, Toolbox, truncate};

pub const MAX_ROUND_TRIPS: usize = 25;

const DEFAULT_RESULT_LIMIT: usize = 8000;
const CANCELLED_TOOL_RESULT: &str = "Tool call cancelled by user.";

/// How a turn ended. Failures have already been reported as
/// `AgentEvent::Error` by the time this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Failed,
    LoopLimitExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub used: usize,
    pub max: usize,
    pub pct: usize,
    pub message_count: usize,
    pub total_tool_calls: usize,
    pub total_turns: usize,
}

enum Streamed {
    Reply(Option<Message>),
    Cancelled,
}

/// One conversation with the model. Owns the transcript exclusively; a turn
/// borrows the agent mutably for its whole duration.
pub struct Agent<T = Toolbox> {
    client: CompletionClient,
    tools: T,
    budget: ContextBudget,
    max_tool_result_size: usize,
    system_prompt: String,
    messages: Vec<Message>,
    total_tool_calls: usize,
    total_turns: usize,
    canceller: Canceller,
}

impl Agent<Toolbox> {
    pub fn from_config(config: &Config) -> Self {
        let mut toolbox = Toolbox::new(ToolContext::new(
            config.cwd.clone(),
            config.command_timeout,
            config.max_tool_result_size,
        ));
        toolbox.set_plan_mode(config.plan_mode);

        Agent::new(
            CompletionClient::new(&config.base_url, config.model.clone()),
            toolbox,
            build_system_prompt(&config.cwd, config.plan_mode),
        )
        .with_budget(config.budget)
        .with_result_limit(config.max_tool_result_size)
    }

    pub fn tool_context(&self) -> &ToolContext {
        self.tools.context()
    }

    pub fn set_plan_mode(&mut self, enabled: bool) {
        self.tools.set_plan_mode(enabled);
        self.refresh_system_prompt();
    }

    pub fn set_cwd(&mut self, cwd: std::path::PathBuf) {
        self.tools.set_cwd(cwd);
        self.refresh_system_prompt();
    }

    pub fn refresh_system_prompt(&mut self) {
        let context = self.tools.context();
        let prompt = build_system_prompt(context.cwd(), context.plan_mode());
        self.set_system_prompt(prompt);
    }
}

impl<T: ToolExecutor> Agent<T> {
    pub fn new(client: CompletionClient, tools: T, system_prompt: impl Into<String>) -> Self {
        Self {
            client,
            tools,
            budget: ContextBudget::default(),
            max_tool_result_size: DEFAULT_RESULT_LIMIT,
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            total_tool_calls: 0,
            total_turns: 0,
            canceller: Canceller::new(),
        }
    }

    pub fn with_budget(mut self, budget: ContextBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_result_limit(mut self, max_chars: usize) -> Self {
        self.max_tool_result_size = max_chars;
        self
    }

    pub fn with_canceller(mut self, canceller: Canceller) -> Self {
        self.canceller = canceller;
        self
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn client(&self) -> &CompletionClient {
        &self.client
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.client.set_model(model);
    }

    pub fn budget(&self) -> ContextBudget {
        self.budget
    }

    pub fn is_initialized(&self) -> bool {
        self.messages.first().is_some_and(|m| m.role == Role::System)
    }

    /// Replaces the system prompt used from now on, rewriting index 0 of an
    /// initialized transcript in place.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
        if self.is_initialized() {
            self.messages[0] = Message::system(self.system_prompt.clone());
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Restores a transcript verbatim. It counts as initialized only when it
    /// starts with a system message.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn clear_history(&mut self) {
        self.messages.clear();
        self.total_tool_calls = 0;
        self.total_turns = 0;
    }

    pub fn stats(&self) -> SessionStats {
        let context = self.budget.stats(&self.messages);
        SessionStats {
            used: context.used,
            max: context.max,
            pct: context.pct,
            message_count: self.messages.len(),
            total_tool_calls: self.total_tool_calls,
            total_turns: self.total_turns,
        }
    }

    /// Compacts regardless of the budget.
    pub fn compact_now(&mut self, events: &UnboundedSender<AgentEvent>) -> (usize, usize) {
        self.compact(events)
    }

    /// Runs one user turn to completion, cancellation, or failure. Never
    /// returns an error: everything is reported through `events`.
    pub async fn chat(&mut self, input: &str, events: &UnboundedSender<AgentEvent>) -> TurnOutcome {
        let token = self.canceller.reset();

        if !self.is_initialized() {
            self.messages.insert(0, Message::system(self.system_prompt.clone()));
        }
        self.messages.push(Message::user(input));
        self.total_turns += 1;
        self.compact_if_needed(events);

        match self.run_rounds(&token, events).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "turn failed");
                emit(events, AgentEvent::Error {
                    message: err.to_string(),
                });
                match err {
                    AgentError::LoopLimit(_) => TurnOutcome::LoopLimitExceeded,
                    _ => TurnOutcome::Failed,
                }
            }
        }
    }

    async fn run_rounds(
        &mut self,
        token: &CancellationToken,
        events: &UnboundedSender<AgentEvent>,
    ) -> Result<TurnOutcome, AgentError> {
        let schemas = self.tools.schemas();
        let known: Vec<String> = schemas.iter().map(|s| s.function.name.clone()).collect();

        for round in 1..=MAX_ROUND_TRIPS {
            if token.is_cancelled() {
                info!(round, "turn cancelled before request");
                return Ok(TurnOutcome::Cancelled);
            }

            debug!(round, "starting round trip");
            let reply = match self.stream_reply(&schemas, token, events).await? {
                Streamed::Reply(reply) => reply,
                Streamed::Cancelled => return Ok(TurnOutcome::Cancelled),
            };
            if token.is_cancelled() {
                info!(round, "turn cancelled; discarding streamed reply");
                return Ok(TurnOutcome::Cancelled);
            }

            let Some(mut reply) = reply else {
                return Ok(TurnOutcome::Completed);
            };
            if reply.tool_calls().is_empty() {
                let recovered = fallback::extract_tool_calls(reply.text(), &known);
                if !recovered.is_empty() {
                    debug!(count = recovered.len(), "recovered tool calls from text");
                    reply.tool_calls = Some(recovered);
                }
            }

            let calls = reply.tool_calls().to_vec();
            self.messages.push(reply);
            if calls.is_empty() {
                return Ok(TurnOutcome::Completed);
            }

            if self.run_tools(&calls, token, events).await {
                return Ok(TurnOutcome::Cancelled);
            }
            self.compact_if_needed(events);
        }

        Err(AgentError::LoopLimit(MAX_ROUND_TRIPS))
    }

    /// One streamed completion folded into an assistant message. `None`
    /// means the model said nothing or the body broke off mid-read.
    async fn stream_reply(
        &self,
        schemas: &[ToolSchema],
        token: &CancellationToken,
        events: &UnboundedSender<AgentEvent>,
    ) -> Result<Streamed, AgentError> {
        let mut thinking = true;
        emit(events, AgentEvent::Thinking { active: true });

        let response = tokio::select! {
            response = self.client.stream(&self.messages, schemas) => Some(response),
            _ = token.cancelled() => None,
        };
        let mut stream = match response {
            Some(Ok(stream)) => stream,
            Some(Err(err)) => {
                stop_thinking(&mut thinking, events);
                return Err(err);
            }
            None => {
                stop_thinking(&mut thinking, events);
                info!("turn cancelled while waiting for response headers");
                return Ok(Streamed::Cancelled);
            }
        };

        let mut content = String::new();
        let mut calls = ToolCallAccumulator::new();

        loop {
            let next = tokio::select! {
                next = stream.next() => Some(next),
                _ = token.cancelled() => None,
            };
            let Some(next) = next else {
                stop_thinking(&mut thinking, events);
                info!("turn cancelled mid-stream; draining response in background");
                tokio::spawn(async move { while stream.next().await.is_some() {} });
                return Ok(Streamed::Cancelled);
            };

            match next {
                Some(Ok(StreamEvent::Text(text))) => {
                    stop_thinking(&mut thinking, events);
                    let count = estimate_fragment_tokens(&text);
                    content.push_str(&text);
                    emit(events, AgentEvent::Text { text });
                    emit(events, AgentEvent::Tokens { count });
                }
                Some(Ok(StreamEvent::ToolCall(delta))) => {
                    stop_thinking(&mut thinking, events);
                    if let Some(arguments) = delta
                        .function
                        .as_ref()
                        .and_then(|f| f.arguments.as_deref())
                        .filter(|a| !a.is_empty())
                    {
                        emit(events, AgentEvent::Tokens {
                            count: estimate_fragment_tokens(arguments),
                        });
                    }
                    calls.push(delta);
                }
                Some(Ok(StreamEvent::End)) | None => {
                    stop_thinking(&mut thinking, events);
                    break;
                }
                Some(Err(err)) => {
                    stop_thinking(&mut thinking, events);
                    warn!(error = %err, "stream read failed; dropping partial reply");
                    return Ok(Streamed::Reply(None));
                }
            }
        }

        let calls = calls.finish();
        debug!(chars = content.len(), tool_calls = calls.len(), "stream finished");
        Ok(Streamed::Reply(Message::assistant(content, calls)))
    }

    // Returns true if cancelled part-way. Skipped calls still get a tool message.
    async fn run_tools(
        &mut self,
        calls: &[ToolCall],
        token: &CancellationToken,
        events: &UnboundedSender<AgentEvent>,
    ) -> bool {
        for (i, call) in calls.iter().enumerate() {
            if token.is_cancelled() {
                self.skip_remaining(&calls[i..]);
                return true;
            }

            let input = call.parse_arguments();
            self.total_tool_calls += 1;
            emit(events, AgentEvent::ToolCall {
                name: call.name().to_string(),
                input: input.clone(),
            });

            let result = self.execute_tool(call.name(), input).await;
            emit(events, AgentEvent::ToolResult {
                name: call.name().to_string(),
                content: result.clone(),
            });
            self.messages.push(Message::tool_result(&call.id, result));

            if token.is_cancelled() {
                self.skip_remaining(&calls[i + 1..]);
                return true;
            }
        }
        false
    }

    fn skip_remaining(&mut self, calls: &[ToolCall]) {
        info!(skipped = calls.len(), "turn cancelled during tool dispatch");
        for call in calls {
            self.messages
                .push(Message::tool_result(&call.id, CANCELLED_TOOL_RESULT));
        }
    }

    async fn execute_tool(&self, name: &str, input: serde_json::Value) -> String {
        debug!(tool = name, "dispatching tool call");
        let outcome = AssertUnwindSafe(self.tools.execute(name, input))
            .catch_unwind()
            .await;
        let text = match outcome {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => format!("Error: {err}"),
            Err(panic) => {
                warn!(tool = name, "tool panicked");
                format!("Error: {name} failed unexpectedly: {}", panic_message(&*panic))
            }
        };
        truncate(&text, self.max_tool_result_size)
    }

    fn compact_if_needed(&mut self, events: &UnboundedSender<AgentEvent>) {
        if self.budget.should_compact(&self.messages) {
            self.compact(events);
        }
    }

    fn compact(&mut self, events: &UnboundedSender<AgentEvent>) -> (usize, usize) {
        let before = self.messages.len();
        self.messages = compact_messages(std::mem::take(&mut self.messages));
        let after = self.messages.len();
        if after < before {
            info!(before, after, "context compacted");
            emit(events, AgentEvent::Compacted { before, after });
        } else {
            debug!(messages = before, "nothing to compact");
        }
        (before, after)
    }
}

fn emit(events: &UnboundedSender<AgentEvent>, event: AgentEvent) {
    let _ = events.send(event);
}

fn stop_thinking(thinking: &mut bool, events: &UnboundedSender<AgentEvent>) {
    if std::mem::take(thinking) {
        emit(events, AgentEvent::Thinking { active: false });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolOutput;
    use axum::Router;
    use axum::body::Body;
    use axum::extract::{Json, State};
    use axum::http::{StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use futures::future::BoxFuture;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Clone)]
    enum Reply {
        Sse(String),
        Status(u16, &'static str),
        Stall,
        /// Headers and one chunk, then the body either hangs or breaks.
        Partial(String, Tail),
    }

    #[derive(Clone, Copy)]
    enum Tail {
        Hang,
        Break,
    }

    #[derive(Clone, Default)]
    struct Script {
        replies: Arc<Mutex<VecDeque<Reply>>>,
        repeat: Option<Reply>,
        requests: Arc<Mutex<Vec<Value>>>,
    }

    impl Script {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into())),
                ..Self::default()
            }
        }

        fn repeating(reply: Reply) -> Self {
            Self {
                repeat: Some(reply),
                ..Self::default()
            }
        }

        fn requests(&self) -> Vec<Value> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn completions(State(script): State<Script>, Json(body): Json<Value>) -> Response {
        script.requests.lock().unwrap().push(body);
        let next = script.replies.lock().unwrap().pop_front();
        match next.or_else(|| script.repeat.clone()) {
            Some(Reply::Sse(body)) => ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response(),
            Some(Reply::Status(code, body)) => {
                (StatusCode::from_u16(code).unwrap(), body).into_response()
            }
            Some(Reply::Stall) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                StatusCode::GATEWAY_TIMEOUT.into_response()
            }
            Some(Reply::Partial(first, tail)) => {
                let head = futures::stream::once(async move { Ok::<_, std::io::Error>(first) });
                let body = match tail {
                    Tail::Hang => Body::from_stream(head.chain(futures::stream::pending())),
                    Tail::Break => Body::from_stream(head.chain(futures::stream::once(async {
                        Err(std::io::Error::other("connection reset"))
                    }))),
                };
                ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
            }
            None => (StatusCode::INTERNAL_SERVER_ERROR, "script exhausted").into_response(),
        }
    }

    async fn serve(script: Script) -> String {
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn sse(chunks: &[Value]) -> String {
        let mut body: String = chunks.iter().map(|c| format!("data: {c}\n\n")).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn partial_reply(text: &str, tail: Tail) -> Reply {
        let chunk = json!({"choices": [{"delta": {"content": text}}]});
        Reply::Partial(format!("data: {chunk}\n\n"), tail)
    }

    fn text_reply(fragments: &[&str]) -> Reply {
        let chunks: Vec<Value> = fragments
            .iter()
            .map(|f| json!({"choices": [{"delta": {"content": f}}]}))
            .collect();
        Reply::Sse(sse(&chunks))
    }

    /// Each call's arguments arrive in two fragments.
    fn tool_reply(calls: &[(&str, &str, &str)]) -> Reply {
        let mut chunks = Vec::new();
        for (index, (id, name, arguments)) in calls.iter().enumerate() {
            let (head, tail) = arguments.split_at(arguments.len() / 2);
            chunks.push(json!({"choices": [{"delta": {"tool_calls": [
                {"index": index, "id": id, "function": {"name": name, "arguments": head}}
            ]}}]}));
            chunks.push(json!({"choices": [{"delta": {"tool_calls": [
                {"index": index, "function": {"arguments": tail}}
            ]}}]}));
        }
        Reply::Sse(sse(&chunks))
    }

    #[derive(Default)]
    struct ScriptedTools {
        fail_on: Option<&'static str>,
        panic_on: Option<&'static str>,
        cancel_on_run: Option<Canceller>,
        long_output: bool,
        executed: Arc<Mutex<Vec<String>>>,
    }

    impl ToolExecutor for ScriptedTools {
        fn schemas(&self) -> Vec<ToolSchema> {
            ["list_files", "read_file"]
                .into_iter()
                .map(|name| ToolSchema::function(name, "test tool", json!({"type": "object"})))
                .collect()
        }

        fn execute<'a>(&'a self, name: &'a str, input: Value) -> BoxFuture<'a, ToolOutput> {
            Box::pin(async move {
                self.executed.lock().unwrap().push(name.to_string());
                if let Some(canceller) = &self.cancel_on_run {
                    canceller.cancel();
                }
                if self.panic_on == Some(name) {
                    panic!("tool exploded");
                }
                if self.fail_on == Some(name) {
                    return Err("disk on fire".into());
                }
                if self.long_output {
                    return Ok("x".repeat(100));
                }
                Ok(format!("{name} ok: {input}"))
            })
        }
    }

    fn agent(base_url: &str, tools: ScriptedTools) -> Agent<ScriptedTools> {
        Agent::new(CompletionClient::new(base_url, "test-model"), tools, "You are a test.")
    }

    async fn run(agent: &mut Agent<ScriptedTools>, input: &str) -> (TurnOutcome, Vec<AgentEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = agent.chat(input, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    fn errors(events: &[AgentEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::Error { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn text_only_turn_streams_and_completes() {
        let script = Script::new(vec![text_reply(&["Hel", "lo!"])]);
        let url = serve(script.clone()).await;
        let mut agent = agent(&url, ScriptedTools::default());

        let (outcome, events) = run(&mut agent, "hi").await;

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(
            events,
            vec![
                AgentEvent::Thinking { active: true },
                AgentEvent::Thinking { active: false },
                AgentEvent::Text { text: "Hel".into() },
                AgentEvent::Tokens { count: 1 },
                AgentEvent::Text { text: "lo!".into() },
                AgentEvent::Tokens { count: 1 },
            ]
        );

        let roles: Vec<Role> = agent.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Assistant]);
        assert_eq!(agent.messages()[2].text(), "Hello!");

        let requests = script.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["model"], "test-model");
        assert_eq!(requests[0]["stream"], true);
        assert_eq!(requests[0]["tools"].as_array().unwrap().len(), 2);
        assert_eq!(requests[0]["messages"][0]["role"], "system");
        assert_eq!(agent.stats().total_turns, 1);
    }

    #[tokio::test]
    async fn tool_round_feeds_results_back() {
        let script = Script::new(vec![
            tool_reply(&[("call_1", "read_file", r#"{"path": "src/main.rs"}"#)]),
            text_reply(&["Done."]),
        ]);
        let url = serve(script.clone()).await;
        let mut agent = agent(&url, ScriptedTools::default());

        let (outcome, events) = run(&mut agent, "read main").await;

        assert_eq!(outcome, TurnOutcome::Completed);
        assert!(events.contains(&AgentEvent::ToolCall {
            name: "read_file".into(),
            input: json!({"path": "src/main.rs"}),
        }));

        let messages = agent.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].tool_calls()[0].id, "call_1");
        assert_eq!(messages[3].role, Role::Tool);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert!(messages[3].text().starts_with("read_file ok"));

        let requests = script.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1]["messages"][3]["role"], "tool");
        assert_eq!(agent.stats().total_tool_calls, 1);
    }

    #[tokio::test]
    async fn failing_tool_does_not_affect_its_neighbours() {
        let script = Script::new(vec![
            tool_reply(&[
                ("call_1", "list_files", r#"{"path": "."}"#),
                ("call_2", "read_file", r#"{"path": "a"}"#),
            ]),
            text_reply(&["Recovered."]),
        ]);
        let url = serve(script.clone()).await;
        let tools = ScriptedTools {
            panic_on: Some("read_file"),
            ..ScriptedTools::default()
        };
        let mut agent = agent(&url, tools);

        let (outcome, events) = run(&mut agent, "look around").await;

        assert_eq!(outcome, TurnOutcome::Completed);
        assert!(errors(&events).is_empty());
        let messages = agent.messages();
        assert!(messages[3].text().starts_with("list_files ok"));
        assert!(messages[4].text().starts_with("Error: read_file failed unexpectedly: tool exploded"));
        assert_eq!(script.requests().len(), 2);
    }

    #[tokio::test]
    async fn tool_errors_become_result_text() {
        let script = Script::new(vec![
            tool_reply(&[("call_1", "read_file", "{}")]),
            text_reply(&["ok"]),
        ]);
        let url = serve(script).await;
        let tools = ScriptedTools {
            fail_on: Some("read_file"),
            ..ScriptedTools::default()
        };
        let mut agent = agent(&url, tools);

        run(&mut agent, "go").await;
        assert_eq!(agent.messages()[3].text(), "Error: disk on fire");
    }

    #[tokio::test]
    async fn tool_results_are_capped() {
        let script = Script::new(vec![
            tool_reply(&[("call_1", "read_file", "{}")]),
            text_reply(&["ok"]),
        ]);
        let url = serve(script).await;
        let tools = ScriptedTools {
            long_output: true,
            ..ScriptedTools::default()
        };
        let mut agent = agent(&url, tools).with_result_limit(10);

        run(&mut agent, "go").await;
        assert_eq!(
            agent.messages()[3].text(),
            "xxxxxxxxxx\n... (truncated, 100 chars total)"
        );
    }

    #[tokio::test]
    async fn loop_stops_after_the_round_trip_limit() {
        let script = Script::repeating(tool_reply(&[("call_1", "list_files", "{}")]));
        let url = serve(script.clone()).await;
        let mut agent = agent(&url, ScriptedTools::default());

        let (outcome, events) = run(&mut agent, "never stop").await;

        assert_eq!(outcome, TurnOutcome::LoopLimitExceeded);
        assert_eq!(script.requests().len(), MAX_ROUND_TRIPS);
        assert_eq!(
            errors(&events),
            vec![AgentError::LoopLimit(MAX_ROUND_TRIPS).to_string()]
        );
        assert_eq!(agent.stats().total_tool_calls, MAX_ROUND_TRIPS);
    }

    #[tokio::test]
    async fn cancel_after_a_tool_result_stops_the_turn() {
        let script = Script::new(vec![
            tool_reply(&[
                ("call_1", "list_files", "{}"),
                ("call_2", "read_file", "{}"),
            ]),
            text_reply(&["should never be requested"]),
        ]);
        let url = serve(script.clone()).await;
        let canceller = Canceller::new();
        let tools = ScriptedTools {
            cancel_on_run: Some(canceller.clone()),
            ..ScriptedTools::default()
        };
        let executed = tools.executed.clone();
        let mut agent = agent(&url, tools).with_canceller(canceller);

        let (outcome, events) = run(&mut agent, "go").await;

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert!(errors(&events).is_empty());
        assert_eq!(*executed.lock().unwrap(), ["list_files"]);
        assert_eq!(script.requests().len(), 1);

        let messages = agent.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[4].tool_call_id.as_deref(), Some("call_2"));
        assert_eq!(messages[4].text(), CANCELLED_TOOL_RESULT);
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_headers_returns_quietly() {
        let script = Script::new(vec![Reply::Stall, text_reply(&["second turn"])]);
        let url = serve(script).await;
        let mut agent = agent(&url, ScriptedTools::default());
        let canceller = agent.canceller();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let (outcome, events) = tokio::time::timeout(Duration::from_secs(5), run(&mut agent, "slow"))
            .await
            .expect("cancellation should end the turn promptly");

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert!(errors(&events).is_empty());
        assert_eq!(events.last(), Some(&AgentEvent::Thinking { active: false }));

        let (outcome, _) = run(&mut agent, "again").await;
        assert_eq!(outcome, TurnOutcome::Completed);
    }

    #[tokio::test]
    async fn cancel_mid_stream_discards_the_partial_reply() {
        let script = Script::new(vec![partial_reply("partial", Tail::Hang), text_reply(&["again"])]);
        let url = serve(script).await;
        let mut agent = agent(&url, ScriptedTools::default());
        let canceller = agent.canceller();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });
        let (outcome, events) = tokio::time::timeout(Duration::from_secs(5), run(&mut agent, "slow"))
            .await
            .expect("cancellation should end the turn promptly");

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(
            events,
            vec![
                AgentEvent::Thinking { active: true },
                AgentEvent::Thinking { active: false },
                AgentEvent::Text { text: "partial".into() },
                AgentEvent::Tokens { count: 2 },
            ]
        );
        let roles: Vec<Role> = agent.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User]);

        let (outcome, _) = run(&mut agent, "again").await;
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(agent.messages().last().map(Message::text), Some("again"));
    }

    #[tokio::test]
    async fn broken_stream_ends_the_turn_without_a_reply() {
        let script = Script::new(vec![partial_reply("partial", Tail::Break)]);
        let url = serve(script.clone()).await;
        let mut agent = agent(&url, ScriptedTools::default());

        let (outcome, events) = tokio::time::timeout(Duration::from_secs(5), run(&mut agent, "hi"))
            .await
            .expect("a broken body should end the turn");

        assert_eq!(outcome, TurnOutcome::Completed);
        assert!(errors(&events).is_empty());
        assert!(events.contains(&AgentEvent::Text { text: "partial".into() }));
        assert_eq!(agent.messages().len(), 2);
        assert_eq!(script.requests().len(), 1);
    }

    #[tokio::test]
    async fn cancel_before_the_turn_starts_is_honoured() {
        let script = Script::new(vec![text_reply(&["never sent"])]);
        let url = serve(script.clone()).await;
        let mut agent = agent(&url, ScriptedTools::default());
        let canceller = agent.canceller();

        canceller.arm();
        canceller.cancel();
        let (outcome, events) = run(&mut agent, "hi").await;

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert!(events.is_empty());
        assert!(script.requests().is_empty());

        let (outcome, _) = run(&mut agent, "hi again").await;
        assert_eq!(outcome, TurnOutcome::Completed);
    }

    #[tokio::test]
    async fn fenced_tool_call_in_text_is_executed() {
        let fenced = "I'll run this:\n```json\n{\"name\": \"list_files\", \"arguments\": {\"path\": \".\"}}\n```";
        let script = Script::new(vec![text_reply(&[fenced]), text_reply(&["Listed."])]);
        let url = serve(script.clone()).await;
        let tools = ScriptedTools::default();
        let executed = tools.executed.clone();
        let mut agent = agent(&url, tools);

        let (outcome, _) = run(&mut agent, "list").await;

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(*executed.lock().unwrap(), ["list_files"]);
        let call = &agent.messages()[2].tool_calls()[0];
        assert!(call.id.starts_with("call_text_"));
        assert_eq!(call.parse_arguments(), json!({"path": "."}));
        assert_eq!(script.requests().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_server_fails_the_turn() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let mut agent = agent(&url, ScriptedTools::default());

        let (outcome, events) = run(&mut agent, "hi").await;

        assert_eq!(outcome, TurnOutcome::Failed);
        let errors = errors(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Is Ollama running?"));
        assert_eq!(agent.messages().len(), 2);
    }

    #[tokio::test]
    async fn http_errors_report_status_and_body() {
        let url = serve(Script::new(vec![Reply::Status(500, "model exploded")])).await;
        let mut agent = agent(&url, ScriptedTools::default());

        let (outcome, events) = run(&mut agent, "hi").await;

        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(errors(&events), ["Completion API error (500): model exploded"]);
    }

    #[tokio::test]
    async fn oversized_transcript_is_compacted_before_sending() {
        let script = Script::new(vec![text_reply(&["ok"])]);
        let url = serve(script.clone()).await;
        let mut agent = agent(&url, ScriptedTools::default()).with_budget(ContextBudget {
            max_context_tokens: 100,
            compact_threshold: 0.5,
        });

        let mut history = vec![Message::system("You are a test.")];
        for i in 0..10 {
            history.push(Message::user(format!("question {i} {}", "words ".repeat(10))));
            history.push(Message::assistant_text(format!("answer {i}")));
        }
        agent.set_messages(history);

        let (_, events) = run(&mut agent, "next").await;

        assert_eq!(events[0], AgentEvent::Compacted { before: 22, after: 9 });
        assert_eq!(script.requests()[0]["messages"].as_array().unwrap().len(), 9);
        assert_eq!(agent.messages().len(), 10);
    }

    #[tokio::test]
    async fn compaction_that_changes_nothing_is_not_reported() {
        let script = Script::new(vec![text_reply(&["ok"])]);
        let url = serve(script).await;
        let mut agent = agent(&url, ScriptedTools::default()).with_budget(ContextBudget {
            max_context_tokens: 1,
            compact_threshold: 0.5,
        });

        let (outcome, events) = run(&mut agent, "hi").await;
        assert_eq!(outcome, TurnOutcome::Completed);
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::Compacted { .. })));

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(agent.compact_now(&tx), (3, 3));
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn system_prompt_updates_rewrite_the_first_message() {
        let mut agent = agent("http://localhost:1", ScriptedTools::default());
        agent.set_system_prompt("before");
        assert!(agent.messages().is_empty());

        agent.set_messages(vec![Message::system("old"), Message::user("hi")]);
        assert!(agent.is_initialized());
        agent.set_system_prompt("new");
        assert_eq!(agent.messages()[0].text(), "new");

        agent.clear_history();
        assert!(!agent.is_initialized());
        assert_eq!(agent.stats().message_count, 0);
    }
}
