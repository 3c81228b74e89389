//! Decoding of a streamed chat completion.
//!
//! The response body is a sequence of `data: {json}` lines. `SseDecoder`
//! turns raw bytes into parsed chunks, `decode_events` lifts that into a
//! finite stream of typed `StreamEvent`s, and `ToolCallAccumulator`
//! reassembles the index-keyed tool call fragments.

use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use uuid::Uuid;

use crate::ai_sdk::{ChatChunk, ToolCall, ToolCallDelta};

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// Line-buffering decoder for the event-stream body. Never fails: blank
/// lines, non-`data:` lines, the terminator and malformed JSON are dropped.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<ChatChunk> {
        self.buffer.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            chunks.extend(parse_line(&line));
        }
        chunks
    }

    // Body ended without a final newline.
    pub(crate) fn finish(&mut self) -> Vec<ChatChunk> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line).into_iter().collect()
    }
}

fn parse_line(line: &[u8]) -> Option<ChatChunk> {
    let line = std::str::from_utf8(line).ok()?.trim();
    let data = line.strip_prefix(DATA_PREFIX)?;
    if data == DONE_MARKER {
        return None;
    }
    serde_json::from_str(data).ok()
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamEvent {
    Text(String),
    ToolCall(ToolCallDelta),
    End,
}

pub(crate) fn chunk_events(chunk: ChatChunk) -> impl Iterator<Item = StreamEvent> {
    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .unwrap_or_default();

    let text = delta
        .content
        .filter(|text| !text.is_empty())
        .map(StreamEvent::Text);
    let calls = delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(StreamEvent::ToolCall);

    text.into_iter().chain(calls)
}

pub(crate) type EventStream<E> = BoxStream<'static, Result<StreamEvent, E>>;

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn queue(&mut self, chunks: Vec<ChatChunk>) {
        self.pending.extend(chunks.into_iter().flat_map(chunk_events));
    }
}

/// Lazily decodes a byte stream into typed events, ending with
/// `StreamEvent::End`. A read error is yielded once and ends the stream.
pub(crate) fn decode_events<S, B, E>(body: S) -> EventStream<E>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let chunks = state.decoder.push(bytes.as_ref());
                    state.queue(chunks);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err), state));
                }
                None => {
                    let chunks = state.decoder.finish();
                    state.queue(chunks);
                    state.pending.push_back(StreamEvent::End);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Rebuilds complete tool calls from fragments keyed by `index`. Lives for
/// exactly one streamed response.
#[derive(Debug)]
pub(crate) struct ToolCallAccumulator {
    stream_id: String,
    calls: BTreeMap<usize, ToolCall>,
}

impl ToolCallAccumulator {
    pub(crate) fn new() -> Self {
        Self {
            stream_id: Uuid::new_v4().simple().to_string(),
            calls: BTreeMap::new(),
        }
    }

    pub(crate) fn push(&mut self, delta: ToolCallDelta) {
        let index = delta.index.unwrap_or(0);
        let stream_id = &self.stream_id;
        let call = self
            .calls
            .entry(index)
            .or_insert_with(|| ToolCall::new(format!("call_{index}_{stream_id}"), "", ""));

        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            call.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                call.function.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                call.function.arguments.push_str(&arguments);
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub(crate) fn finish(self) -> Vec<ToolCall> {
        self.calls.into_values().collect()
    }
}
