//! Multi-round tool calling.
//!
//! [`ToolLoop`] drives one conversation through the states
//! `AwaitingModel -> ModelReplied -> (ExecutingTools -> AwaitingModel) | FinalText`.
//! Each round's function calls are answered concurrently and appended to the
//! transcript, with the model's own reply items, before the model is asked again.

use async_trait::async_trait;

use crate::response::CompleteResponse;
use crate::streaming::StreamedTurn;
use crate::tools::{FunctionSet, ToolCallResult};
use crate::types::{FunctionCall, Prompt};
use crate::Error;

/// Rounds a forced loop may run before giving up.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

/// A model reply the loop can inspect.
pub trait TurnReply: Send + From<CompleteResponse> {
    /// Split off a reply that requests function calls; anything else is an answer.
    fn into_tool_round(self) -> Result<CompleteResponse, Self>;
}

impl TurnReply for CompleteResponse {
    fn into_tool_round(self) -> Result<CompleteResponse, Self> {
        if self.has_function_calls() {
            Ok(self)
        } else {
            Err(self)
        }
    }
}

impl TurnReply for StreamedTurn {
    fn into_tool_round(self) -> Result<CompleteResponse, Self> {
        match self {
            StreamedTurn::Complete(reply) if reply.has_function_calls() => Ok(reply),
            other => Err(other),
        }
    }
}

impl From<CompleteResponse> for StreamedTurn {
    fn from(reply: CompleteResponse) -> Self {
        StreamedTurn::Complete(reply)
    }
}

/// One model turn over a transcript.
#[async_trait]
pub trait ModelTurn: Send + Sync {
    type Reply: TurnReply;

    /// Ask the model to continue `transcript`. With `offer_tools` false the
    /// model must answer in text.
    async fn respond(&self, transcript: &Prompt, offer_tools: bool) -> Result<Self::Reply, Error>;
}

/// What happens when the model still calls tools after the last allowed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnLimit {
    /// Ask once more with tools withheld.
    Withhold,
    /// Fail with [`Error::ToolRoundLimit`].
    Fail,
}

/// The result of a settled loop.
#[derive(Debug, Clone)]
pub struct ToolLoopOutcome<R = CompleteResponse> {
    /// The model's final reply.
    pub reply: R,
    /// Everything appended before the final reply.
    pub transcript: Prompt,
    /// Tool rounds executed.
    pub rounds: usize,
    /// Every function call answered, in order.
    pub calls: Vec<FunctionCall>,
}

enum State<R> {
    AwaitingModel { offer_tools: bool },
    ModelReplied(R),
    ExecutingTools(CompleteResponse),
    FinalText(R),
}

/// Bounded, iterative tool-calling loop.
#[derive(Debug, Clone, Copy)]
pub struct ToolLoop {
    max_rounds: usize,
    on_limit: OnLimit,
}

impl ToolLoop {
    /// At most one tool round; the follow-up turn is made with tools withheld.
    pub fn single_round() -> Self {
        Self {
            max_rounds: 1,
            on_limit: OnLimit::Withhold,
        }
    }

    /// Loop until the model answers in text, failing after `max_rounds` tool rounds.
    pub fn forced(max_rounds: usize) -> Self {
        Self {
            max_rounds: max_rounds.max(1),
            on_limit: OnLimit::Fail,
        }
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Run the loop to its final reply.
    ///
    /// The reply that settles the loop is returned as is; with a streaming
    /// turn that is the stream the caller reads the answer from.
    pub async fn run<T>(
        &self,
        turn: &T,
        functions: &FunctionSet<'_>,
        mut transcript: Prompt,
    ) -> Result<ToolLoopOutcome<T::Reply>, Error>
    where
        T: ModelTurn + ?Sized,
    {
        let mut rounds = 0;
        let mut calls = Vec::new();
        let mut state = State::AwaitingModel {
            offer_tools: !functions.is_empty(),
        };

        loop {
            state = match state {
                State::AwaitingModel { offer_tools } => {
                    State::ModelReplied(turn.respond(&transcript, offer_tools).await?)
                }
                State::ModelReplied(reply) => match reply.into_tool_round() {
                    Err(answer) => State::FinalText(answer),
                    Ok(round) if functions.is_empty() => State::FinalText(round.into()),
                    Ok(round) if rounds < self.max_rounds => State::ExecutingTools(round),
                    Ok(_) if self.on_limit == OnLimit::Fail => {
                        tracing::error!(rounds, "model kept calling tools past the round limit");
                        return Err(Error::ToolRoundLimit { rounds });
                    }
                    Ok(round) => {
                        // Tools were withheld yet the model still asked; keep whatever text it gave
                        tracing::debug!(rounds, "ignoring function calls after the last tool round");
                        State::FinalText(round.into())
                    }
                },
                State::ExecutingTools(reply) => {
                    let requested = reply.function_calls();
                    tracing::debug!(round = rounds + 1, calls = requested.len(), "executing tool round");

                    let results: Vec<ToolCallResult> = functions.call_all(&requested).await;
                    calls.extend(requested.into_iter().cloned());

                    transcript.extend(reply.to_items());
                    transcript.extend(results.iter().map(ToolCallResult::to_input_item));
                    rounds += 1;

                    State::AwaitingModel {
                        offer_tools: rounds < self.max_rounds || self.on_limit == OnLimit::Fail,
                    }
                }
                State::FinalText(reply) => {
                    return Ok(ToolLoopOutcome {
                        reply,
                        transcript,
                        rounds,
                        calls,
                    });
                }
            };
        }
    }
}
