use crate::{CompleteResponse, Error, LLMRequest, Response};

/// A backend that can answer canonical requests.
///
/// `complete` returns one buffered reply, `generate` a streamed one. Both
/// surface non-success HTTP statuses as [`Error::Transport`] so the retry
/// engine can classify them.
#[async_trait::async_trait]
pub trait LLMProvider: Send + Sync + 'static {
    /// Provider name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Request one buffered (non-streaming) reply.
    async fn complete(&self, request: &LLMRequest) -> Result<CompleteResponse, Error>;

    /// Request a streamed reply.
    async fn generate(&self, request: &LLMRequest) -> Result<Response, Error>;
}
