//! Peripheral dispatch table.
//!
//! Maps a request message type to its handler. Every request gets exactly
//! one response: unknown commands, undecodable bodies and handler errors all
//! become a failure response naming the request, so the controller's active
//! command always completes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use super::wifi::WifiError;
use crate::bridge::envelope::{EnvelopeError, RequestEnvelope, ResponseEnvelope, peek_msg_type};
use crate::bridge::protocol::{CommandCode, FailureStatus, MSG_RESP_FAILURE};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),

    /// Precondition for the command does not hold.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed request: {0}")]
    Malformed(#[from] EnvelopeError),

    #[error(transparent)]
    Wifi(#[from] WifiError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Status carried in the failure response.
    pub fn status(&self) -> FailureStatus {
        match self {
            Self::UnknownCommand(_) => FailureStatus::UnknownCommand,
            Self::InvalidState(_) | Self::Wifi(WifiError::NotAssociated) => {
                FailureStatus::InvalidState
            }
            Self::InvalidArgument(_) | Self::Wifi(WifiError::InvalidConfig(_)) => {
                FailureStatus::InvalidArgument
            }
            Self::Malformed(_) => FailureStatus::Malformed,
            Self::Wifi(_) => FailureStatus::Driver,
            Self::Internal(_) => FailureStatus::Internal,
        }
    }
}

/// Handler for one command family.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, HandlerError>;
}

#[async_trait::async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(RequestEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseEnvelope, HandlerError>> + Send + 'static,
{
    async fn handle(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, HandlerError> {
        (self)(request).await
    }
}

#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<u8, Arc<dyn CommandHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `code`, returning the handler it replaces.
    pub fn register<H>(&mut self, code: CommandCode, handler: H) -> Option<Arc<dyn CommandHandler>>
    where
        H: CommandHandler,
    {
        self.register_shared(code, Arc::new(handler))
    }

    pub fn register_shared(
        &mut self,
        code: CommandCode,
        handler: Arc<dyn CommandHandler>,
    ) -> Option<Arc<dyn CommandHandler>> {
        let previous = self.handlers.insert(code.as_u8(), handler);
        if previous.is_some() {
            tracing::debug!(%code, "Replaced command handler");
        }
        previous
    }

    pub fn contains(&self, code: CommandCode) -> bool {
        self.handlers.contains_key(&code.as_u8())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Decode `request`, run its handler and build the response. Never fails.
    pub async fn dispatch(&self, request: &[u8]) -> ResponseEnvelope {
        let Some(msg_type) = peek_msg_type(request) else {
            tracing::warn!("Empty request payload");
            return ResponseEnvelope::failure(
                MSG_RESP_FAILURE,
                FailureStatus::Malformed,
                "empty request",
            );
        };

        let Some(handler) = self.handlers.get(&msg_type) else {
            let err = HandlerError::UnknownCommand(msg_type);
            tracing::warn!(msg_type, "No handler for command");
            return ResponseEnvelope::failure(msg_type, err.status(), err.to_string());
        };

        let envelope = match RequestEnvelope::decode(request) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = HandlerError::Malformed(e);
                tracing::warn!(msg_type, error = %err, "Rejecting request");
                return ResponseEnvelope::failure(msg_type, err.status(), err.to_string());
            }
        };

        tracing::debug!(code = %envelope.code(), "Dispatching command");
        match handler.handle(envelope).await {
            Ok(response) if response.answers() == msg_type => response,
            Ok(response) => {
                tracing::error!(
                    msg_type,
                    response_type = response.msg_type(),
                    "Handler answered a different command family"
                );
                ResponseEnvelope::failure(
                    msg_type,
                    FailureStatus::Internal,
                    "handler returned mismatched response",
                )
            }
            Err(e) => {
                tracing::warn!(msg_type, error = %e, "Command failed");
                ResponseEnvelope::failure(msg_type, e.status(), e.to_string())
            }
        }
    }

    /// [`dispatch`](Self::dispatch) and encode the response for the wire.
    pub async fn dispatch_frame(&self, request: &[u8]) -> Bytes {
        let response = self.dispatch(request).await;
        match response.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                let request = response.answers();
                tracing::error!(msg_type = request, error = %e, "Failed to encode response");
                encode_bare_failure(request, FailureStatus::Internal)
            }
        }
    }
}

/// Failure response with an empty message; cannot fail to encode.
fn encode_bare_failure(request: u8, status: FailureStatus) -> Bytes {
    Bytes::from(vec![MSG_RESP_FAILURE, 3, 0, request, status as u8, 0])
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codes: Vec<u8> = self.handlers.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("DispatchTable").field("codes", &codes).finish()
    }
}
