//! ### Error taxonomy
//! Handlers, filters, resource managers and buses raise [`HandlerError`].
//! Callers of the processor only ever receive a [`MicroProcessorError`], which is what
//! [`ExceptionTranslator`](crate::bus_components::translator::ExceptionTranslator) turns a `HandlerError` into.

use crate::cancellation::{CancellationToken, OperationCancelled};

pub type AnyError = dyn std::error::Error + Send + Sync;

/// Faults of the processor itself.
#[derive(Debug, thiserror::Error)]
pub enum BaseError {
	#[error("index {index} is out of range for a stream of {len} message(s)")]
	IndexOutOfRange { index: usize, len: usize },

	#[error("unit of work mode '{0}' is not supported")]
	InvalidUnitOfWorkMode(String),

	#[error("handler of {expected} received a message of type {actual}")]
	MessageTypeMismatch { expected: &'static str, actual: &'static str },

	#[error("{0} is not available while executing a query")]
	ReadOnlyContext(&'static str),

	#[error("maximum operation depth of {0} exceeded")]
	MaxDepthExceeded(usize),

	#[error("flush task failed: {0}")]
	TaskFailed(String),

	#[error("query pipeline did not produce a response of type {0}")]
	MissingResponse(&'static str),
}

/// Raised by handler code when a message violates a business rule.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct BusinessRuleError {
	message: String,
	#[source]
	source: Option<Box<AnyError>>,
}

impl BusinessRuleError {
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into(), source: None }
	}

	pub fn with_source(message: impl Into<String>, source: impl Into<Box<AnyError>>) -> Self {
		Self {
			message: message.into(),
			source: Some(source.into()),
		}
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

/// Optimistic concurrency violation, typically raised by a resource manager while flushing.
#[derive(Debug, thiserror::Error)]
#[error("concurrency conflict: {message}")]
pub struct ConcurrencyConflict {
	message: String,
}

impl ConcurrencyConflict {
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into() }
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

/// Anything raised while a message or query is being processed.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
	#[error(transparent)]
	BusinessRule(#[from] BusinessRuleError),

	#[error(transparent)]
	Conflict(#[from] ConcurrencyConflict),

	#[error(transparent)]
	Cancelled(#[from] OperationCancelled),

	#[error(transparent)]
	Base(#[from] BaseError),

	/// Already categorised, e.g. a [`BadRequestError`] raised on purpose.
	#[error(transparent)]
	Processor(#[from] MicroProcessorError),

	#[error(transparent)]
	Other(Box<AnyError>),
}

impl HandlerError {
	pub fn other(err: impl Into<Box<AnyError>>) -> Self {
		Self::Other(err.into())
	}
}

impl From<BadRequestError> for HandlerError {
	fn from(value: BadRequestError) -> Self {
		Self::Processor(MicroProcessorError::BadRequest(value))
	}
}

#[derive(Debug, thiserror::Error)]
#[error("bad request: {message}")]
pub struct BadRequestError {
	message: String,
	#[source]
	source: Option<Box<HandlerError>>,
}

impl BadRequestError {
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into(), source: None }
	}

	pub(crate) fn wrap(source: HandlerError) -> Self {
		Self {
			message: source.to_string(),
			source: Some(Box::new(source)),
		}
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	pub fn inner(&self) -> Option<&HandlerError> {
		self.source.as_deref()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
	Cancelled,
	BadRequest,
	Conflict,
	InternalServerError,
	InvalidArgument,
}

/// The error callers of the processor observe.
#[derive(Debug, thiserror::Error)]
pub enum MicroProcessorError {
	#[error(transparent)]
	Cancelled(OperationCancelled),

	#[error(transparent)]
	BadRequest(BadRequestError),

	#[error("conflict: {source}")]
	Conflict { source: Box<HandlerError> },

	#[error("internal server error: {source}")]
	InternalServerError { source: Box<HandlerError> },

	#[error("invalid argument: {0}")]
	Argument(String),
}

impl MicroProcessorError {
	pub fn conflict(source: HandlerError) -> Self {
		Self::Conflict { source: Box::new(source) }
	}

	pub fn internal_server_error(source: HandlerError) -> Self {
		Self::InternalServerError { source: Box::new(source) }
	}

	pub fn category(&self) -> ErrorCategory {
		match self {
			Self::Cancelled(_) => ErrorCategory::Cancelled,
			Self::BadRequest(_) => ErrorCategory::BadRequest,
			Self::Conflict { .. } => ErrorCategory::Conflict,
			Self::InternalServerError { .. } => ErrorCategory::InternalServerError,
			Self::Argument(_) => ErrorCategory::InvalidArgument,
		}
	}

	/// The wrapped root cause, if this error wraps one.
	pub fn inner(&self) -> Option<&HandlerError> {
		match self {
			Self::Conflict { source } | Self::InternalServerError { source } => Some(source),
			Self::BadRequest(err) => err.inner(),
			Self::Cancelled(_) | Self::Argument(_) => None,
		}
	}

	pub fn cancellation_token(&self) -> Option<&CancellationToken> {
		match self {
			Self::Cancelled(err) => Some(err.token()),
			_ => None,
		}
	}
}
