//! ### Filter pipeline
//! Filters wrap every handler and query invocation, outermost first.
//!
//! ```text
//! Filter 1 ──► Filter 2 ──► ... ──► handler / query
//!    ◄──────────  ◄──────────       ◄──
//! ```
//!
//! Each filter gets the rest of the pipeline as a [`Continuation`] and decides whether to run it,
//! what to do before and after, or whether to run it more than once.

use super::{
	contexts::ProcessorContext,
	handler::{ErasedHandler, Query, QueryWithRequest},
};
use crate::{
	message::MessageEnvelope,
	responses::{BaseError, HandlerError},
	utils::short_type_name,
};
use async_trait::async_trait;
use std::{any::Any, fmt, marker::PhantomData, sync::Arc};

/// What an invocation produced: nothing for message handlers, the response for queries.
pub enum InvocationOutput {
	Handled,
	Response(Box<dyn Any + Send>),
}

impl InvocationOutput {
	pub fn response<R: Send + 'static>(response: R) -> Self {
		Self::Response(Box::new(response))
	}

	pub fn response_ref<R: 'static>(&self) -> Option<&R> {
		match self {
			Self::Response(response) => response.downcast_ref::<R>(),
			Self::Handled => None,
		}
	}

	pub(crate) fn into_response<R: 'static>(self) -> Result<R, BaseError> {
		match self {
			Self::Response(response) => response.downcast::<R>().map(|r| *r).map_err(|_| BaseError::MissingResponse(std::any::type_name::<R>())),
			Self::Handled => Err(BaseError::MissingResponse(std::any::type_name::<R>())),
		}
	}
}

impl fmt::Debug for InvocationOutput {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Handled => write!(f, "Handled"),
			Self::Response(_) => write!(f, "Response(..)"),
		}
	}
}

#[async_trait]
pub trait MicroProcessorFilter: Send + Sync {
	fn name(&self) -> &'static str {
		short_type_name(std::any::type_name::<Self>())
	}

	async fn invoke(&self, next: Continuation<'_>, context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError> {
		next.run(context).await
	}
}

/// Innermost step of a pipeline.
#[async_trait]
pub(crate) trait Invocation: Send + Sync {
	fn name(&self) -> &'static str;

	async fn invoke(&self, context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError>;
}

/// The part of the pipeline inside the current filter.
#[derive(Clone, Copy)]
pub struct Continuation<'a> {
	filters: &'a [Arc<dyn MicroProcessorFilter>],
	invocation: &'a dyn Invocation,
}

impl<'a> Continuation<'a> {
	pub async fn run(self, context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError> {
		match self.filters.split_first() {
			Some((filter, inner)) => {
				let next = Continuation {
					filters: inner,
					invocation: self.invocation,
				};
				filter.invoke(next, context).await
			}
			None => self.invocation.invoke(context).await,
		}
	}

	/// Name of the handler or query at the end of the pipeline.
	pub fn target(&self) -> &'static str {
		self.invocation.name()
	}
}

impl fmt::Display for Continuation<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for filter in self.filters {
			write!(f, "{} -> ", filter.name())?;
		}
		write!(f, "{}", self.invocation.name())
	}
}

/// All filters around one invocation.
pub struct Pipeline<'a>(Continuation<'a>);

impl<'a> Pipeline<'a> {
	pub(crate) fn new(filters: &'a [Arc<dyn MicroProcessorFilter>], invocation: &'a dyn Invocation) -> Self {
		Self(Continuation { filters, invocation })
	}

	pub async fn run(&self, context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError> {
		self.0.run(context).await
	}
}

impl fmt::Display for Pipeline<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

pub(crate) struct MessageInvocation<'a> {
	pub(crate) handler: &'a dyn ErasedHandler,
	pub(crate) message: &'a MessageEnvelope,
}

#[async_trait]
impl Invocation for MessageInvocation<'_> {
	fn name(&self) -> &'static str {
		self.handler.name()
	}

	async fn invoke(&self, context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError> {
		self.handler.invoke(self.message, context).await?;
		Ok(InvocationOutput::Handled)
	}
}

pub(crate) struct QueryInvocation<'a, Q: ?Sized, R> {
	query: &'a Q,
	_response: PhantomData<fn() -> R>,
}

impl<'a, Q: ?Sized, R> QueryInvocation<'a, Q, R> {
	pub(crate) fn new(query: &'a Q) -> Self {
		Self { query, _response: PhantomData }
	}
}

#[async_trait]
impl<Q, R> Invocation for QueryInvocation<'_, Q, R>
where
	Q: Query<R> + ?Sized,
	R: Send + 'static,
{
	fn name(&self) -> &'static str {
		self.query.name()
	}

	async fn invoke(&self, context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError> {
		Ok(InvocationOutput::response(self.query.execute(context).await?))
	}
}

pub(crate) struct RequestQueryInvocation<'a, Req, Q: ?Sized, R> {
	request: &'a Req,
	query: &'a Q,
	_response: PhantomData<fn() -> R>,
}

impl<'a, Req, Q: ?Sized, R> RequestQueryInvocation<'a, Req, Q, R> {
	pub(crate) fn new(request: &'a Req, query: &'a Q) -> Self {
		Self {
			request,
			query,
			_response: PhantomData,
		}
	}
}

#[async_trait]
impl<Req, Q, R> Invocation for RequestQueryInvocation<'_, Req, Q, R>
where
	Req: Sync,
	Q: QueryWithRequest<Req, R> + ?Sized,
	R: Send + 'static,
{
	fn name(&self) -> &'static str {
		self.query.name()
	}

	async fn invoke(&self, context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError> {
		Ok(InvocationOutput::response(self.query.execute(self.request, context).await?))
	}
}
