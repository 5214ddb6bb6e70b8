//! # MicroProcessor
//! Dispatches commands and events to their handlers and replays every event those handlers
//! publish, breadth first, until nothing is left. All handler invocations of one dispatch share a
//! single [`UnitOfWork`], committed once the queue has drained.
//!
//! ### example
//! ```ignore
//! let processor = MicroProcessorBuilder::new()
//!     .with_unit_of_work_mode(UnitOfWorkMode::MultiThreaded)
//!     .add_handler::<PlaceOrder, _>(PlaceOrderHandler::new(orders.clone()))
//!     .add_handler::<OrderPlaced, _>(ReserveStock::new(stock.clone()))
//!     .add_filter(LoggingFilter)
//!     .build();
//!
//! let result = processor.execute_command(PlaceOrder { order_id }, None).await?;
//! assert_eq!(result.handled_message_count(), 2);
//! ```

use super::{
	contexts::ProcessorContext,
	event_bus::{EventBuffer, MessageStream},
	handler::{HandlerConfiguration, HandlerRegistry, MessageHandler, MessageHandlerDescriptor, Query, QueryWithRequest},
	operation::{Operation, StackTrace},
	pipeline::{Invocation, MessageInvocation, MicroProcessorFilter, Pipeline, QueryInvocation, RequestQueryInvocation},
	translator::{ExceptionTranslator, FailureOrigin},
};
use crate::{
	cancellation::CancellationToken,
	message::{Message, MessageDirection, MessageEnvelope, MessageKind},
	responses::{BaseError, ErrorCategory, HandlerError, MicroProcessorError},
	settings::{ProcessorSettings, UnitOfWorkMode},
	unit_of_work::UnitOfWork,
};
use async_trait::async_trait;
use std::{collections::VecDeque, sync::Arc};

/// Hands the events of a successful dispatch over to the outside world.
#[async_trait]
pub trait MicroServiceBus: Send + Sync {
	async fn publish(&self, events: &[MessageEnvelope]) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone)]
pub struct MessageHandlerOperationResult {
	handled_message_count: usize,
	events: MessageStream,
}

impl MessageHandlerOperationResult {
	/// Handler invocations across the whole operation tree.
	pub fn handled_message_count(&self) -> usize {
		self.handled_message_count
	}

	/// Every published event, in the order it was published.
	pub fn events(&self) -> &MessageStream {
		&self.events
	}

	pub fn into_events(self) -> MessageStream {
		self.events
	}
}

#[derive(Debug, Clone)]
pub struct QueryOperationResult<R> {
	response: R,
	handled_message_count: usize,
}

impl<R> QueryOperationResult<R> {
	pub fn response(&self) -> &R {
		&self.response
	}

	pub fn into_response(self) -> R {
		self.response
	}

	pub fn handled_message_count(&self) -> usize {
		self.handled_message_count
	}
}

#[derive(Default)]
pub struct MicroProcessorBuilder {
	settings: ProcessorSettings,
	registry: HandlerRegistry,
	filters: Vec<Arc<dyn MicroProcessorFilter>>,
	bus: Option<Arc<dyn MicroServiceBus>>,
}

impl MicroProcessorBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_settings(mut self, settings: ProcessorSettings) -> Self {
		self.settings = settings;
		self
	}

	pub fn with_unit_of_work_mode(mut self, mode: impl Into<UnitOfWorkMode>) -> Self {
		self.settings.unit_of_work_mode = mode.into();
		self
	}

	pub fn with_max_operation_depth(mut self, depth: usize) -> Self {
		self.settings.max_operation_depth = depth;
		self
	}

	pub fn add_handler<M, H>(self, handler: H) -> Self
	where
		M: Message,
		H: MessageHandler<M> + 'static,
	{
		self.add_handler_with::<M, H>(handler, HandlerConfiguration::ALL)
	}

	pub fn add_handler_with<M, H>(mut self, handler: H, configuration: HandlerConfiguration) -> Self
	where
		M: Message,
		H: MessageHandler<M> + 'static,
	{
		self.registry.register(MessageHandlerDescriptor::typed::<M, H>(Arc::new(handler), configuration));
		self
	}

	/// Registers a handler invoked for every message, whatever its type.
	pub fn add_catch_all_handler<H>(self, handler: H) -> Self
	where
		H: MessageHandler<dyn Message> + 'static,
	{
		self.add_catch_all_handler_with(handler, HandlerConfiguration::ALL)
	}

	pub fn add_catch_all_handler_with<H>(mut self, handler: H, configuration: HandlerConfiguration) -> Self
	where
		H: MessageHandler<dyn Message> + 'static,
	{
		self.registry.register(MessageHandlerDescriptor::catch_all(Arc::new(handler), configuration));
		self
	}

	/// Filters wrap handlers and queries in the order they are added, first added outermost.
	pub fn add_filter<F: MicroProcessorFilter + 'static>(mut self, filter: F) -> Self {
		self.filters.push(Arc::new(filter));
		self
	}

	pub fn with_bus(mut self, bus: Arc<dyn MicroServiceBus>) -> Self {
		self.bus = Some(bus);
		self
	}

	pub fn build(self) -> MicroProcessor {
		MicroProcessor {
			settings: self.settings,
			registry: self.registry,
			filters: self.filters,
			bus: self.bus,
		}
	}
}

/// Operation waiting in the replay queue.
struct PendingOperation {
	parent: StackTrace,
	operation: Operation,
	message: MessageEnvelope,
	descriptor: MessageHandlerDescriptor,
}

type Failure = (HandlerError, FailureOrigin);

pub struct MicroProcessor {
	settings: ProcessorSettings,
	registry: HandlerRegistry,
	filters: Vec<Arc<dyn MicroProcessorFilter>>,
	bus: Option<Arc<dyn MicroServiceBus>>,
}

impl MicroProcessor {
	pub fn builder() -> MicroProcessorBuilder {
		MicroProcessorBuilder::new()
	}

	pub fn settings(&self) -> &ProcessorSettings {
		&self.settings
	}

	pub async fn execute_command<M: Message>(&self, command: M, token: Option<CancellationToken>) -> Result<MessageHandlerOperationResult, MicroProcessorError> {
		self.dispatch(MessageKind::Command, command, None, token).await
	}

	/// Runs `handler` on the command before any registered handler.
	pub async fn execute_command_with<M: Message>(&self, command: M, handler: Arc<dyn MessageHandler<M>>, token: Option<CancellationToken>) -> Result<MessageHandlerOperationResult, MicroProcessorError> {
		self.dispatch(MessageKind::Command, command, Some(handler), token).await
	}

	pub async fn handle_event<M: Message>(&self, event: M, token: Option<CancellationToken>) -> Result<MessageHandlerOperationResult, MicroProcessorError> {
		self.dispatch(MessageKind::Event, event, None, token).await
	}

	pub async fn handle_event_with<M: Message>(&self, event: M, handler: Arc<dyn MessageHandler<M>>, token: Option<CancellationToken>) -> Result<MessageHandlerOperationResult, MicroProcessorError> {
		self.dispatch(MessageKind::Event, event, Some(handler), token).await
	}

	/// Dispatches a command or event and everything its handlers publish, then commits.
	///
	/// Without a `token` the dispatch runs with a fresh one; cancelling that one is an internal failure.
	pub async fn dispatch<M: Message>(
		&self,
		kind: MessageKind,
		message: M,
		explicit_handler: Option<Arc<dyn MessageHandler<M>>>,
		token: Option<CancellationToken>,
	) -> Result<MessageHandlerOperationResult, MicroProcessorError> {
		if !matches!(kind, MessageKind::Command | MessageKind::Event) {
			return Err(MicroProcessorError::Argument(format!("cannot dispatch a {} message, only commands and events are dispatched", kind)));
		}

		let caller_token = token;
		let token = caller_token.clone().unwrap_or_default();
		let translator = ExceptionTranslator::new(kind, caller_token.as_ref());
		let envelope = MessageEnvelope::new(kind, MessageDirection::Input, Arc::new(message));
		tracing::info!(kind = %kind, message = envelope.message_type(), "dispatching");

		let mut handlers: Vec<MessageHandlerDescriptor> = explicit_handler
			.map(|handler| MessageHandlerDescriptor::typed::<M, dyn MessageHandler<M>>(handler, HandlerConfiguration::ALL))
			.into_iter()
			.collect();
		handlers.extend(self.registry.resolve(&envelope));

		let unit_of_work = Arc::new(UnitOfWork::new(self.settings.unit_of_work_mode.clone(), token.clone()));

		let result = self.replay(envelope, handlers, &unit_of_work, &token).await.map_err(|(err, origin)| self.fail(&translator, err, origin))?;

		unit_of_work.commit().await.map_err(|err| self.fail(&translator, err, FailureOrigin::Root))?;

		if let Some(bus) = &self.bus {
			if !result.events.is_empty() {
				bus.publish(&result.events).await.map_err(|err| self.fail(&translator, err, FailureOrigin::Root))?;
			}
		}

		tracing::debug!(handled = result.handled_message_count, events = result.events.len(), "dispatch completed");
		Ok(result)
	}

	/// Breadth-first replay of the root message and every event published along the way.
	async fn replay(&self, root: MessageEnvelope, handlers: Vec<MessageHandlerDescriptor>, unit_of_work: &Arc<UnitOfWork>, token: &CancellationToken) -> Result<MessageHandlerOperationResult, Failure> {
		let mut queue: VecDeque<PendingOperation> = handlers
			.into_iter()
			.map(|descriptor| PendingOperation {
				parent: StackTrace::empty(),
				operation: Operation::root(root.kind(), Some(root.clone()), descriptor.name()),
				message: root.clone(),
				descriptor,
			})
			.collect();

		let mut handled_message_count = 0;
		let mut events: Vec<MessageEnvelope> = Vec::new();

		while let Some(pending) = queue.pop_front() {
			let origin = match pending.operation.is_root() {
				true => FailureOrigin::Root,
				false => FailureOrigin::Branch,
			};
			token.check().map_err(|err| (HandlerError::from(err), origin))?;
			if pending.operation.depth() > self.settings.max_operation_depth {
				return Err((BaseError::MaxDepthExceeded(self.settings.max_operation_depth).into(), origin));
			}

			let stack_trace = pending.parent.push(pending.operation);
			let published = self.invoke(&stack_trace, &pending.message, &pending.descriptor, unit_of_work, token).await.map_err(|err| (err, origin))?;
			handled_message_count += 1;

			if let Some(publisher) = stack_trace.current_operation() {
				for event in published.iter() {
					for descriptor in self.registry.resolve(event) {
						queue.push_back(PendingOperation {
							parent: stack_trace.clone(),
							operation: publisher.branch(event.clone(), descriptor.name()),
							message: event.clone(),
							descriptor,
						});
					}
				}
			}
			events.extend(published.iter().cloned());
		}

		// A handler may have cancelled the caller's token after the last dequeue.
		token.check().map_err(|err| (HandlerError::from(err), FailureOrigin::Root))?;

		Ok(MessageHandlerOperationResult {
			handled_message_count,
			events: MessageStream::from(events),
		})
	}

	async fn invoke(
		&self,
		stack_trace: &StackTrace,
		message: &MessageEnvelope,
		descriptor: &MessageHandlerDescriptor,
		unit_of_work: &Arc<UnitOfWork>,
		token: &CancellationToken,
	) -> Result<EventBuffer, HandlerError> {
		let mut context = ProcessorContext::for_message(stack_trace.clone(), unit_of_work.clone(), token.clone());
		let invocation = MessageInvocation {
			handler: descriptor.handler(),
			message,
		};
		let pipeline = Pipeline::new(&self.filters, &invocation);

		if let Some(operation) = stack_trace.current_operation() {
			tracing::debug!(depth = operation.depth(), pipeline = %pipeline, "{}", operation);
		}
		pipeline.run(&mut context).await?;
		Ok(context.into_events())
	}

	pub async fn execute_query<Q, R>(&self, query: &Q, token: Option<CancellationToken>) -> Result<QueryOperationResult<R>, MicroProcessorError>
	where
		Q: Query<R> + ?Sized,
		R: Send + 'static,
	{
		tracing::info!(query = query.name(), "executing query");

		let stack_trace = StackTrace::empty().push(Operation::root(MessageKind::Request, None, query.name()));
		let invocation = QueryInvocation::<Q, R>::new(query);
		self.run_query(stack_trace, &invocation, token).await
	}

	pub async fn execute_query_with_request<Req, Q, R>(&self, request: Req, query: &Q, token: Option<CancellationToken>) -> Result<QueryOperationResult<R>, MicroProcessorError>
	where
		Req: Message,
		Q: QueryWithRequest<Req, R> + ?Sized,
		R: Send + 'static,
	{
		let request = Arc::new(request);
		let envelope = MessageEnvelope::new(MessageKind::Request, MessageDirection::Input, request.clone());
		tracing::info!(query = query.name(), request = envelope.message_type(), "executing query");

		let stack_trace = StackTrace::empty().push(Operation::root(MessageKind::Request, Some(envelope), query.name()));
		let invocation = RequestQueryInvocation::<Req, Q, R>::new(request.as_ref(), query);
		self.run_query(stack_trace, &invocation, token).await
	}

	async fn run_query<R: Send + 'static>(&self, stack_trace: StackTrace, invocation: &dyn Invocation, caller_token: Option<CancellationToken>) -> Result<QueryOperationResult<R>, MicroProcessorError> {
		let translator = ExceptionTranslator::new(MessageKind::Request, caller_token.as_ref());
		let token = caller_token.clone().unwrap_or_default();
		let outcome = async move {
			token.check()?;
			let mut context = ProcessorContext::for_query(stack_trace, token);
			let output = Pipeline::new(&self.filters, invocation).run(&mut context).await?;
			Ok::<_, HandlerError>(output.into_response::<R>()?)
		};

		match outcome.await {
			Ok(response) => Ok(QueryOperationResult {
				response,
				handled_message_count: 1,
			}),
			Err(err) => Err(self.fail(&translator, err, FailureOrigin::Root)),
		}
	}

	fn fail(&self, translator: &ExceptionTranslator<'_>, err: HandlerError, origin: FailureOrigin) -> MicroProcessorError {
		let error = translator.translate(err, origin);
		match error.category() {
			ErrorCategory::Cancelled => tracing::warn!(origin = ?origin, "operation cancelled by caller"),
			category => crate::trace_error!("{:?} at {:?} operation: {}", category, origin, error),
		}
		error
	}
}

#[cfg(test)]
mod test_messagebus {
	use super::*;
	use crate::{bus_components::handler::handler_fn, responses::BusinessRuleError};
	use std::sync::Mutex;

	#[derive(Debug)]
	struct Start(u32);
	#[derive(Debug)]
	struct Step(u32);

	crate::impl_message!(Start, Step);

	fn start_handler() -> impl MessageHandler<Start> {
		handler_fn(|command: &Start, context: &mut ProcessorContext| {
			context.publish(Step(command.0))?;
			Ok(())
		})
		.with_name("StartHandler")
	}

	#[tokio::test]
	async fn test_events_are_replayed_one_level_deeper() {
		let depths = Arc::new(Mutex::new(Vec::new()));
		let seen = depths.clone();
		let processor = MicroProcessor::builder()
			.add_handler::<Start, _>(start_handler())
			.add_handler::<Step, _>(handler_fn(move |_: &Step, context: &mut ProcessorContext| {
				seen.lock().unwrap().push(context.stack_trace().count());
				Ok(())
			}))
			.build();

		let result = processor.execute_command(Start(1), None).await.unwrap();

		assert_eq!(result.handled_message_count(), 2);
		assert_eq!(result.events().len(), 1);
		assert_eq!(*depths.lock().unwrap(), vec![2]);
	}

	#[tokio::test]
	async fn test_requests_cannot_be_dispatched() {
		let processor = MicroProcessor::builder().build();
		let err = processor.dispatch(MessageKind::Request, Start(1), None, None).await.unwrap_err();
		assert_eq!(err.category(), ErrorCategory::InvalidArgument);
	}

	#[tokio::test]
	async fn test_event_cycles_stop_at_max_depth() {
		let processor = MicroProcessor::builder()
			.with_max_operation_depth(5)
			.add_handler::<Step, _>(handler_fn(|step: &Step, context: &mut ProcessorContext| {
				context.publish(Step(step.0 + 1))?;
				Ok(())
			}))
			.build();

		let err = processor.handle_event(Step(0), None).await.unwrap_err();
		assert_eq!(err.category(), ErrorCategory::InternalServerError);
		assert!(matches!(err.inner(), Some(HandlerError::Base(BaseError::MaxDepthExceeded(5)))));
	}

	#[tokio::test]
	async fn test_explicit_handler_runs_first() {
		let order = Arc::new(Mutex::new(Vec::new()));
		let (registered, explicit) = (order.clone(), order.clone());
		let processor = MicroProcessor::builder()
			.add_handler::<Start, _>(handler_fn(move |_: &Start, _: &mut ProcessorContext| {
				registered.lock().unwrap().push("registered");
				Ok(())
			}))
			.build();

		let handler: Arc<dyn MessageHandler<Start>> = Arc::new(handler_fn(move |_: &Start, _: &mut ProcessorContext| {
			explicit.lock().unwrap().push("explicit");
			Ok(())
		}));
		let result = processor.execute_command_with(Start(1), handler, None).await.unwrap();

		assert_eq!(result.handled_message_count(), 2);
		assert_eq!(*order.lock().unwrap(), vec!["explicit", "registered"]);
	}

	#[tokio::test]
	async fn test_failure_aborts_remaining_operations() {
		let calls = Arc::new(Mutex::new(0));
		let counted = calls.clone();
		let processor = MicroProcessor::builder()
			.add_handler::<Start, _>(handler_fn(|_: &Start, _: &mut ProcessorContext| Err(BusinessRuleError::new("rejected").into())))
			.add_handler::<Start, _>(handler_fn(move |_: &Start, _: &mut ProcessorContext| {
				*counted.lock().unwrap() += 1;
				Ok(())
			}))
			.build();

		let err = processor.execute_command(Start(1), None).await.unwrap_err();
		assert_eq!(err.category(), ErrorCategory::BadRequest);
		assert_eq!(*calls.lock().unwrap(), 0);
	}

	struct Answer;

	#[async_trait]
	impl Query<u32> for Answer {
		async fn execute(&self, context: &mut ProcessorContext) -> Result<u32, HandlerError> {
			assert!(context.operation().unwrap().message().is_none());
			Ok(42)
		}
	}

	#[tokio::test]
	async fn test_query_returns_its_response() {
		let processor = MicroProcessor::builder().build();
		let result = processor.execute_query(&Answer, None).await.unwrap();

		assert_eq!(*result.response(), 42);
		assert_eq!(result.handled_message_count(), 1);
	}
}
