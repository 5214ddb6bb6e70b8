//! ### Handler registry
//! Handlers are registered once, on [`MicroProcessorBuilder`](super::messagebus::MicroProcessorBuilder),
//! and resolved per message by exact type:
//!
//! 1. every handler registered for the message's concrete type, in registration order,
//! 2. then every catch-all handler (a handler of `dyn Message`), in registration order,
//!
//! keeping only those whose [`HandlerConfiguration`] accepts the message's direction.
//!
//! ### Example
//! ```ignore
//! struct SendWelcomeMail;
//!
//! #[async_trait]
//! impl MessageHandler<CustomerRegistered> for SendWelcomeMail {
//!     async fn handle(&self, event: &CustomerRegistered, context: &mut ProcessorContext) -> Result<(), HandlerError> {
//!         context.publish(WelcomeMailSent { customer_id: event.customer_id })?;
//!         Ok(())
//!     }
//! }
//! ```

use super::contexts::ProcessorContext;
use crate::{
	message::{Message, MessageDirection, MessageEnvelope},
	responses::{BaseError, HandlerError},
	utils::short_type_name,
};
use async_trait::async_trait;
use std::{any::TypeId, marker::PhantomData, sync::Arc};

#[async_trait]
pub trait MessageHandler<M: ?Sized + Sync>: Send + Sync {
	fn name(&self) -> &'static str {
		short_type_name(std::any::type_name::<Self>())
	}

	async fn handle(&self, message: &M, context: &mut ProcessorContext) -> Result<(), HandlerError>;
}

/// Handler backed by a synchronous closure. See [`handler_fn`].
pub struct HandlerFn<M: ?Sized, F> {
	name: &'static str,
	f: F,
	_message: PhantomData<fn(&M)>,
}

/// Turns a closure into a [`MessageHandler`].
/// ## Example
/// ```ignore
/// let handler = handler_fn(|command: &PlaceOrder, context: &mut ProcessorContext| {
///     context.publish(OrderPlaced { order_id: command.order_id })?;
///     Ok(())
/// });
/// ```
pub fn handler_fn<M, F>(f: F) -> HandlerFn<M, F>
where
	M: ?Sized + Sync,
	F: Fn(&M, &mut ProcessorContext) -> Result<(), HandlerError> + Send + Sync,
{
	HandlerFn {
		name: "HandlerFn",
		f,
		_message: PhantomData,
	}
}

impl<M: ?Sized, F> HandlerFn<M, F> {
	pub fn with_name(mut self, name: &'static str) -> Self {
		self.name = name;
		self
	}
}

#[async_trait]
impl<M, F> MessageHandler<M> for HandlerFn<M, F>
where
	M: ?Sized + Sync,
	F: Fn(&M, &mut ProcessorContext) -> Result<(), HandlerError> + Send + Sync,
{
	fn name(&self) -> &'static str {
		self.name
	}

	async fn handle(&self, message: &M, context: &mut ProcessorContext) -> Result<(), HandlerError> {
		(self.f)(message, context)
	}
}

/// Query that needs no input message.
#[async_trait]
pub trait Query<R>: Send + Sync {
	fn name(&self) -> &'static str {
		short_type_name(std::any::type_name::<Self>())
	}

	async fn execute(&self, context: &mut ProcessorContext) -> Result<R, HandlerError>;
}

#[async_trait]
pub trait QueryWithRequest<Req: Sync, R>: Send + Sync {
	fn name(&self) -> &'static str {
		short_type_name(std::any::type_name::<Self>())
	}

	async fn execute(&self, request: &Req, context: &mut ProcessorContext) -> Result<R, HandlerError>;
}

/// Which message directions a registered handler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerConfiguration {
	pub handles_external_messages: bool,
	pub handles_internal_messages: bool,
}

impl HandlerConfiguration {
	pub const ALL: Self = Self {
		handles_external_messages: true,
		handles_internal_messages: true,
	};
	pub const EXTERNAL_ONLY: Self = Self {
		handles_external_messages: true,
		handles_internal_messages: false,
	};
	pub const INTERNAL_ONLY: Self = Self {
		handles_external_messages: false,
		handles_internal_messages: true,
	};

	pub fn accepts(&self, direction: MessageDirection) -> bool {
		match direction {
			MessageDirection::Input => self.handles_external_messages,
			MessageDirection::Internal => self.handles_internal_messages,
		}
	}
}

impl Default for HandlerConfiguration {
	fn default() -> Self {
		Self::ALL
	}
}

/// Handler with its message type erased.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
	fn name(&self) -> &'static str;

	async fn invoke(&self, message: &MessageEnvelope, context: &mut ProcessorContext) -> Result<(), HandlerError>;
}

struct TypedHandler<M, H: ?Sized> {
	handler: Arc<H>,
	_message: PhantomData<fn(&M)>,
}

#[async_trait]
impl<M, H> ErasedHandler for TypedHandler<M, H>
where
	M: Message,
	H: MessageHandler<M> + ?Sized,
{
	fn name(&self) -> &'static str {
		self.handler.name()
	}

	async fn invoke(&self, message: &MessageEnvelope, context: &mut ProcessorContext) -> Result<(), HandlerError> {
		let typed = message.downcast_ref::<M>().ok_or(BaseError::MessageTypeMismatch {
			expected: std::any::type_name::<M>(),
			actual: message.message_type(),
		})?;
		self.handler.handle(typed, context).await
	}
}

struct CatchAllHandler<H: ?Sized> {
	handler: Arc<H>,
}

#[async_trait]
impl<H> ErasedHandler for CatchAllHandler<H>
where
	H: MessageHandler<dyn Message> + ?Sized,
{
	fn name(&self) -> &'static str {
		self.handler.name()
	}

	async fn invoke(&self, message: &MessageEnvelope, context: &mut ProcessorContext) -> Result<(), HandlerError> {
		self.handler.handle(message.instance().as_ref(), context).await
	}
}

#[derive(Clone)]
pub struct MessageHandlerDescriptor {
	message_type: Option<TypeId>,
	configuration: HandlerConfiguration,
	handler: Arc<dyn ErasedHandler>,
}

impl MessageHandlerDescriptor {
	pub fn typed<M, H>(handler: Arc<H>, configuration: HandlerConfiguration) -> Self
	where
		M: Message,
		H: MessageHandler<M> + ?Sized + 'static,
	{
		Self {
			message_type: Some(TypeId::of::<M>()),
			configuration,
			handler: Arc::new(TypedHandler::<M, H> { handler, _message: PhantomData }),
		}
	}

	pub fn catch_all<H>(handler: Arc<H>, configuration: HandlerConfiguration) -> Self
	where
		H: MessageHandler<dyn Message> + ?Sized + 'static,
	{
		Self {
			message_type: None,
			configuration,
			handler: Arc::new(CatchAllHandler { handler }),
		}
	}

	pub fn name(&self) -> &'static str {
		self.handler.name()
	}

	/// `None` for catch-all handlers.
	pub fn message_type(&self) -> Option<TypeId> {
		self.message_type
	}

	pub fn configuration(&self) -> HandlerConfiguration {
		self.configuration
	}

	pub(crate) fn handler(&self) -> &dyn ErasedHandler {
		self.handler.as_ref()
	}
}

impl std::fmt::Debug for MessageHandlerDescriptor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MessageHandlerDescriptor")
			.field("name", &self.name())
			.field("catch_all", &self.message_type.is_none())
			.field("configuration", &self.configuration)
			.finish()
	}
}

#[derive(Default, Clone, Debug)]
pub struct HandlerRegistry {
	by_message_type: hashbrown::HashMap<TypeId, Vec<MessageHandlerDescriptor>>,
	catch_all: Vec<MessageHandlerDescriptor>,
}

impl HandlerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, descriptor: MessageHandlerDescriptor) {
		match descriptor.message_type {
			Some(message_type) => self.by_message_type.entry(message_type).or_default().push(descriptor),
			None => self.catch_all.push(descriptor),
		}
	}

	/// Handlers applicable to `message`, exact type matches first.
	pub fn resolve(&self, message: &MessageEnvelope) -> Vec<MessageHandlerDescriptor> {
		let direction = message.direction();
		self.by_message_type
			.get(&message.type_id())
			.into_iter()
			.flatten()
			.chain(self.catch_all.iter())
			.filter(|descriptor| descriptor.configuration.accepts(direction))
			.cloned()
			.collect()
	}

	pub fn len(&self) -> usize {
		self.by_message_type.values().map(Vec::len).sum::<usize>() + self.catch_all.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
