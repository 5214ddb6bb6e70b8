use super::{
	event_bus::{EventBuffer, EventBus},
	operation::{Operation, StackTrace},
};
use crate::{cancellation::CancellationToken, message::Message, responses::BaseError, unit_of_work::UnitOfWork};
use std::{
	any::{Any, TypeId},
	sync::Arc,
};

/// Invocation context
/// it lives as long as one handler or query invocation, filters included.
///
/// Everything a handler may observe about the ongoing dispatch is reached from here; there is no
/// ambient state.
pub struct ProcessorContext {
	stack_trace: StackTrace,
	event_bus: Option<EventBus>,
	unit_of_work: Option<Arc<UnitOfWork>>,
	token: CancellationToken,
	items: hashbrown::HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ProcessorContext {
	pub(crate) fn for_message(stack_trace: StackTrace, unit_of_work: Arc<UnitOfWork>, token: CancellationToken) -> Self {
		let publisher = stack_trace.current_operation().and_then(Operation::message).cloned();
		Self {
			stack_trace,
			event_bus: Some(EventBus::new(publisher)),
			unit_of_work: Some(unit_of_work),
			token,
			items: Default::default(),
		}
	}

	/// Queries can neither publish nor enlist resource managers.
	pub(crate) fn for_query(stack_trace: StackTrace, token: CancellationToken) -> Self {
		Self {
			stack_trace,
			event_bus: None,
			unit_of_work: None,
			token,
			items: Default::default(),
		}
	}

	pub fn stack_trace(&self) -> &StackTrace {
		&self.stack_trace
	}

	pub fn operation(&self) -> Option<&Operation> {
		self.stack_trace.current_operation()
	}

	pub fn cancellation_token(&self) -> &CancellationToken {
		&self.token
	}

	pub fn event_bus(&self) -> Result<&EventBus, BaseError> {
		self.event_bus.as_ref().ok_or(BaseError::ReadOnlyContext("event bus"))
	}

	pub fn publish<M: Message>(&mut self, message: M) -> Result<(), BaseError> {
		self.event_bus.as_mut().ok_or(BaseError::ReadOnlyContext("event bus"))?.publish(message);
		Ok(())
	}

	pub fn unit_of_work(&self) -> Result<&UnitOfWork, BaseError> {
		self.unit_of_work.as_deref().ok_or(BaseError::ReadOnlyContext("unit of work"))
	}

	/// Stores a value for inner filters and the handler of this invocation, replacing any previous value of that type.
	pub fn insert_item<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
		self.items
			.insert(TypeId::of::<T>(), Box::new(value))
			.and_then(|previous| previous.downcast::<T>().ok())
			.map(|previous| *previous)
	}

	pub fn item<T: Send + Sync + 'static>(&self) -> Option<&T> {
		self.items.get(&TypeId::of::<T>()).and_then(|item| item.downcast_ref::<T>())
	}

	pub(crate) fn into_events(self) -> EventBuffer {
		self.event_bus.map(EventBus::into_buffer).unwrap_or_default()
	}
}
