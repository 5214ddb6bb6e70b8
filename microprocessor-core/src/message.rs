use downcast_rs::{impl_downcast, DowncastSync};
use std::{fmt::Debug, sync::Arc};
use uuid::Uuid;

/// Anything that travels through the processor.
///
/// Commands, events, requests and responses are plain Rust types marked with this trait, usually
/// through [`impl_message!`](crate::impl_message). The processor only sees them as `dyn Message` and
/// handlers get them back through downcasting.
pub trait Message: DowncastSync + Debug {
	fn message_type(&self) -> &'static str {
		std::any::type_name::<Self>()
	}
}

/// Marks one or more types as [`Message`]s.
/// ## Example
/// ```rust,no_run
/// #[derive(Debug)]
/// struct PlaceOrder { order_id: u64 }
/// #[derive(Debug)]
/// struct OrderPlaced { order_id: u64 }
///
/// microprocessor_core::impl_message!(PlaceOrder, OrderPlaced);
/// ```
#[macro_export]
macro_rules! impl_message {
	($($message:ty),+ $(,)?) => {
		$(
			impl $crate::prelude::Message for $message {}
		)+
	};
}

impl_downcast!(sync Message);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
	Command,
	Event,
	Request,
	Response,
}

impl std::fmt::Display for MessageKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Command => write!(f, "Command"),
			Self::Event => write!(f, "Event"),
			Self::Request => write!(f, "Request"),
			Self::Response => write!(f, "Response"),
		}
	}
}

/// Where a message came from.
/// `Input` messages are handed to the processor by its caller; `Internal` ones were published by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageDirection {
	Input,
	Internal,
}

/// A message instance together with the metadata the processor assigned to it.
/// The kind is fixed when the envelope is created.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
	id: Uuid,
	correlation_id: Option<Uuid>,
	kind: MessageKind,
	direction: MessageDirection,
	instance: Arc<dyn Message>,
}

impl MessageEnvelope {
	pub fn new(kind: MessageKind, direction: MessageDirection, instance: Arc<dyn Message>) -> Self {
		Self {
			id: Uuid::new_v4(),
			correlation_id: None,
			kind,
			direction,
			instance,
		}
	}

	pub fn input(kind: MessageKind, message: impl Message) -> Self {
		Self::new(kind, MessageDirection::Input, Arc::new(message))
	}

	/// Event published while handling `parent`.
	pub(crate) fn published_by(parent: Option<&MessageEnvelope>, instance: Arc<dyn Message>) -> Self {
		Self {
			correlation_id: parent.map(|p| p.id),
			..Self::new(MessageKind::Event, MessageDirection::Internal, instance)
		}
	}

	pub fn id(&self) -> Uuid {
		self.id
	}
	pub fn correlation_id(&self) -> Option<Uuid> {
		self.correlation_id
	}
	pub fn kind(&self) -> MessageKind {
		self.kind
	}
	pub fn direction(&self) -> MessageDirection {
		self.direction
	}
	pub fn instance(&self) -> &Arc<dyn Message> {
		&self.instance
	}
	pub fn message_type(&self) -> &'static str {
		self.instance.as_ref().message_type()
	}

	pub fn type_id(&self) -> std::any::TypeId {
		self.instance.as_ref().as_any().type_id()
	}

	pub fn is<T: Message>(&self) -> bool {
		self.instance.is::<T>()
	}

	pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
		self.instance.downcast_ref::<T>()
	}

	/// Envelopes are the same message when they share the same instance.
	pub fn ptr_eq(&self, other: &MessageEnvelope) -> bool {
		Arc::ptr_eq(&self.instance, &other.instance)
	}
}
