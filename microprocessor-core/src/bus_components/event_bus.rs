use crate::{
	make_smart_pointer,
	message::{Message, MessageEnvelope},
	responses::BaseError,
};
use std::sync::Arc;

/// Immutable, ordered sequence of messages.
///
/// Appending or concatenating returns a new stream; concatenating with an empty stream returns the
/// other stream itself rather than a copy.
#[derive(Clone, Default)]
pub struct MessageStream(Arc<Vec<MessageEnvelope>>);

/// Messages captured from a single handler invocation.
pub type EventBuffer = MessageStream;

make_smart_pointer!(MessageStream, [MessageEnvelope]);

impl MessageStream {
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn append(&self, message: MessageEnvelope) -> Self {
		let mut messages = Vec::with_capacity(self.0.len() + 1);
		messages.extend(self.0.iter().cloned());
		messages.push(message);
		Self(Arc::new(messages))
	}

	pub fn concat(&self, other: &MessageStream) -> Self {
		if other.is_empty() {
			return self.clone();
		}
		if self.is_empty() {
			return other.clone();
		}
		self.0.iter().chain(other.0.iter()).cloned().collect()
	}

	pub fn get(&self, index: usize) -> Result<&MessageEnvelope, BaseError> {
		self.0.get(index).ok_or(BaseError::IndexOutOfRange { index, len: self.0.len() })
	}

	/// Whether both streams are the very same instance.
	pub fn ptr_eq(&self, other: &MessageStream) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

impl From<Vec<MessageEnvelope>> for MessageStream {
	fn from(value: Vec<MessageEnvelope>) -> Self {
		Self(Arc::new(value))
	}
}

impl FromIterator<MessageEnvelope> for MessageStream {
	fn from_iter<T: IntoIterator<Item = MessageEnvelope>>(iter: T) -> Self {
		Self(Arc::new(iter.into_iter().collect()))
	}
}

impl std::fmt::Debug for MessageStream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_list().entries(self.0.iter().map(|m| m.instance())).finish()
	}
}

/// Collects what one handler invocation publishes.
/// The handler can inspect what it has published so far; nothing is dispatched until it returns.
#[derive(Debug, Default)]
pub struct EventBus {
	publisher: Option<MessageEnvelope>,
	published: Vec<MessageEnvelope>,
}

make_smart_pointer!(EventBus, [MessageEnvelope], published);

impl EventBus {
	pub(crate) fn new(publisher: Option<MessageEnvelope>) -> Self {
		Self {
			publisher,
			published: Vec::new(),
		}
	}

	pub fn publish<M: Message>(&mut self, message: M) {
		self.published.push(MessageEnvelope::published_by(self.publisher.as_ref(), Arc::new(message)));
	}

	pub(crate) fn into_buffer(self) -> EventBuffer {
		self.published.into()
	}
}
