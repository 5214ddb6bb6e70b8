use crate::message::{MessageEnvelope, MessageKind};
use std::{fmt, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
	Root,
	Branch,
}

/// One node of the dispatch tree: a message being handled by one handler or query.
#[derive(Debug, Clone)]
pub struct Operation {
	kind: OperationKind,
	depth: usize,
	message_kind: MessageKind,
	message: Option<MessageEnvelope>,
	handler: &'static str,
}

impl Operation {
	/// Root operations sit at depth 1. A query without request has no message.
	pub fn root(message_kind: MessageKind, message: Option<MessageEnvelope>, handler: &'static str) -> Self {
		Self {
			kind: OperationKind::Root,
			depth: 1,
			message_kind,
			message,
			handler,
		}
	}

	pub fn branch(&self, message: MessageEnvelope, handler: &'static str) -> Self {
		Self {
			kind: OperationKind::Branch,
			depth: self.depth + 1,
			message_kind: message.kind(),
			message: Some(message),
			handler,
		}
	}

	pub fn kind(&self) -> OperationKind {
		self.kind
	}
	pub fn is_root(&self) -> bool {
		self.kind == OperationKind::Root
	}
	pub fn depth(&self) -> usize {
		self.depth
	}
	pub fn message_kind(&self) -> MessageKind {
		self.message_kind
	}
	pub fn message(&self) -> Option<&MessageEnvelope> {
		self.message.as_ref()
	}
	/// Type name of the handler or query this operation invokes.
	pub fn handler(&self) -> &'static str {
		self.handler
	}
}

impl fmt::Display for Operation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.message {
			Some(message) => write!(f, "[{}] {} {} -> {}", self.depth, self.message_kind, message.message_type(), self.handler),
			None => write!(f, "[{}] {} -> {}", self.depth, self.message_kind, self.handler),
		}
	}
}

struct Frame {
	operation: Operation,
	parent: StackTrace,
}

/// Immutable stack of the operations currently executing, most recent first.
/// Pushing returns a new stack and leaves the original untouched.
#[derive(Clone, Default)]
pub struct StackTrace {
	top: Option<Arc<Frame>>,
	count: usize,
}

impl StackTrace {
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn push(&self, operation: Operation) -> StackTrace {
		StackTrace {
			top: Some(Arc::new(Frame { operation, parent: self.clone() })),
			count: self.count + 1,
		}
	}

	/// The stack without its most recent operation.
	pub fn pop(&self) -> StackTrace {
		match &self.top {
			Some(frame) => frame.parent.clone(),
			None => StackTrace::empty(),
		}
	}

	pub fn current_operation(&self) -> Option<&Operation> {
		self.top.as_ref().map(|frame| &frame.operation)
	}

	pub fn root_operation(&self) -> Option<&Operation> {
		self.iter().last()
	}

	pub fn count(&self) -> usize {
		self.count
	}

	pub fn is_empty(&self) -> bool {
		self.count == 0
	}

	pub fn iter(&self) -> Iter<'_> {
		Iter { next: self.top.as_deref() }
	}
}

pub struct Iter<'a> {
	next: Option<&'a Frame>,
}

impl<'a> Iterator for Iter<'a> {
	type Item = &'a Operation;

	fn next(&mut self) -> Option<Self::Item> {
		let frame = self.next?;
		self.next = frame.parent.top.as_deref();
		Some(&frame.operation)
	}
}

impl fmt::Debug for StackTrace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.iter()).finish()
	}
}

impl fmt::Display for StackTrace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, operation) in self.iter().enumerate() {
			if i > 0 {
				writeln!(f)?;
			}
			write!(f, "{}", operation)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod test_operation {
	use super::*;

	#[derive(Debug)]
	struct PlaceOrder;
	#[derive(Debug)]
	struct OrderPlaced;

	crate::impl_message!(PlaceOrder, OrderPlaced);

	#[test]
	fn test_push_does_not_mutate_original() {
		let root = Operation::root(MessageKind::Command, Some(MessageEnvelope::input(MessageKind::Command, PlaceOrder)), "PlaceOrderHandler");
		let empty = StackTrace::empty();
		let stack = empty.push(root.clone());

		assert!(empty.is_empty());
		assert_eq!(stack.count(), 1);
		assert!(stack.current_operation().unwrap().is_root());

		let event = MessageEnvelope::published_by(root.message(), std::sync::Arc::new(OrderPlaced));
		let branch = root.branch(event, "OrderPlacedHandler");
		let nested = stack.push(branch);

		assert_eq!(nested.count(), 2);
		assert_eq!(nested.current_operation().unwrap().depth(), 2);
		assert_eq!(nested.current_operation().unwrap().kind(), OperationKind::Branch);
		assert_eq!(nested.current_operation().unwrap().message_kind(), MessageKind::Event);
		assert_eq!(nested.root_operation().unwrap().handler(), "PlaceOrderHandler");
		assert_eq!(nested.iter().map(Operation::handler).collect::<Vec<_>>(), vec!["OrderPlacedHandler", "PlaceOrderHandler"]);

		assert_eq!(nested.pop().count(), 1);
		assert!(stack.pop().pop().is_empty());
	}

	#[test]
	fn test_display_lists_most_recent_first() {
		let root = Operation::root(MessageKind::Request, None, "GetOrders");
		let stack = StackTrace::empty().push(root);
		assert_eq!(stack.to_string(), "[1] Request -> GetOrders");
	}
}
