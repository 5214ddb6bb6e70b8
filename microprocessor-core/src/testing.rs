//! Test doubles and a given/when/then harness for code built on the processor.
//!
//! ```ignore
//! ProcessorTest::new(&processor)
//!     .when_command(PlaceOrder { order_id: 1 })
//!     .await
//!     .then_expect_handled(2)
//!     .then_expect_event::<OrderPlaced>(0, |event| event.order_id == 1);
//! ```

use crate::{
	bus_components::messagebus::{MessageHandlerOperationResult, MicroProcessor, MicroServiceBus},
	cancellation::CancellationToken,
	message::{Message, MessageEnvelope},
	responses::{ErrorCategory, HandlerError, MicroProcessorError},
	unit_of_work::{ResourceId, ResourceManager},
};
use async_trait::async_trait;
use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

/// Names of resource managers in the order they were flushed.
pub type FlushLog = Arc<Mutex<Vec<String>>>;

type FailureFactory = Box<dyn Fn() -> HandlerError + Send + Sync>;

/// Resource manager that counts how it is used.
pub struct SpyResourceManager {
	name: String,
	resource_id: Option<ResourceId>,
	requires_flush: bool,
	failure: Option<FailureFactory>,
	flush_delay: Option<Duration>,
	log: Option<FlushLog>,
	requires_flush_count: AtomicUsize,
	flush_count: AtomicUsize,
}

impl SpyResourceManager {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			resource_id: None,
			requires_flush: true,
			failure: None,
			flush_delay: None,
			log: None,
			requires_flush_count: AtomicUsize::new(0),
			flush_count: AtomicUsize::new(0),
		}
	}

	pub fn log() -> FlushLog {
		FlushLog::default()
	}

	pub fn with_log(mut self, log: &FlushLog) -> Self {
		self.log = Some(log.clone());
		self
	}

	pub fn with_resource_id(mut self, id: impl Into<ResourceId>) -> Self {
		self.resource_id = Some(id.into());
		self
	}

	/// Every flush attempt fails with the error `failure` creates.
	pub fn failing_with(mut self, failure: impl Fn() -> HandlerError + Send + Sync + 'static) -> Self {
		self.failure = Some(Box::new(failure));
		self
	}

	pub fn not_requiring_flush(mut self) -> Self {
		self.requires_flush = false;
		self
	}

	pub fn with_flush_delay(mut self, delay: Duration) -> Self {
		self.flush_delay = Some(delay);
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn requires_flush_count(&self) -> usize {
		self.requires_flush_count.load(Ordering::SeqCst)
	}

	pub fn flush_count(&self) -> usize {
		self.flush_count.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl ResourceManager for SpyResourceManager {
	fn resource_id(&self) -> Option<ResourceId> {
		self.resource_id.clone()
	}

	fn requires_flush(&self) -> bool {
		self.requires_flush_count.fetch_add(1, Ordering::SeqCst);
		self.requires_flush
	}

	async fn flush(&self) -> Result<(), HandlerError> {
		self.flush_count.fetch_add(1, Ordering::SeqCst);
		if let Some(log) = &self.log {
			if let Ok(mut log) = log.lock() {
				log.push(self.name.clone());
			}
		}
		if let Some(delay) = self.flush_delay {
			tokio::time::sleep(delay).await;
		}
		match &self.failure {
			Some(failure) => Err(failure()),
			None => Ok(()),
		}
	}
}

/// [`MicroServiceBus`] that keeps whatever it is asked to publish.
#[derive(Default)]
pub struct RecordingBus {
	published: Mutex<Vec<MessageEnvelope>>,
	failure: Option<FailureFactory>,
}

impl RecordingBus {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn failing_with(mut self, failure: impl Fn() -> HandlerError + Send + Sync + 'static) -> Self {
		self.failure = Some(Box::new(failure));
		self
	}

	pub fn published(&self) -> Vec<MessageEnvelope> {
		self.published.lock().map(|published| published.clone()).unwrap_or_default()
	}
}

#[async_trait]
impl MicroServiceBus for RecordingBus {
	async fn publish(&self, events: &[MessageEnvelope]) -> Result<(), HandlerError> {
		if let Some(failure) = &self.failure {
			return Err(failure());
		}
		if let Ok(mut published) = self.published.lock() {
			published.extend(events.iter().cloned());
		}
		Ok(())
	}
}

pub struct ProcessorTest<'a> {
	processor: &'a MicroProcessor,
	token: Option<CancellationToken>,
}

impl<'a> ProcessorTest<'a> {
	pub fn new(processor: &'a MicroProcessor) -> Self {
		Self { processor, token: None }
	}

	pub fn with_token(mut self, token: CancellationToken) -> Self {
		self.token = Some(token);
		self
	}

	pub async fn when_command<M: Message>(self, command: M) -> DispatchResultValidator {
		DispatchResultValidator::new(self.processor.execute_command(command, self.token).await)
	}

	pub async fn when_event<M: Message>(self, event: M) -> DispatchResultValidator {
		DispatchResultValidator::new(self.processor.handle_event(event, self.token).await)
	}
}

pub struct DispatchResultValidator {
	result: Result<MessageHandlerOperationResult, MicroProcessorError>,
}

impl DispatchResultValidator {
	pub(crate) fn new(result: Result<MessageHandlerOperationResult, MicroProcessorError>) -> Self {
		Self { result }
	}

	fn success(&self) -> &MessageHandlerOperationResult {
		match &self.result {
			Ok(result) => result,
			Err(err) => panic!("expected success, received error: '{:?}'", err),
		}
	}

	pub fn then_expect_events(self, count: usize) -> Self {
		let events = self.success().events();
		assert_eq!(events.len(), count, "unexpected events: {:?}", events);
		self
	}

	pub fn then_expect_event<T: Message>(self, index: usize, predicate: impl FnOnce(&T) -> bool) -> Self {
		let event = match self.success().events().get(index) {
			Ok(event) => event,
			Err(err) => panic!("{}", err),
		};
		match event.downcast_ref::<T>() {
			Some(typed) => assert!(predicate(typed), "event {} does not match: {:?}", index, typed),
			None => panic!("expected event {} to be {}, received {}", index, std::any::type_name::<T>(), event.message_type()),
		}
		self
	}

	pub fn then_expect_handled(self, count: usize) -> Self {
		assert_eq!(self.success().handled_message_count(), count);
		self
	}

	pub fn then_expect_error(self, category: ErrorCategory) -> Self {
		match &self.result {
			Ok(result) => panic!("expected error, received events: '{:?}'", result.events()),
			Err(err) => assert_eq!(err.category(), category, "unexpected error: {:?}", err),
		}
		self
	}

	pub fn get_result(self) -> Result<MessageHandlerOperationResult, MicroProcessorError> {
		self.result
	}
}
