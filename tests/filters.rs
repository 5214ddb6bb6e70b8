use microprocessor::prelude::*;
use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc, Mutex,
};

#[derive(Debug)]
struct ShipOrder;

#[derive(Debug)]
struct OrderShipped;

impl_message!(ShipOrder, OrderShipped);

#[derive(Debug, Clone, PartialEq)]
struct TenantId(&'static str);

type Journal = Arc<Mutex<Vec<String>>>;

struct Recorder {
	name: &'static str,
	journal: Journal,
}

#[async_trait]
impl MicroProcessorFilter for Recorder {
	fn name(&self) -> &'static str {
		self.name
	}

	async fn invoke(&self, next: Continuation<'_>, context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError> {
		self.journal.lock().unwrap().push(format!("{} before {}", self.name, next));
		let output = next.run(context).await;
		self.journal.lock().unwrap().push(format!("{} after", self.name));
		output
	}
}

struct TenantFilter;

#[async_trait]
impl MicroProcessorFilter for TenantFilter {
	async fn invoke(&self, next: Continuation<'_>, context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError> {
		context.insert_item(TenantId("acme"));
		next.run(context).await
	}
}

/// Runs the handler again when it reports a concurrency conflict.
struct RetryOnConflict {
	attempts: usize,
}

#[async_trait]
impl MicroProcessorFilter for RetryOnConflict {
	async fn invoke(&self, next: Continuation<'_>, context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError> {
		let mut attempt = 1;
		loop {
			match next.run(context).await {
				Err(HandlerError::Conflict(_)) if attempt < self.attempts => attempt += 1,
				outcome => return outcome,
			}
		}
	}
}

/// Swallows every message without running its handlers.
struct Maintenance;

#[async_trait]
impl MicroProcessorFilter for Maintenance {
	async fn invoke(&self, _next: Continuation<'_>, _context: &mut ProcessorContext) -> Result<InvocationOutput, HandlerError> {
		Ok(InvocationOutput::Handled)
	}
}

fn ship_handler(journal: &Journal) -> impl MessageHandler<ShipOrder> {
	let journal = journal.clone();
	handler_fn(move |_: &ShipOrder, context: &mut ProcessorContext| {
		let tenant = context.item::<TenantId>().cloned();
		journal.lock().unwrap().push(format!("handler for {:?}", tenant));
		context.publish(OrderShipped)?;
		Ok(())
	})
	.with_name("ShipOrderHandler")
}

#[tokio::test]
async fn test_filters_wrap_every_handler_outer_to_inner() {
	//GIVEN
	let journal = Journal::default();
	let processor = MicroProcessor::builder()
		.add_filter(Recorder {
			name: "outer",
			journal: journal.clone(),
		})
		.add_filter(TenantFilter)
		.add_handler::<ShipOrder, _>(ship_handler(&journal))
		.build();

	//WHEN
	let result = processor.execute_command(ShipOrder, None).await.unwrap();

	//THEN
	assert_eq!(result.events().len(), 1);
	assert_eq!(
		*journal.lock().unwrap(),
		vec![
			"outer before TenantFilter -> ShipOrderHandler",
			"handler for Some(TenantId(\"acme\"))",
			"outer after",
		]
	);
}

#[tokio::test]
async fn test_context_items_do_not_leak_between_invocations() {
	let journal = Journal::default();
	let processor = MicroProcessor::builder().add_handler::<ShipOrder, _>(ship_handler(&journal)).build();

	processor.execute_command(ShipOrder, None).await.unwrap();

	assert_eq!(*journal.lock().unwrap(), vec!["handler for None"]);
}

#[tokio::test]
async fn test_filter_may_run_the_handler_again() {
	//GIVEN
	let attempts = Arc::new(AtomicUsize::new(0));
	let counted = attempts.clone();
	let processor = MicroProcessor::builder()
		.add_filter(RetryOnConflict { attempts: 3 })
		.add_handler::<ShipOrder, _>(handler_fn(move |_: &ShipOrder, _: &mut ProcessorContext| {
			match counted.fetch_add(1, Ordering::SeqCst) {
				0 | 1 => Err(ConcurrencyConflict::new("order 1").into()),
				_ => Ok(()),
			}
		}))
		.build();

	//WHEN
	let result = processor.execute_command(ShipOrder, None).await.unwrap();

	//THEN
	assert_eq!(attempts.load(Ordering::SeqCst), 3);
	assert_eq!(result.handled_message_count(), 1);
}

#[tokio::test]
async fn test_filter_may_skip_the_handler() {
	let journal = Journal::default();
	let processor = MicroProcessor::builder().add_filter(Maintenance).add_handler::<ShipOrder, _>(ship_handler(&journal)).build();

	let result = processor.execute_command(ShipOrder, None).await.unwrap();

	assert!(journal.lock().unwrap().is_empty());
	assert!(result.events().is_empty());
	assert_eq!(result.handled_message_count(), 1);
}

struct OrderCount;

#[async_trait]
impl Query<u32> for OrderCount {
	async fn execute(&self, context: &mut ProcessorContext) -> Result<u32, HandlerError> {
		Ok(match context.item::<TenantId>() {
			Some(TenantId("acme")) => 7,
			_ => 0,
		})
	}
}

#[tokio::test]
async fn test_filters_wrap_queries() {
	let journal = Journal::default();
	let processor = MicroProcessor::builder()
		.add_filter(Recorder {
			name: "outer",
			journal: journal.clone(),
		})
		.add_filter(TenantFilter)
		.build();

	let result = processor.execute_query(&OrderCount, None).await.unwrap();

	assert_eq!(*result.response(), 7);
	assert_eq!(*journal.lock().unwrap(), vec!["outer before TenantFilter -> OrderCount", "outer after"]);
}

#[tokio::test]
async fn test_query_short_circuited_without_response_is_internal() {
	let processor = MicroProcessor::builder().add_filter(Maintenance).build();

	let err = processor.execute_query(&OrderCount, None).await.unwrap_err();

	assert_eq!(err.category(), ErrorCategory::InternalServerError);
	assert!(matches!(err.inner(), Some(HandlerError::Base(BaseError::MissingResponse(_)))));
}
