mod bus_components;
mod cancellation;
mod macros;
mod message;
mod responses;
mod settings;
mod unit_of_work;
mod utils;

pub mod testing;

pub mod prelude {
	pub use crate::bus_components::contexts::ProcessorContext;
	pub use crate::bus_components::event_bus::{EventBuffer, EventBus, MessageStream};
	pub use crate::bus_components::handler::*;
	pub use crate::bus_components::messagebus::*;
	pub use crate::bus_components::operation::{Operation, OperationKind, StackTrace};
	pub use crate::bus_components::pipeline::{Continuation, InvocationOutput, MicroProcessorFilter, Pipeline};
	pub use crate::bus_components::translator::{ExceptionTranslator, FailureClass, FailureOrigin};
	pub use crate::cancellation::{CancellationToken, OperationCancelled};
	pub use crate::message::*;
	pub use crate::responses::{AnyError, BadRequestError, BaseError, BusinessRuleError, ConcurrencyConflict, ErrorCategory, HandlerError, MicroProcessorError};
	pub use crate::settings::*;
	pub use crate::unit_of_work::{ResourceId, ResourceManager, UnitOfWork};

	pub use async_trait::async_trait;
	pub use tokio;
	pub use tracing;
}
