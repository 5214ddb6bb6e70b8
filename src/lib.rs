//! In-process processor for commands, events and queries.
//!
//! Handlers are registered on a [`MicroProcessorBuilder`](prelude::MicroProcessorBuilder); every event
//! they publish is replayed breadth first within the same dispatch, and the resource managers they
//! enlist are flushed once the whole operation tree has been handled.

pub mod prelude {
	pub use microprocessor_core::impl_message;
	pub use microprocessor_core::prelude::*;
}

pub use microprocessor_core::testing;
