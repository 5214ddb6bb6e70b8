pub mod contexts;
pub mod event_bus;
pub mod handler;
pub mod messagebus;
pub mod operation;
pub mod pipeline;
pub mod translator;
