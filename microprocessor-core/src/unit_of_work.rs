//! ### UnitOfWork
//! [UnitOfWork] collects the [ResourceManager]s that take part in one dispatch and flushes them
//! exactly once per enlistment, according to the configured [UnitOfWorkMode].
//!
//! A dispatch creates one unit of work for its root operation and shares it with every branch.
//! Handler code reaches it through [`ProcessorContext::unit_of_work`](crate::bus_components::contexts::ProcessorContext::unit_of_work).
//!
//! #### Usage Pattern
//!
//! ```ignore
//! // inside a handler
//! let repository: Arc<OrderRepository> = self.repository.clone();
//! repository.add(order);
//!
//! // flushed when the dispatch commits, or immediately in `Disabled` mode
//! context.unit_of_work()?.enlist(repository).await?;
//! ```
//!
//! | Mode           | `enlist`                                  | `commit`                                                     |
//! |----------------|-------------------------------------------|--------------------------------------------------------------|
//! | Disabled       | flushes right away when required          | nothing to do                                                |
//! | SingleThreaded | records the manager                       | flushes in enlistment order, stops at the first failure      |
//! | MultiThreaded  | records the manager                       | one task per resource group, failures don't stop other groups |

use crate::{
	cancellation::CancellationToken,
	responses::{BaseError, HandlerError},
	settings::UnitOfWorkMode,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::task::AbortOnDropHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(String);

impl ResourceId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}
}

impl From<&str> for ResourceId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl std::fmt::Display for ResourceId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Transactional participant of a unit of work, such as a repository holding pending changes.
#[async_trait]
pub trait ResourceManager: Send + Sync {
	/// Managers sharing an id are flushed by the same task in `MultiThreaded` mode.
	/// `None` puts the manager in a group of its own.
	fn resource_id(&self) -> Option<ResourceId> {
		None
	}

	fn requires_flush(&self) -> bool;

	async fn flush(&self) -> Result<(), HandlerError>;
}

#[derive(PartialEq, Eq, Hash)]
enum GroupKey {
	Resource(ResourceId),
	Instance(usize),
}

fn instance_key(manager: &Arc<dyn ResourceManager>) -> usize {
	Arc::as_ptr(manager) as *const () as usize
}

pub struct UnitOfWork {
	mode: UnitOfWorkMode,
	token: CancellationToken,
	enlisted: Mutex<Vec<Arc<dyn ResourceManager>>>,
}

impl UnitOfWork {
	pub fn new(mode: UnitOfWorkMode, token: CancellationToken) -> Self {
		Self {
			mode,
			token,
			enlisted: Mutex::new(Vec::new()),
		}
	}

	pub fn mode(&self) -> &UnitOfWorkMode {
		&self.mode
	}

	/// Enlisting the same instance more than once before the next flush has no further effect.
	pub async fn enlist(&self, manager: Arc<dyn ResourceManager>) -> Result<(), HandlerError> {
		if self.mode == UnitOfWorkMode::Disabled {
			return flush_manager(manager.as_ref(), &self.token).await;
		}

		let mut enlisted = self.enlisted.lock().await;
		let key = instance_key(&manager);
		if !enlisted.iter().any(|m| instance_key(m) == key) {
			enlisted.push(manager);
		}
		Ok(())
	}

	pub async fn enlisted_count(&self) -> usize {
		self.enlisted.lock().await.len()
	}

	/// Flushes everything enlisted so far and empties the registry.
	/// Managers enlisted afterwards belong to a new flush cycle.
	pub async fn flush(&self) -> Result<(), HandlerError> {
		let managers = std::mem::take(&mut *self.enlisted.lock().await);

		match &self.mode {
			UnitOfWorkMode::Disabled => Ok(()),
			UnitOfWorkMode::SingleThreaded => flush_in_order(&managers, &self.token).await,
			UnitOfWorkMode::MultiThreaded => flush_groups(managers, &self.token).await,
			UnitOfWorkMode::Invalid(raw) => Err(BaseError::InvalidUnitOfWorkMode(raw.clone()).into()),
		}
	}

	pub async fn commit(&self) -> Result<(), HandlerError> {
		tracing::debug!(mode = ?self.mode, "committing unit of work");
		self.flush().await
	}
}

async fn flush_manager(manager: &dyn ResourceManager, token: &CancellationToken) -> Result<(), HandlerError> {
	token.check()?;
	if manager.requires_flush() {
		manager.flush().await?;
	}
	Ok(())
}

async fn flush_in_order(managers: &[Arc<dyn ResourceManager>], token: &CancellationToken) -> Result<(), HandlerError> {
	for manager in managers {
		flush_manager(manager.as_ref(), token).await?;
	}
	Ok(())
}

fn group_by_resource(managers: Vec<Arc<dyn ResourceManager>>) -> Vec<Vec<Arc<dyn ResourceManager>>> {
	let mut index = hashbrown::HashMap::new();
	let mut groups: Vec<Vec<Arc<dyn ResourceManager>>> = Vec::new();

	for manager in managers {
		let key = match manager.resource_id() {
			Some(id) => GroupKey::Resource(id),
			None => GroupKey::Instance(instance_key(&manager)),
		};
		let position = *index.entry(key).or_insert_with(|| {
			groups.push(Vec::new());
			groups.len() - 1
		});
		groups[position].push(manager);
	}
	groups
}

/// Group tasks are aborted if the commit is dropped before they finish.
async fn flush_groups(managers: Vec<Arc<dyn ResourceManager>>, token: &CancellationToken) -> Result<(), HandlerError> {
	let tasks: Vec<_> = group_by_resource(managers)
		.into_iter()
		.map(|group| {
			let token = token.clone();
			AbortOnDropHandle::new(tokio::spawn(async move { flush_in_order(&group, &token).await }))
		})
		.collect();

	let mut first_failure = None;
	for outcome in futures::future::join_all(tasks).await {
		let outcome = outcome.unwrap_or_else(|err| Err(BaseError::TaskFailed(err.to_string()).into()));
		if let Err(err) = outcome {
			match first_failure {
				None => first_failure = Some(err),
				Some(_) => tracing::warn!(error = %err, "additional resource group failed to flush"),
			}
		}
	}

	match first_failure {
		Some(err) => Err(err),
		None => Ok(()),
	}
}
