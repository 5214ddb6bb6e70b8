use std::sync::Arc;

/// Cooperative cancellation signal threaded through a single dispatch or query.
///
/// Wraps [`tokio_util::sync::CancellationToken`] and adds an identity, so the processor can tell the
/// caller's own token apart from any other token that happens to be cancelled.
/// Clones share both the signal and the identity.
#[derive(Clone, Default)]
pub struct CancellationToken {
	inner: tokio_util::sync::CancellationToken,
	identity: Arc<()>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.inner.cancel()
	}

	pub fn is_cancelled(&self) -> bool {
		self.inner.is_cancelled()
	}

	/// Resolves once the token is cancelled.
	pub async fn cancelled(&self) {
		self.inner.cancelled().await
	}

	/// Token that is cancelled together with this one but has an identity of its own.
	pub fn child_token(&self) -> Self {
		Self {
			inner: self.inner.child_token(),
			identity: Arc::new(()),
		}
	}

	pub fn is_same(&self, other: &CancellationToken) -> bool {
		Arc::ptr_eq(&self.identity, &other.identity)
	}

	/// Fails with [`OperationCancelled`] carrying this token when cancellation was requested.
	pub fn check(&self) -> Result<(), OperationCancelled> {
		if self.is_cancelled() {
			return Err(OperationCancelled::new(self.clone()));
		}
		Ok(())
	}
}

impl std::fmt::Debug for CancellationToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CancellationToken")
			.field("id", &Arc::as_ptr(&self.identity))
			.field("is_cancelled", &self.is_cancelled())
			.finish()
	}
}

/// Raised when an operation observes a cancelled token.
#[derive(Debug, Clone, thiserror::Error)]
#[error("the operation was cancelled")]
pub struct OperationCancelled {
	token: CancellationToken,
}

impl OperationCancelled {
	pub fn new(token: CancellationToken) -> Self {
		Self { token }
	}

	pub fn token(&self) -> &CancellationToken {
		&self.token
	}
}

#[cfg(test)]
mod test_cancellation {
	use super::*;

	#[test]
	fn test_clones_share_identity_and_signal() {
		let token = CancellationToken::new();
		let clone = token.clone();

		assert!(token.is_same(&clone));
		assert!(clone.check().is_ok());

		token.cancel();
		let err = clone.check().unwrap_err();
		assert!(err.token().is_same(&token));
	}

	#[test]
	fn test_child_token_has_own_identity() {
		let parent = CancellationToken::new();
		let child = parent.child_token();
		assert!(!parent.is_same(&child));

		parent.cancel();
		assert!(child.is_cancelled());
		assert!(!CancellationToken::new().is_same(&parent));
	}
}
