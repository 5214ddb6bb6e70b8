//! ### Exception translation
//! Every failure of a dispatch or query ends up here, together with the message kind of the root
//! operation and where the failure surfaced. Rules are evaluated in order:
//!
//! | Failure                                   | Condition                              | Result                |
//! |-------------------------------------------|----------------------------------------|-----------------------|
//! | cancellation of the caller's token         |                                        | `Cancelled` as is     |
//! | cancellation of any other token            |                                        | `InternalServerError` |
//! | concurrency conflict                       | root is a command                      | `Conflict`            |
//! | business rule / bad request                | raised by the root command's handler    | `BadRequest`          |
//! | anything else                              |                                        | `InternalServerError` |

use crate::{
	cancellation::CancellationToken,
	message::MessageKind,
	responses::{BadRequestError, HandlerError, MicroProcessorError},
};

/// Where in the dispatch tree a failure surfaced.
/// Commit and external bus failures count as root failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
	Root,
	Branch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
	CallerCancellation,
	ForeignCancellation,
	Conflict,
	ClientError,
	Internal,
}

pub struct ExceptionTranslator<'a> {
	root_kind: MessageKind,
	caller_token: Option<&'a CancellationToken>,
}

impl<'a> ExceptionTranslator<'a> {
	/// Without a `caller_token` every cancellation is foreign.
	pub fn new(root_kind: MessageKind, caller_token: Option<&'a CancellationToken>) -> Self {
		Self { root_kind, caller_token }
	}

	pub fn classify(&self, error: &HandlerError) -> FailureClass {
		match error {
			HandlerError::Cancelled(cancelled) | HandlerError::Processor(MicroProcessorError::Cancelled(cancelled)) => {
				match self.caller_token {
					Some(caller) if cancelled.token().is_same(caller) => FailureClass::CallerCancellation,
					_ => FailureClass::ForeignCancellation,
				}
			}
			HandlerError::Conflict(_) | HandlerError::Processor(MicroProcessorError::Conflict { .. }) => FailureClass::Conflict,
			HandlerError::BusinessRule(_) | HandlerError::Processor(MicroProcessorError::BadRequest(_)) => FailureClass::ClientError,
			_ => FailureClass::Internal,
		}
	}

	pub fn translate(&self, error: HandlerError, origin: FailureOrigin) -> MicroProcessorError {
		let is_command = self.root_kind == MessageKind::Command;

		match (self.classify(&error), error) {
			(FailureClass::CallerCancellation, HandlerError::Cancelled(cancelled)) => MicroProcessorError::Cancelled(cancelled),
			(FailureClass::CallerCancellation, HandlerError::Processor(typed)) => typed,

			(FailureClass::Conflict, HandlerError::Processor(typed)) if is_command => typed,
			(FailureClass::Conflict, error) if is_command => MicroProcessorError::conflict(error),

			(FailureClass::ClientError, HandlerError::Processor(typed)) if is_command && origin == FailureOrigin::Root => typed,
			(FailureClass::ClientError, error) if is_command && origin == FailureOrigin::Root => MicroProcessorError::BadRequest(BadRequestError::wrap(error)),

			(_, HandlerError::Processor(typed @ MicroProcessorError::InternalServerError { .. })) => typed,
			(_, error) => MicroProcessorError::internal_server_error(error),
		}
	}
}

#[cfg(test)]
mod test_translator {
	use super::*;
	use crate::{
		cancellation::OperationCancelled,
		responses::{BaseError, BusinessRuleError, ConcurrencyConflict, ErrorCategory},
	};

	fn translate(root_kind: MessageKind, error: HandlerError, origin: FailureOrigin) -> MicroProcessorError {
		let token = CancellationToken::new();
		ExceptionTranslator::new(root_kind, Some(&token)).translate(error, origin)
	}

	#[test]
	fn test_business_rule_at_root_command_is_bad_request() {
		let err = translate(MessageKind::Command, BusinessRuleError::new("name is required").into(), FailureOrigin::Root);

		assert_eq!(err.category(), ErrorCategory::BadRequest);
		assert!(matches!(err.inner(), Some(HandlerError::BusinessRule(rule)) if rule.message() == "name is required"));
	}

	#[test]
	fn test_business_rule_elsewhere_is_internal() {
		let from_branch = translate(MessageKind::Command, BusinessRuleError::new("x").into(), FailureOrigin::Branch);
		let from_event = translate(MessageKind::Event, BusinessRuleError::new("x").into(), FailureOrigin::Root);
		let from_query = translate(MessageKind::Request, BusinessRuleError::new("x").into(), FailureOrigin::Root);

		for err in [from_branch, from_event, from_query] {
			assert_eq!(err.category(), ErrorCategory::InternalServerError);
			assert!(matches!(err.inner(), Some(HandlerError::BusinessRule(_))));
		}
	}

	#[test]
	fn test_typed_bad_request_passes_through_unwrapped() {
		let err = translate(MessageKind::Command, BadRequestError::new("bad").into(), FailureOrigin::Root);
		match err {
			MicroProcessorError::BadRequest(bad_request) => {
				assert_eq!(bad_request.message(), "bad");
				assert!(bad_request.inner().is_none());
			}
			other => panic!("unexpected error {:?}", other),
		}
	}

	#[test]
	fn test_typed_bad_request_from_branch_is_wrapped_as_internal() {
		let err = translate(MessageKind::Command, BadRequestError::new("bad").into(), FailureOrigin::Branch);
		assert_eq!(err.category(), ErrorCategory::InternalServerError);
		assert!(matches!(err.inner(), Some(HandlerError::Processor(MicroProcessorError::BadRequest(_)))));
	}

	#[test]
	fn test_conflict_depends_on_root_kind_only() {
		let on_command = translate(MessageKind::Command, ConcurrencyConflict::new("v2").into(), FailureOrigin::Branch);
		let on_event = translate(MessageKind::Event, ConcurrencyConflict::new("v2").into(), FailureOrigin::Root);

		assert_eq!(on_command.category(), ErrorCategory::Conflict);
		assert!(matches!(on_command.inner(), Some(HandlerError::Conflict(_))));
		assert_eq!(on_event.category(), ErrorCategory::InternalServerError);
		assert!(matches!(on_event.inner(), Some(HandlerError::Conflict(_))));
	}

	#[test]
	fn test_cancellation_of_caller_token_is_not_wrapped() {
		let caller = CancellationToken::new();
		let translator = ExceptionTranslator::new(MessageKind::Command, Some(&caller));

		let err = translator.translate(OperationCancelled::new(caller.clone()).into(), FailureOrigin::Branch);
		assert_eq!(err.category(), ErrorCategory::Cancelled);
		assert!(err.cancellation_token().unwrap().is_same(&caller));
		assert!(err.inner().is_none());
	}

	#[test]
	fn test_cancellation_of_other_token_is_internal() {
		let caller = CancellationToken::new();
		let other = CancellationToken::new();
		let translator = ExceptionTranslator::new(MessageKind::Command, Some(&caller));

		let err = translator.translate(OperationCancelled::new(other).into(), FailureOrigin::Root);
		assert_eq!(translator.classify(err.inner().unwrap()), FailureClass::ForeignCancellation);
		assert_eq!(err.category(), ErrorCategory::InternalServerError);
	}

	#[test]
	fn test_typed_internal_error_is_not_wrapped_twice() {
		let typed = MicroProcessorError::internal_server_error(BaseError::TaskFailed("panicked".into()).into());
		let err = translate(MessageKind::Event, typed.into(), FailureOrigin::Branch);

		assert_eq!(err.category(), ErrorCategory::InternalServerError);
		assert!(matches!(err.inner(), Some(HandlerError::Base(BaseError::TaskFailed(_)))));
	}

	#[test]
	fn test_cancellation_without_caller_token_is_internal() {
		let internal = CancellationToken::new();
		let translator = ExceptionTranslator::new(MessageKind::Command, None);

		let err = translator.translate(OperationCancelled::new(internal).into(), FailureOrigin::Root);
		assert_eq!(translator.classify(err.inner().unwrap()), FailureClass::ForeignCancellation);
		assert_eq!(err.category(), ErrorCategory::InternalServerError);
	}
}
