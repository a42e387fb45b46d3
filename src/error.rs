/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! error defines the failures of async call registration, execution, completion and persistence.
//!
//! Gas and protocol errors propagate to the transaction boundary and fail it. A failing
//! destination contract is not an error here: its outcome travels as data in [crate::types::VmOutput]
//! and reaches the caller as an error callback.

use crate::types::ReturnCode;

/// Broad category of an [AsyncError], used by hosts to map failures onto receipts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Gas,
    Protocol,
    Persistence,
    Validation,
    Codec,
    Execution,
    Host,
}

/// Descriptive error definitions of the async call engine.
#[derive(Debug, thiserror::Error)]
pub enum AsyncError {
    /// Gas left is lower than a bounded debit, or a computed gas limit underflows.
    #[error("not enough gas")]
    NotEnoughGas,

    /// Async calls cannot be registered from `init` or `upgradeContract`.
    #[error("async calls are not allowed in {0}")]
    AsyncCallsNotAllowedInInit(String),

    /// Async call registered while an async call is already on the stack.
    #[error("multi-level async calls are not allowed")]
    MultiLevelAsyncCallsNotAllowed,

    /// A legacy call was registered while other groups exist or from within a callback.
    #[error("legacy async call is not allowed in this context")]
    LegacyAsyncCallInvalid,

    /// A second legacy call was registered in the same context.
    #[error("only one legacy async call is allowed")]
    OnlyOneLegacyAsyncCallAllowed,

    #[error("async call group {0} not found")]
    AsyncCallGroupNotFound(String),

    #[error("async call group {0} exists already")]
    AsyncCallGroupExistsAlready(String),

    #[error("async call not found")]
    AsyncCallNotFound,

    #[error("invalid callback name {0}")]
    InvalidCallbackName(String),

    /// A callback invocation arrived without the return code argument.
    #[error("cannot interpret callback arguments")]
    CannotInterpretCallbackArgs,

    /// A nested or asynchronous call started without the linkage to its caller.
    #[error("async arguments missing")]
    MissingAsyncArguments,

    /// The active context has no parent it could be loaded from.
    #[error("no async parent context")]
    NoAsyncParentContext,

    #[error("no stored async context found")]
    NoStoredAsyncContextFound,

    #[error("no callback closure found")]
    NoCallbackForClosure,

    #[error("context callbacks are disabled")]
    ContextCallbackDisabled,

    #[error("maximum async nesting depth exceeded")]
    MaxNestingDepthExceeded,

    /// A nested callback produced no output, usually because its gas limit underflowed.
    #[error("no output from async callback")]
    AsyncNoOutputFromCallback,

    #[error("invalid call data: {0}")]
    InvalidCallData(String),

    #[error("invalid async linkage data: {0}")]
    InvalidLinkage(String),

    /// Failure to encode or decode a persisted record.
    #[error("async record: {0}")]
    Record(#[from] std::io::Error),

    /// The contract function being run by the host failed.
    #[error("execution failed ({code:?}): {message}")]
    ExecutionFailed { code: ReturnCode, message: String },

    /// Failure reported by one of the host collaborators.
    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

impl AsyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AsyncError::NotEnoughGas => ErrorKind::Gas,
            AsyncError::AsyncCallsNotAllowedInInit(_)
            | AsyncError::MultiLevelAsyncCallsNotAllowed
            | AsyncError::LegacyAsyncCallInvalid
            | AsyncError::OnlyOneLegacyAsyncCallAllowed
            | AsyncError::ContextCallbackDisabled
            | AsyncError::MaxNestingDepthExceeded
            | AsyncError::MissingAsyncArguments
            | AsyncError::AsyncNoOutputFromCallback => ErrorKind::Protocol,
            AsyncError::NoAsyncParentContext
            | AsyncError::NoStoredAsyncContextFound
            | AsyncError::NoCallbackForClosure
            | AsyncError::Record(_) => ErrorKind::Persistence,
            AsyncError::AsyncCallGroupNotFound(_)
            | AsyncError::AsyncCallGroupExistsAlready(_)
            | AsyncError::AsyncCallNotFound
            | AsyncError::InvalidCallbackName(_)
            | AsyncError::CannotInterpretCallbackArgs => ErrorKind::Validation,
            AsyncError::InvalidCallData(_) | AsyncError::InvalidLinkage(_) => ErrorKind::Codec,
            AsyncError::ExecutionFailed { .. } => ErrorKind::Execution,
            AsyncError::Host(_) => ErrorKind::Host,
        }
    }

    /// Return code to report to a caller when this error ends a contract execution.
    pub fn return_code(&self) -> ReturnCode {
        match self {
            AsyncError::ExecutionFailed { code, .. } => *code,
            AsyncError::NotEnoughGas => ReturnCode::OutOfGas,
            AsyncError::MaxNestingDepthExceeded => ReturnCode::CallStackOverFlow,
            _ => ReturnCode::ExecutionFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(AsyncError::NotEnoughGas.kind(), ErrorKind::Gas);
        assert_eq!(
            AsyncError::MultiLevelAsyncCallsNotAllowed.kind(),
            ErrorKind::Protocol
        );
        assert_eq!(AsyncError::MissingAsyncArguments.kind(), ErrorKind::Protocol);
        assert_eq!(
            AsyncError::InvalidLinkage("short".to_string()).kind(),
            ErrorKind::Codec
        );
        assert_eq!(
            AsyncError::Host(anyhow::anyhow!("storage offline")).kind(),
            ErrorKind::Host
        );
    }

    #[test]
    fn test_return_code_of_execution_failure() {
        let err = AsyncError::ExecutionFailed {
            code: ReturnCode::UserError,
            message: "insufficient funds".to_string(),
        };
        assert_eq!(err.return_code(), ReturnCode::UserError);
        assert_eq!(err.to_string(), "execution failed (UserError): insufficient funds");
        assert_eq!(AsyncError::NotEnoughGas.return_code(), ReturnCode::OutOfGas);
    }
}
