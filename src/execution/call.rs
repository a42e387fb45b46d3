/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A single outbound call registered by a contract, together with its callbacks.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{CallId, PublicAddress, ReturnCode};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AsyncCallStatus {
    #[default]
    Pending,
    Resolved,
    Rejected,
}

/// Where and how an async call runs, decided when it is registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AsyncCallExecutionMode {
    /// The destination is a contract in this shard. It runs within the current transaction.
    #[default]
    SyncExecution,
    /// A built-in function whose receiver is in this shard.
    AsyncBuiltinFuncIntraShard,
    /// A built-in function whose receiver is in another shard. Its in-shard half runs now.
    AsyncBuiltinFuncCrossShard,
    /// A plain token transfer made from within a callback.
    EsdtTransferOnCallBack,
    /// The destination has no code in this shard's view. The call is sent cross-shard.
    AsyncUnknown,
}

/// A call registered by a contract to be executed asynchronously.
///
/// `call_id` is assigned once, when the call starts executing or is dispatched (or at
/// registration for [AsyncCallExecutionMode::EsdtTransferOnCallBack]), and never changes after.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AsyncCall {
    pub call_id: Option<CallId>,
    pub status: AsyncCallStatus,
    pub execution_mode: AsyncCallExecutionMode,
    pub destination: PublicAddress,
    /// Call data in `function@hexarg...` format.
    pub data: Vec<u8>,
    pub gas_limit: u64,
    /// Gas reserved for the callback.
    pub gas_locked: u64,
    pub value: u64,
    pub success_callback: String,
    pub error_callback: String,
    /// Opaque data made available to the callback.
    pub callback_closure: Vec<u8>,
}

impl AsyncCall {
    pub fn new(destination: PublicAddress, data: Vec<u8>, value: u64, gas_limit: u64) -> Self {
        Self {
            destination,
            data,
            value,
            gas_limit,
            ..Default::default()
        }
    }

    pub fn with_callbacks(mut self, success_callback: &str, error_callback: &str) -> Self {
        self.success_callback = success_callback.to_string();
        self.error_callback = error_callback.to_string();
        self
    }

    pub fn with_gas_locked(mut self, gas_locked: u64) -> Self {
        self.gas_locked = gas_locked;
        self
    }

    pub fn with_callback_closure(mut self, callback_closure: Vec<u8>) -> Self {
        self.callback_closure = callback_closure;
        self
    }

    pub fn total_gas(&self) -> u64 {
        self.gas_limit.saturating_add(self.gas_locked)
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self.execution_mode,
            AsyncCallExecutionMode::AsyncUnknown | AsyncCallExecutionMode::AsyncBuiltinFuncCrossShard
        )
    }

    pub fn is_local(&self) -> bool {
        !self.is_remote()
    }

    /// Callback selected by the status: the success callback once resolved, the error callback otherwise.
    pub fn callback_name(&self) -> &str {
        match self.status {
            AsyncCallStatus::Resolved => &self.success_callback,
            _ => &self.error_callback,
        }
    }

    /// Whether the callback selected by the current status is set.
    pub fn has_callback(&self) -> bool {
        !self.callback_name().is_empty()
    }

    pub fn has_defined_any_callback(&self) -> bool {
        !self.success_callback.is_empty() || !self.error_callback.is_empty()
    }

    pub fn update_status(&mut self, return_code: ReturnCode) {
        self.status = if return_code.is_ok() {
            AsyncCallStatus::Resolved
        } else {
            AsyncCallStatus::Rejected
        };
    }

    pub fn reject(&mut self) {
        self.status = AsyncCallStatus::Rejected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_selected_by_status() {
        let mut call = AsyncCall::new([1u8; 32], b"f".to_vec(), 0, 10).with_callbacks("ok", "err");
        // a pending call resolves to the error callback
        assert_eq!(call.callback_name(), "err");
        call.update_status(ReturnCode::Ok);
        assert_eq!(call.status, AsyncCallStatus::Resolved);
        assert_eq!(call.callback_name(), "ok");
        call.update_status(ReturnCode::OutOfGas);
        assert_eq!(call.status, AsyncCallStatus::Rejected);
        assert_eq!(call.callback_name(), "err");
    }

    #[test]
    fn test_has_callback_per_status() {
        let mut call = AsyncCall::new([1u8; 32], b"f".to_vec(), 0, 10).with_callbacks("ok", "");
        assert!(call.has_defined_any_callback());
        call.reject();
        assert!(!call.has_callback());
        call.update_status(ReturnCode::Ok);
        assert!(call.has_callback());
    }

    #[test]
    fn test_locality() {
        let mut call = AsyncCall::new([1u8; 32], b"f".to_vec(), 0, 10).with_gas_locked(5);
        assert_eq!(call.total_gas(), 15);
        for (mode, is_local) in [
            (AsyncCallExecutionMode::SyncExecution, true),
            (AsyncCallExecutionMode::AsyncBuiltinFuncIntraShard, true),
            (AsyncCallExecutionMode::EsdtTransferOnCallBack, true),
            (AsyncCallExecutionMode::AsyncBuiltinFuncCrossShard, false),
            (AsyncCallExecutionMode::AsyncUnknown, false),
        ] {
            call.execution_mode = mode;
            assert_eq!(call.is_local(), is_local);
            assert_eq!(call.is_remote(), !is_local);
        }
    }
}
