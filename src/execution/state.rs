/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state of one async context, and the records it is persisted as.
//!
//! [AsyncState] is a plain value: nesting an execution pushes a copy of it onto the
//! context's stack and returning from it restores that copy.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{call::AsyncCall, group::CallGroups, AsyncCallGroup};
use crate::types::{CallId, CallType, PublicAddress, ReturnCode, VmOutput};

/// Outcome of the running call, kept so that its parent's callback can be invoked
/// once the call's own async children complete.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChildResults {
    pub return_code: ReturnCode,
    pub return_data: Vec<Vec<u8>>,
    pub return_message: String,
    pub gas_remaining: u64,
}

impl From<&VmOutput> for ChildResults {
    fn from(vm_output: &VmOutput) -> Self {
        Self {
            return_code: vm_output.return_code,
            return_data: vm_output.return_data.clone(),
            return_message: vm_output.return_message.clone(),
            gas_remaining: vm_output.gas_remaining,
        }
    }
}

impl From<&ChildResults> for VmOutput {
    fn from(results: &ChildResults) -> Self {
        Self {
            return_code: results.return_code,
            return_data: results.return_data.clone(),
            return_message: results.return_message.clone(),
            gas_remaining: results.gas_remaining,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AsyncState {
    /* Identity */
    pub(crate) address: PublicAddress,
    pub(crate) call_id: CallId,
    pub(crate) call_type: CallType,

    /* Linkage */
    pub(crate) caller_addr: PublicAddress,
    pub(crate) parent_addr: PublicAddress,
    pub(crate) caller_call_id: Option<CallId>,
    pub(crate) callback_async_initiator_call_id: Option<CallId>,

    /* Context callback */
    pub(crate) callback: String,
    pub(crate) callback_data: Vec<u8>,

    pub(crate) gas_accumulated: u64,
    pub(crate) return_data: Vec<u8>,

    pub(crate) groups: CallGroups,

    /// Live children: calls started or dispatched and not yet complete.
    pub(crate) calls_counter: u64,
    /// Calls ever issued by this context, used to derive child call IDs.
    pub(crate) total_calls_counter: u64,

    pub(crate) child_results: Option<ChildResults>,

    /// The call a running callback answers. Never persisted.
    pub(crate) callback_parent_call: Option<AsyncCall>,
}

/// Persisted form of [AsyncState], one variant per schema version.
#[derive(BorshSerialize, BorshDeserialize)]
pub(crate) enum AsyncContextRecord {
    V1(AsyncContextRecordV1),
}

#[derive(BorshSerialize, BorshDeserialize)]
pub(crate) struct AsyncContextRecordV1 {
    address: PublicAddress,
    call_id: CallId,
    call_type: CallType,
    caller_addr: PublicAddress,
    parent_addr: PublicAddress,
    caller_call_id: Option<CallId>,
    callback_async_initiator_call_id: Option<CallId>,
    callback: String,
    callback_data: Vec<u8>,
    gas_accumulated: u64,
    return_data: Vec<u8>,
    groups: Vec<AsyncCallGroup>,
    calls_counter: u64,
    total_calls_counter: u64,
}

/// Persisted form of [ChildResults].
#[derive(BorshSerialize, BorshDeserialize)]
pub(crate) enum AsyncResultsRecord {
    V1(ChildResults),
}

impl From<&AsyncState> for AsyncContextRecord {
    fn from(state: &AsyncState) -> Self {
        AsyncContextRecord::V1(AsyncContextRecordV1 {
            address: state.address,
            call_id: state.call_id,
            call_type: state.call_type,
            caller_addr: state.caller_addr,
            parent_addr: state.parent_addr,
            caller_call_id: state.caller_call_id,
            callback_async_initiator_call_id: state.callback_async_initiator_call_id,
            callback: state.callback.clone(),
            callback_data: state.callback_data.clone(),
            gas_accumulated: state.gas_accumulated,
            return_data: state.return_data.clone(),
            groups: state.groups.as_slice().to_vec(),
            calls_counter: state.calls_counter,
            total_calls_counter: state.total_calls_counter,
        })
    }
}

impl AsyncContextRecord {
    pub(crate) fn into_state(self, child_results: Option<ChildResults>) -> AsyncState {
        match self {
            AsyncContextRecord::V1(record) => AsyncState {
                address: record.address,
                call_id: record.call_id,
                call_type: record.call_type,
                caller_addr: record.caller_addr,
                parent_addr: record.parent_addr,
                caller_call_id: record.caller_call_id,
                callback_async_initiator_call_id: record.callback_async_initiator_call_id,
                callback: record.callback,
                callback_data: record.callback_data,
                gas_accumulated: record.gas_accumulated,
                return_data: record.return_data,
                groups: CallGroups::from(record.groups),
                calls_counter: record.calls_counter,
                total_calls_counter: record.total_calls_counter,
                child_results,
                callback_parent_call: None,
            },
        }
    }
}
