/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Completion of async calls and its propagation up the call tree.
//!
//! When the last child of a context completes, the context itself is complete and its own
//! parent is notified. Depending on how the context was started, the notification runs the
//! parent's callback (in this shard, or by sending a callback across shards) or completes a
//! child of the parent directly. The walk stops at the root of the call tree, or at the first
//! context which still waits for other children.

use tracing::{debug, trace};

use super::{
    call::{AsyncCall, AsyncCallStatus},
    context::AsyncContext,
    persistence::read_async_state,
};
use crate::{
    error::AsyncError,
    host::VmHost,
    types::{
        CallId, CallType, ContractCallInput, PublicAddress, ReturnCode, VmOutput,
        CALLBACK_FUNCTION_NAME,
    },
};

/// The async call answered by the running callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackResolution {
    pub call: AsyncCall,
    /// No stored context registered the call. It is answered through [CALLBACK_FUNCTION_NAME].
    pub is_legacy: bool,
}

impl AsyncContext {
    /// Completes the child `call_id` of the active context with `gas` to accumulate, and
    /// propagates completion to the parents that become complete as a result.
    ///
    /// An incomplete context is saved. A complete one has its record deleted before its
    /// parent is notified.
    pub fn notify_child_is_complete<H: VmHost>(
        &mut self,
        host: &mut H,
        call_id: Option<CallId>,
        gas: u64,
    ) -> Result<(), AsyncError> {
        let mut call_id = call_id;
        let mut gas = gas;

        for _ in 0..=self.config.max_nesting_depth {
            trace!(
                parent: &self.span,
                address = %hex::encode(self.state.address),
                context = %hex::encode(self.state.call_id),
                child = ?call_id.map(hex::encode),
                gas,
                "notify child is complete"
            );

            self.complete_child(call_id, gas)?;
            if !self.is_complete() {
                return self.save(host);
            }

            let current_call_id = self.state.call_id;
            self.delete_from_call_id(host, &current_call_id)?;
            if self.is_first_call() {
                debug!(
                    parent: &self.span,
                    call_id = %hex::encode(current_call_id),
                    "async call tree complete"
                );
                return Ok(());
            }

            let gas_accumulated = self.state.gas_accumulated;
            match self.state.call_type {
                CallType::AsynchronousCall => {
                    let child_results = self
                        .state
                        .child_results
                        .as_ref()
                        .map(VmOutput::from)
                        .unwrap_or_default();
                    if !self.call_callback(host, current_call_id, &child_results)? {
                        return Ok(());
                    }
                    call_id = Some(current_call_id);
                    gas = 0;
                }
                CallType::AsynchronousCallBack => {
                    call_id = self.state.caller_call_id;
                    self.load_parent_context(&*host)?;
                    gas = gas_accumulated;
                }
                CallType::DirectCall => {
                    self.load_parent_context(&*host)?;
                    call_id = None;
                    gas = gas_accumulated;
                }
            }
        }

        Err(AsyncError::MaxNestingDepthExceeded)
    }

    /// Invokes the callback of the parent for the completed asynchronous call `call_id`.
    ///
    /// A parent in another shard is answered with a cross-shard callback, and false is returned.
    /// Otherwise the parent becomes the active context and the callback runs on it, without
    /// giving its remaining gas back to the running instance. Returns whether the callback
    /// completed.
    fn call_callback<H: VmHost>(
        &mut self,
        host: &mut H,
        call_id: CallId,
        child_results: &VmOutput,
    ) -> Result<bool, AsyncError> {
        if !host.are_in_same_shard(&self.state.address, &self.state.caller_addr) {
            self.send_cross_shard_callback(host, child_results)?;
            return Ok(false);
        }

        let gas_accumulated = self.state.gas_accumulated;
        self.load_parent_context_from_stack_or_storage(&*host)?;
        let call = self.get_async_call_by_call_id(&call_id)?.clone();

        host.disable_restore_gas();
        let result =
            self.execute_local_callback_and_finish_output(host, &call, child_results, gas_accumulated);
        host.enable_restore_gas();

        let (is_complete, _) = result?;
        Ok(is_complete)
    }

    /// Resolves the async call answered by the running callback, reading the context which
    /// registered it from storage. Returns None if the running call is not a callback.
    ///
    /// A call no stored context knows of is answered as a legacy call.
    pub fn update_current_async_call_status<H: VmHost>(
        &self,
        host: &H,
        address: &PublicAddress,
        call_id: Option<&CallId>,
        vm_input: &ContractCallInput,
    ) -> Result<Option<CallbackResolution>, AsyncError> {
        if vm_input.call_type != CallType::AsynchronousCallBack {
            return Ok(None);
        }
        let Some(return_code) = vm_input.arguments.first() else {
            return Err(AsyncError::CannotInterpretCallbackArgs);
        };

        let initiator_call_id = self
            .state
            .callback_async_initiator_call_id
            .ok_or(AsyncError::NoStoredAsyncContextFound);
        let stored = initiator_call_id.and_then(|initiator_call_id| {
            read_async_state(host, &self.config, address, &initiator_call_id)
        });
        let registering_state = match stored {
            Ok(state) => state,
            Err(AsyncError::NoStoredAsyncContextFound) => {
                return Ok(Some(legacy_resolution(address, vm_input)));
            }
            Err(e) => return Err(e),
        };

        let registered = call_id.and_then(|call_id| {
            registering_state
                .groups
                .locate(call_id)
                .and_then(|location| registering_state.groups.call(location))
        });
        let Some(call) = registered else {
            return Ok(Some(legacy_resolution(address, vm_input)));
        };

        let mut call = call.clone();
        call.update_status(ReturnCode::from_bytes(return_code));
        trace!(
            parent: &self.span,
            status = ?call.status,
            callback = call.callback_name(),
            "resolved async call of callback"
        );
        Ok(Some(CallbackResolution {
            call,
            is_legacy: false,
        }))
    }

    /// Closure of the async call answered by the running callback.
    pub fn get_callback_closure<H: VmHost>(&mut self, host: &H) -> Result<Vec<u8>, AsyncError> {
        if self.state.callback_parent_call.is_none() {
            let parent = self
                .find_parent_state(host)
                .map_err(|_| AsyncError::NoCallbackForClosure)?;
            self.state.callback_parent_call = self.state.caller_call_id.and_then(|call_id| {
                parent
                    .groups
                    .locate(&call_id)
                    .and_then(|location| parent.groups.call(location))
                    .cloned()
            });
        }

        self.state
            .callback_parent_call
            .as_ref()
            .map(|call| call.callback_closure.clone())
            .ok_or(AsyncError::NoCallbackForClosure)
    }
}

fn legacy_resolution(address: &PublicAddress, vm_input: &ContractCallInput) -> CallbackResolution {
    let call = AsyncCall {
        status: AsyncCallStatus::Resolved,
        destination: *address,
        value: vm_input.call_value,
        gas_limit: vm_input.gas_provided,
        gas_locked: vm_input.gas_locked,
        ..Default::default()
    }
    .with_callbacks(CALLBACK_FUNCTION_NAME, CALLBACK_FUNCTION_NAME);

    CallbackResolution {
        call,
        is_legacy: true,
    }
}
