/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Execution of the async calls registered by the running contract.
//!
//! [AsyncContext::execute] runs in two phases once the contract function returns:
//! 1. Local calls run within the current transaction, each through a nested execution followed
//!    by its callback.
//! 2. Every call still pending is dispatched to its shard. A built-in call with a cross-shard
//!    receiver runs its in-shard half instead, whose output dispatches the rest.
//!
//! Calls are referred to by their call ID across nested executions. The nested execution
//! works on a copy of the groups and the active state is restored from the stack afterwards,
//! so positions taken before it may not hold after it.

use tracing::{debug, trace, warn};

use super::{
    call::{AsyncCall, AsyncCallExecutionMode, AsyncCallStatus},
    context::AsyncContext,
    group::CallLocation,
};
use crate::{
    codec::{parse_call_data, CallDataBuilder, CallLinkage},
    error::AsyncError,
    host::VmHost,
    types::{
        AsyncArguments, CallId, CallType, ContractCallInput, OutputTransfer, VmOutput,
        LEGACY_ASYNC_CALL_GROUP_ID,
    },
};

impl AsyncContext {
    /// Executes the local calls, then dispatches the remote ones, then drops the legacy group.
    pub fn execute<H: VmHost>(&mut self, host: &mut H) -> Result<(), AsyncError> {
        if !self.has_pending_call_groups() {
            return Ok(());
        }

        trace!(
            parent: &self.span,
            gas_left = host.gas_left(),
            gas_accumulated = self.state.gas_accumulated,
            "execute begin"
        );

        trace!(parent: &self.span, "execute locals");
        while let Some(location) = self
            .state
            .groups
            .find(|call| call.is_local() && call.status == AsyncCallStatus::Pending)
        {
            self.execute_async_local_call(host, location)?;
        }

        trace!(parent: &self.span, "execute remote");
        while let Some(location) = self
            .state
            .groups
            .find(|call| call.status == AsyncCallStatus::Pending && call.call_id.is_none())
        {
            self.execute_async_call(host, location)?;
        }

        // A dispatched legacy call stays counted as a live child.
        self.state.groups.remove(LEGACY_ASYNC_CALL_GROUP_ID);
        Ok(())
    }

    fn execute_async_local_call<H: VmHost>(
        &mut self,
        host: &mut H,
        location: CallLocation,
    ) -> Result<(), AsyncError> {
        let input = self.create_contract_call_input(host, location)?;
        let call_id = self.call_id_at(location)?;

        trace!(
            parent: &self.span,
            destination = %hex::encode(input.recipient),
            function = %input.function,
            gas_provided = input.gas_provided,
            gas_locked = input.gas_locked,
            "execute async local call"
        );

        // The gas limit was consumed at registration. The nested execution consumes it again
        // and restores what it does not use.
        let gas_limit = input.gas_provided;
        host.restore_gas(gas_limit);
        let outcome = host.execute_on_dest_context(self, input)?;

        trace!(
            parent: &self.span,
            return_code = ?outcome.vm_output.return_code,
            gas_remaining = outcome.vm_output.gas_remaining,
            is_complete = outcome.is_complete,
            "async local call returned"
        );

        let call = self.update_call_status(&call_id, &outcome.vm_output)?;
        if !outcome.is_complete {
            return Ok(());
        }

        if call.has_callback() {
            let (is_callback_complete, callback_output) =
                self.execute_local_callback_and_finish_output(host, &call, &outcome.vm_output, 0)?;
            if is_callback_complete {
                return self.complete_child(Some(call_id), callback_output.gas_remaining);
            }
            return Ok(());
        }

        self.complete_child(Some(call_id), 0)
    }

    fn execute_async_call<H: VmHost>(
        &mut self,
        host: &mut H,
        location: CallLocation,
    ) -> Result<(), AsyncError> {
        let is_builtin_cross_shard = self
            .state
            .groups
            .call(location)
            .map(|call| call.execution_mode == AsyncCallExecutionMode::AsyncBuiltinFuncCrossShard)
            .ok_or(AsyncError::AsyncCallNotFound)?;

        // The built-in's own output carries the remote half of the call.
        if is_builtin_cross_shard {
            return self.execute_sync_half_of_builtin_function(host, location);
        }

        self.send_async_call_cross_shard(host, location)
    }

    /// Runs the in-shard half of a built-in call with a cross-shard receiver. The host emits the
    /// remote half as an asynchronous call linked to the call, which stays pending.
    ///
    /// On failure the call is rejected and answered through its error callback, otherwise the gas
    /// the built-in leaves becomes the gas limit of the call.
    fn execute_sync_half_of_builtin_function<H: VmHost>(
        &mut self,
        host: &mut H,
        location: CallLocation,
    ) -> Result<(), AsyncError> {
        let input = self.create_contract_call_input(host, location)?;
        let call_id = self.call_id_at(location)?;

        host.restore_gas(input.gas_provided);
        let outcome = host.execute_on_dest_context(self, input)?;
        let vm_output = outcome.vm_output;

        if !vm_output.return_code.is_ok() {
            let call = {
                let location = self.locate(&call_id)?;
                let call = self
                    .state
                    .groups
                    .call_mut(location)
                    .ok_or(AsyncError::AsyncCallNotFound)?;
                call.reject();
                call.clone()
            };

            debug!(
                parent: &self.span,
                return_code = ?vm_output.return_code,
                "in-shard half of built-in call failed"
            );

            if call.has_callback() {
                let (is_callback_complete, callback_output) =
                    self.execute_local_callback_and_finish_output(host, &call, &vm_output, 0)?;
                if is_callback_complete {
                    self.complete_child(Some(call_id), callback_output.gas_remaining)?;
                }
            } else {
                self.complete_child(Some(call_id), 0)?;
            }
            return Ok(());
        }

        debug!(
            parent: &self.span,
            call_id = %hex::encode(call_id),
            gas_remaining = vm_output.gas_remaining,
            "in-shard half of built-in call done"
        );
        let location = self.locate(&call_id)?;
        if let Some(call) = self.state.groups.call_mut(location) {
            call.gas_limit = vm_output.gas_remaining;
        }
        Ok(())
    }

    /// Emits the outbound transfer of a remote call. The call gets its identifier now, and
    /// stays pending until its callback comes back.
    fn send_async_call_cross_shard<H: VmHost>(
        &mut self,
        host: &mut H,
        location: CallLocation,
    ) -> Result<(), AsyncError> {
        let call = self
            .state
            .groups
            .call(location)
            .cloned()
            .ok_or(AsyncError::AsyncCallNotFound)?;
        let (function, arguments) = parse_call_data(&call.data)?;
        let call_id = self.ensure_call_id(location)?;

        let async_data = CallLinkage {
            call_id,
            caller_call_id: self.state.call_id,
        }
        .encode()?;
        let data = CallDataBuilder::new(&function)
            .arguments(&arguments)
            .build();

        debug!(
            parent: &self.span,
            destination = %hex::encode(call.destination),
            call_id = %hex::encode(call_id),
            function = %function,
            gas_limit = call.gas_limit,
            gas_locked = call.gas_locked,
            "send async call cross-shard"
        );

        host.transfer(
            call.destination,
            OutputTransfer {
                sender: self.state.address,
                value: call.value,
                gas_limit: call.gas_limit,
                gas_locked: call.gas_locked,
                data,
                async_data,
                call_type: CallType::AsynchronousCall,
            },
        )
    }

    /// Input for running the call at `location` as a nested execution. Assigns the call its
    /// identifier and counts it as live.
    fn create_contract_call_input<H: VmHost>(
        &mut self,
        host: &H,
        location: CallLocation,
    ) -> Result<ContractCallInput, AsyncError> {
        let call = self
            .state
            .groups
            .call(location)
            .cloned()
            .ok_or(AsyncError::AsyncCallNotFound)?;
        let (function, arguments) = parse_call_data(&call.data)?;

        if call.gas_limit <= host.gas_schedule().async_call_step {
            return Err(AsyncError::NotEnoughGas);
        }

        let call_id = self.ensure_call_id(location)?;
        let vm_input = host.vm_input();
        Ok(ContractCallInput {
            original_caller: vm_input.original_caller,
            caller: self.state.address,
            recipient: call.destination,
            function,
            arguments,
            call_value: call.value,
            call_type: CallType::AsynchronousCall,
            gas_price: vm_input.gas_price,
            gas_provided: call.gas_limit,
            gas_locked: call.gas_locked,
            current_tx_hash: vm_input.current_tx_hash,
            original_tx_hash: vm_input.original_tx_hash,
            prev_tx_hash: vm_input.prev_tx_hash,
            async_arguments: Some(AsyncArguments {
                call_id,
                caller_call_id: Some(self.state.call_id),
                callback_async_initiator_call_id: None,
                gas_accumulated: 0,
            }),
            ..Default::default()
        })
    }

    fn update_call_status(
        &mut self,
        call_id: &CallId,
        vm_output: &VmOutput,
    ) -> Result<AsyncCall, AsyncError> {
        let location = self.locate(call_id)?;
        let call = self
            .state
            .groups
            .call_mut(location)
            .ok_or(AsyncError::AsyncCallNotFound)?;
        call.update_status(vm_output.return_code);
        Ok(call.clone())
    }

    fn call_id_at(&self, location: CallLocation) -> Result<CallId, AsyncError> {
        self.state
            .groups
            .call(location)
            .and_then(|call| call.call_id)
            .ok_or(AsyncError::AsyncCallNotFound)
    }

    pub(crate) fn locate(&self, call_id: &CallId) -> Result<CallLocation, AsyncError> {
        self.state
            .groups
            .locate(call_id)
            .ok_or(AsyncError::AsyncCallNotFound)
    }

    /* ↓↓↓ Completion of children ↓↓↓ */

    /// Records that a child finished: one live child less, `gas` added to the gas accumulated,
    /// and the call with `call_id` (if any) deleted together with its group if it was the last.
    pub fn complete_child(&mut self, call_id: Option<CallId>, gas: u64) -> Result<(), AsyncError> {
        self.decrement_calls_counter();
        self.accumulate_gas(gas);
        match call_id {
            Some(call_id) => self.delete_async_call_and_clean_group(&call_id),
            None => Ok(()),
        }
    }

    /// [AsyncContext::complete_child] if `is_complete`, nothing otherwise.
    pub fn complete_child_conditional(
        &mut self,
        is_complete: bool,
        call_id: Option<CallId>,
        gas: u64,
    ) -> Result<(), AsyncError> {
        if !is_complete {
            return Ok(());
        }
        self.complete_child(call_id, gas)
    }

    pub fn delete_async_call_and_clean_group(&mut self, call_id: &CallId) -> Result<(), AsyncError> {
        let location = self.locate(call_id)?;
        self.state.groups.delete_call(location);
        Ok(())
    }

    fn decrement_calls_counter(&mut self) {
        match self.state.calls_counter.checked_sub(1) {
            Some(counter) => self.state.calls_counter = counter,
            None => warn!(parent: &self.span, "completed a child with no live children"),
        }
    }

    fn accumulate_gas(&mut self, gas: u64) {
        self.state.gas_accumulated = self.state.gas_accumulated.saturating_add(gas);
        trace!(
            parent: &self.span,
            gas,
            gas_accumulated = self.state.gas_accumulated,
            "gas accumulated"
        );
    }
}
