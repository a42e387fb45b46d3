/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Registration of async calls by the running contract, and their classification into
//! [AsyncCallExecutionMode]s.

use tracing::trace;

use super::{
    call::{AsyncCall, AsyncCallExecutionMode},
    context::AsyncContext,
};
use crate::{
    codec::parse_call_data,
    error::AsyncError,
    host::VmHost,
    types::{
        Breakpoint, CallType, PublicAddress, CALLBACK_FUNCTION_NAME, INIT_FUNCTION_NAME,
        LEGACY_ASYNC_CALL_GROUP_ID, UPGRADE_FUNCTION_NAME,
    },
};

impl AsyncContext {
    /// Registers `call` in the group `group_id`, creating the group if needed.
    ///
    /// The async step, the call's gas limit and its gas lock are charged together with a single
    /// bounded debit. If callbacks are set, the lock is raised by the gas needed to prepare and
    /// run the callback. Nothing is charged if registration fails.
    pub fn register_async_call<H: VmHost>(
        &mut self,
        host: &mut H,
        group_id: &str,
        mut call: AsyncCall,
    ) -> Result<(), AsyncError> {
        if call.has_defined_any_callback() {
            for callback in [&call.success_callback, &call.error_callback] {
                if !callback.is_empty() {
                    self.validate_callback_name(host, callback)?;
                }
            }
            let extra = host.compute_extra_gas_locked_for_async(host.code_size());
            call.gas_locked = call.gas_locked.saturating_add(extra);
        }
        call.call_id = None;

        let step = host.gas_schedule().async_call_step;
        self.add_async_call(host, group_id, call, step)
    }

    /// Registers the single legacy call of the running contract and stops the contract.
    ///
    /// All gas left after the async step, minus the callback lock, is given to the call.
    /// The callback is [CALLBACK_FUNCTION_NAME] if the contract exports it.
    pub fn register_legacy_async_call<H: VmHost>(
        &mut self,
        host: &mut H,
        destination: PublicAddress,
        data: Vec<u8>,
        value: u64,
    ) -> Result<(), AsyncError> {
        if self.has_legacy_group() {
            return Err(AsyncError::OnlyOneLegacyAsyncCallAllowed);
        }
        if self.has_pending_call_groups()
            || host.vm_input().call_type == CallType::AsynchronousCallBack
        {
            return Err(AsyncError::LegacyAsyncCallInvalid);
        }

        host.use_gas_for_async_step()?;

        let has_callback = host.has_function(CALLBACK_FUNCTION_NAME);
        let gas_locked = if has_callback {
            host.compute_extra_gas_locked_for_async(host.code_size())
        } else {
            0
        };
        let gas_limit = host.gas_left().saturating_sub(gas_locked);

        let mut call = AsyncCall::new(destination, data, value, gas_limit).with_gas_locked(gas_locked);
        if has_callback {
            call = call.with_callbacks(CALLBACK_FUNCTION_NAME, CALLBACK_FUNCTION_NAME);
        }

        self.add_async_call(host, LEGACY_ASYNC_CALL_GROUP_ID, call, 0)?;
        host.set_breakpoint(Breakpoint::AsyncCall);
        Ok(())
    }

    fn add_async_call<H: VmHost>(
        &mut self,
        host: &mut H,
        group_id: &str,
        mut call: AsyncCall,
        upfront_gas: u64,
    ) -> Result<(), AsyncError> {
        let function = &host.vm_input().function;
        if function == INIT_FUNCTION_NAME || function == UPGRADE_FUNCTION_NAME {
            return Err(AsyncError::AsyncCallsNotAllowedInInit(function.clone()));
        }

        call.execution_mode = self.determine_execution_mode(host, &call)?;
        if self.is_multi_level_async(&call) {
            return Err(AsyncError::MultiLevelAsyncCallsNotAllowed);
        }

        let gas_to_charge = upfront_gas
            .checked_add(call.gas_locked)
            .and_then(|gas| gas.checked_add(call.gas_limit))
            .ok_or(AsyncError::NotEnoughGas)?;
        host.use_gas_bounded(gas_to_charge)?;

        if call.execution_mode == AsyncCallExecutionMode::EsdtTransferOnCallBack {
            let call_id = self.generate_new_call_id();
            self.state.calls_counter += 1;
            call.call_id = Some(call_id);
        }

        trace!(
            parent: &self.span,
            group = group_id,
            destination = %hex::encode(call.destination),
            mode = ?call.execution_mode,
            gas_limit = call.gas_limit,
            gas_locked = call.gas_locked,
            "added async call"
        );
        self.state.groups.get_or_insert(group_id).add_async_call(call);
        Ok(())
    }

    /// Sets a callback on the active context itself, invoked once all its children complete.
    pub fn set_context_callback<H: VmHost>(
        &mut self,
        host: &mut H,
        callback: &str,
        data: Vec<u8>,
        gas: u64,
    ) -> Result<(), AsyncError> {
        if !self.config.context_callback_enabled {
            return Err(AsyncError::ContextCallbackDisabled);
        }
        host.validate_callback_name(callback)?;

        let gas_to_lock = gas.saturating_add(host.compute_extra_gas_locked_for_async(host.code_size()));
        host.use_gas_bounded(gas_to_lock)?;

        self.state.gas_accumulated = gas_to_lock;
        self.state.callback = callback.to_string();
        self.state.callback_data = data;
        Ok(())
    }

    fn validate_callback_name<H: VmHost>(&self, host: &H, callback: &str) -> Result<(), AsyncError> {
        if callback == INIT_FUNCTION_NAME || host.is_builtin_function_name(callback) {
            return Err(AsyncError::InvalidCallbackName(callback.to_string()));
        }
        host.validate_callback_name(callback)
    }

    /// Registering an async call is refused while an async call runs anywhere on the stack,
    /// except for plain token transfers made from a callback.
    fn is_multi_level_async(&self, call: &AsyncCall) -> bool {
        call.execution_mode != AsyncCallExecutionMode::EsdtTransferOnCallBack
            && self.is_call_async_on_stack()
    }

    pub(crate) fn determine_execution_mode<H: VmHost>(
        &self,
        host: &H,
        call: &AsyncCall,
    ) -> Result<AsyncCallExecutionMode, AsyncError> {
        // Data which cannot be parsed is neither a contract call nor a built-in call.
        let Ok((function, arguments)) = parse_call_data(&call.data) else {
            return Ok(AsyncCallExecutionMode::AsyncUnknown);
        };

        let actual_destination = self.determine_destination_for_async_call(host, &call.destination, &call.data)?;

        if host.is_builtin_function_name(&function) {
            if self.state.call_type == CallType::AsynchronousCallBack
                && self.is_plain_token_transfer(host, &function, &arguments)
            {
                return Ok(AsyncCallExecutionMode::EsdtTransferOnCallBack);
            }
            if host.are_in_same_shard(&host.context_address(), &actual_destination) {
                return Ok(AsyncCallExecutionMode::AsyncBuiltinFuncIntraShard);
            }
            return Ok(AsyncCallExecutionMode::AsyncBuiltinFuncCrossShard);
        }

        if host.has_code(&actual_destination) {
            return Ok(AsyncCallExecutionMode::SyncExecution);
        }

        Ok(AsyncCallExecutionMode::AsyncUnknown)
    }

    /// A built-in call sent to the running contract itself transfers tokens to the receiver
    /// named in its arguments.
    pub(crate) fn determine_destination_for_async_call<H: VmHost>(
        &self,
        host: &H,
        destination: &PublicAddress,
        data: &[u8],
    ) -> Result<PublicAddress, AsyncError> {
        if host.context_address() != *destination {
            return Ok(*destination);
        }

        let (function, arguments) = parse_call_data(data)?;
        if !host.is_builtin_function_name(&function) {
            return Ok(*destination);
        }

        Ok(self
            .esdt_parser
            .parse_esdt_transfers(destination, destination, &function, &arguments)
            .map(|parsed| parsed.receiver)
            .unwrap_or(*destination))
    }

    fn is_plain_token_transfer<H: VmHost>(&self, host: &H, function: &str, arguments: &[Vec<u8>]) -> bool {
        let address = host.context_address();
        self.esdt_parser
            .parse_esdt_transfers(&address, &address, function, arguments)
            .map_or(false, |parsed| parsed.call_function.is_empty())
    }
}
