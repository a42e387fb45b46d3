/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Entry points used by the host around contract executions.
//!
//! A transaction enters through [AsyncContext::call_sc_method], which selects what happens
//! around the contract function from the call type of the transaction:
//!
//! ```text
//! DirectCall           -> run function, execute async calls, save if incomplete
//! AsynchronousCall     -> same, then answer the caller across shards once complete
//! AsynchronousCallBack -> resolve the answered call, run its callback, notify completion
//! ```
//!
//! Nested executions are bracketed by [AsyncContext::enter_nested] and [AsyncContext::leave_nested].

use tracing::{debug, trace};

use super::context::AsyncContext;
use crate::{
    error::AsyncError,
    host::{Storage, VmHost},
    types::{
        CallType, ContractCallInput, PublicAddress, ReturnCode, VmOutput, CALLBACK_FUNCTION_NAME,
        INIT_FUNCTION_NAME, UPGRADE_FUNCTION_NAME,
    },
};

/// What the caller of a nested execution needs to know once it returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NestedExit {
    /// False if the nested call left children resolving in later transactions.
    pub is_complete: bool,
    pub was_async_call: bool,
}

impl AsyncContext {
    /// Suspends the active context and starts a fresh one for the nested execution of `input`.
    pub fn enter_nested(
        &mut self,
        input: &ContractCallInput,
        parent_address: PublicAddress,
    ) -> Result<(), AsyncError> {
        if input.async_arguments.is_none() {
            return Err(AsyncError::MissingAsyncArguments);
        }
        self.push_state()?;
        self.init_state_from_input(input, parent_address)
    }

    /// Ends the nested execution which produced `vm_output` and resumes the suspended context.
    ///
    /// A successful nested call still waiting for children, or holding a legacy call, is saved
    /// first. A failed one is complete: its records and transfers are discarded with its output.
    pub fn leave_nested<S: Storage>(
        &mut self,
        storage: &mut S,
        vm_output: &VmOutput,
    ) -> Result<NestedExit, AsyncError> {
        let failed = !vm_output.return_code.is_ok();
        let was_async_call = self.state.call_type == CallType::AsynchronousCall;
        let is_complete = failed || self.is_complete();

        let saved = if !failed && (!self.is_complete() || self.has_legacy_group()) {
            self.set_results(vm_output);
            self.save(storage)
        } else {
            Ok(())
        };

        self.pop_set_active_state();
        saved?;
        Ok(NestedExit {
            is_complete,
            was_async_call,
        })
    }

    /// Runs the function of the transaction's input, with the async handling its call type needs.
    pub fn call_sc_method<H: VmHost>(&mut self, host: &mut H) -> Result<(), AsyncError> {
        let vm_input = host.vm_input().clone();
        trace!(
            parent: &self.span,
            function = %vm_input.function,
            call_type = ?vm_input.call_type,
            "call sc method"
        );

        match vm_input.call_type {
            CallType::DirectCall => self
                .call_function_and_execute_async(host, &vm_input.function)
                .map(|_| ()),
            CallType::AsynchronousCall => self.call_sc_method_async_call(host, &vm_input.function),
            CallType::AsynchronousCallBack => self.call_sc_method_async_callback(host, &vm_input),
        }
    }

    /// Runs `function`, then the async calls it registered. An incomplete context, or one
    /// holding a legacy call, records its results and is saved. Returns whether it completed.
    pub fn call_function_and_execute_async<H: VmHost>(
        &mut self,
        host: &mut H,
        function: &str,
    ) -> Result<bool, AsyncError> {
        self.verify_allowed_function_call(host, function)?;

        host.call_sc_function(self, function)?;
        self.execute(host)?;

        if !self.is_complete() || self.has_legacy_group() {
            let vm_output = host.vm_output();
            self.set_results(&vm_output);
            self.save(host)?;
            return Ok(false);
        }
        Ok(true)
    }

    fn call_sc_method_async_call<H: VmHost>(
        &mut self,
        host: &mut H,
        function: &str,
    ) -> Result<(), AsyncError> {
        match self.call_function_and_execute_async(host, function) {
            Ok(true) => {
                let vm_output = host.vm_output();
                self.send_cross_shard_callback(host, &vm_output)
            }
            Ok(false) => Ok(()),
            Err(AsyncError::ExecutionFailed { code, message }) => {
                debug!(
                    parent: &self.span,
                    return_code = ?code,
                    message = %message,
                    "asynchronous call failed"
                );
                self.send_cross_shard_callback(host, &VmOutput::failure(code, message))
            }
            Err(e) => Err(e),
        }
    }

    fn call_sc_method_async_callback<H: VmHost>(
        &mut self,
        host: &mut H,
        vm_input: &ContractCallInput,
    ) -> Result<(), AsyncError> {
        let caller_call_id = self.state.caller_call_id;
        let resolution = self.update_current_async_call_status(
            &*host,
            &host.context_address(),
            caller_call_id.as_ref(),
            vm_input,
        )?;
        let Some(resolution) = resolution else {
            return Ok(());
        };
        self.set_callback_parent_call(resolution.call.clone());

        if resolution.call.has_callback() {
            let callback = resolution.call.callback_name().to_string();
            match self.call_function_and_execute_async(host, &callback) {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(AsyncError::ExecutionFailed { code, message }) => {
                    debug!(
                        parent: &self.span,
                        return_code = ?code,
                        message = %message,
                        "callback failed"
                    );
                    host.use_gas(host.gas_left());
                }
                Err(e) => return Err(e),
            }
        }

        if resolution.is_legacy {
            return match self.state.callback_async_initiator_call_id {
                Some(initiator_call_id) => self.delete_from_call_id(host, &initiator_call_id),
                None => Ok(()),
            };
        }

        self.load_parent_context(&*host)?;
        let gas_left = host.gas_left();
        self.notify_child_is_complete(host, caller_call_id, gas_left)
    }

    fn verify_allowed_function_call<H: VmHost>(&self, host: &H, function: &str) -> Result<(), AsyncError> {
        if function == INIT_FUNCTION_NAME || function == UPGRADE_FUNCTION_NAME {
            return Err(AsyncError::ExecutionFailed {
                code: ReturnCode::UserError,
                message: format!("{function} cannot be called"),
            });
        }
        if function == CALLBACK_FUNCTION_NAME
            && host.vm_input().call_type != CallType::AsynchronousCallBack
        {
            return Err(AsyncError::ExecutionFailed {
                code: ReturnCode::UserError,
                message: format!("{CALLBACK_FUNCTION_NAME} called outside of a callback"),
            });
        }
        Ok(())
    }
}
