/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Callbacks answering async calls, run locally as nested executions or sent back across shards.

use tracing::{debug, trace};

use super::{call::AsyncCall, context::AsyncContext};
use crate::{
    codec::{
        build_callback_call_data, build_callback_call_data_with_transfer, callback_arguments,
        generate_callback_call_id, parse_call_data, CallbackLinkage,
    },
    error::AsyncError,
    gas::{callback_data_length, callback_gas_limit},
    host::VmHost,
    types::{CallType, ContractCallInput, EsdtTransfer, OutputTransfer, PublicAddress, VmOutput},
};

/// Value and tokens the destination sent back to the caller without calling anything,
/// handed to the callback as its own call value and token transfers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct LastTransfer {
    pub call_value: u64,
    pub esdt_transfers: Vec<EsdtTransfer>,
    /// The built-in transfer which moved `esdt_transfers`, as function and arguments.
    pub builtin_call: Option<(String, Vec<Vec<u8>>)>,
}

impl AsyncContext {
    /// Runs the callback of `call`, which the destination answered with `destination_output`.
    ///
    /// The gas locked for the callback is given back to the running instance before the
    /// nested execution consumes the callback's whole gas limit. Returns whether the callback
    /// completed and its output.
    pub fn execute_local_callback_and_finish_output<H: VmHost>(
        &mut self,
        host: &mut H,
        call: &AsyncCall,
        destination_output: &VmOutput,
        gas_accumulated: u64,
    ) -> Result<(bool, VmOutput), AsyncError> {
        let input = self.create_callback_input(host, call, destination_output, gas_accumulated)?;

        trace!(
            parent: &self.span,
            caller = %hex::encode(input.caller),
            function = %input.function,
            gas_provided = input.gas_provided,
            return_call_after_error = input.return_call_after_error,
            "execute local callback"
        );

        host.restore_gas(call.gas_locked);
        let outcome = host.execute_on_dest_context(self, input)?;

        trace!(
            parent: &self.span,
            return_code = ?outcome.vm_output.return_code,
            gas_remaining = outcome.vm_output.gas_remaining,
            is_complete = outcome.is_complete,
            "local callback returned"
        );
        Ok((outcome.is_complete, outcome.vm_output))
    }

    /// Input of the callback answering `call`, run on the active context's contract.
    fn create_callback_input<H: VmHost>(
        &mut self,
        host: &H,
        call: &AsyncCall,
        destination_output: &VmOutput,
        gas_accumulated: u64,
    ) -> Result<ContractCallInput, AsyncError> {
        let callback_initiator =
            self.determine_destination_for_async_call(host, &call.destination, &call.data)?;

        let arguments = callback_arguments(
            destination_output.return_code,
            &destination_output.return_data,
            &destination_output.return_message,
        );
        let function = call.callback_name().to_string();

        let data_length = callback_data_length(&function, &arguments);
        let gas_limit = callback_gas_limit(
            host.gas_schedule(),
            destination_output.gas_remaining,
            call.gas_locked,
            data_length,
        )
        .ok_or(AsyncError::NotEnoughGas)?;

        let receiver = host.context_address();
        let last_transfer = self.extract_last_transfer_without_data(host, &receiver, destination_output);

        let vm_input = host.vm_input();
        let mut input = ContractCallInput {
            original_caller: vm_input.original_caller,
            caller: callback_initiator,
            recipient: self.state.address,
            function,
            arguments,
            call_value: last_transfer.call_value,
            call_type: CallType::AsynchronousCallBack,
            gas_price: vm_input.gas_price,
            gas_provided: gas_limit,
            gas_locked: 0,
            current_tx_hash: vm_input.current_tx_hash,
            original_tx_hash: vm_input.original_tx_hash,
            prev_tx_hash: vm_input.prev_tx_hash,
            return_call_after_error: !destination_output.return_code.is_ok(),
            esdt_transfers: last_transfer.esdt_transfers,
            async_arguments: None,
        };
        self.set_async_arguments_for_callback(&mut input, call, gas_accumulated);
        Ok(input)
    }

    /// The last transfer the destination made to `receiver`, if it returned no data.
    /// A plain built-in token transfer also hands over its tokens.
    pub(crate) fn extract_last_transfer_without_data<H: VmHost>(
        &self,
        host: &H,
        receiver: &PublicAddress,
        destination_output: &VmOutput,
    ) -> LastTransfer {
        let Some(last) = destination_output
            .output_accounts
            .get(receiver)
            .and_then(|account| account.output_transfers.last())
        else {
            return LastTransfer::default();
        };
        if !destination_output.return_data.is_empty() {
            return LastTransfer::default();
        }

        let mut last_transfer = LastTransfer {
            call_value: last.value,
            ..Default::default()
        };

        let Ok((function, arguments)) = parse_call_data(&last.data) else {
            return last_transfer;
        };
        if !host.is_builtin_function_name(&function) {
            return last_transfer;
        }

        if let Ok(parsed) =
            self.esdt_parser
                .parse_esdt_transfers(&last.sender, receiver, &function, &arguments)
        {
            if parsed.call_function.is_empty() {
                last_transfer.esdt_transfers = parsed.esdt_transfers;
                last_transfer.builtin_call = Some((function, arguments));
            }
        }
        last_transfer
    }

    /// Sends the outcome of the running asynchronous call back to its caller's shard.
    ///
    /// All gas left is consumed and travels with the callback transfer. Tokens and value the
    /// call sent back to its caller without calling anything travel with it too, the tokens
    /// as the built-in transfer carrying the callback. A failed call returns the value it
    /// received.
    pub fn send_cross_shard_callback<H: VmHost>(
        &mut self,
        host: &mut H,
        vm_output: &VmOutput,
    ) -> Result<(), AsyncError> {
        let gas_left = host.gas_left();
        host.use_gas(gas_left);

        let arguments = callback_arguments(
            vm_output.return_code,
            &vm_output.return_data,
            &vm_output.return_message,
        );
        let caller = self.state.caller_addr;
        let last_transfer = self.extract_last_transfer_without_data(host, &caller, vm_output);
        let value = if vm_output.return_code.is_ok() {
            last_transfer.call_value
        } else {
            host.vm_input().call_value
        };
        let data = match &last_transfer.builtin_call {
            Some((function, transfer_arguments)) => {
                build_callback_call_data_with_transfer(function, transfer_arguments, &arguments)
            }
            None => build_callback_call_data(&arguments),
        };
        let async_data = CallbackLinkage {
            callback_call_id: generate_callback_call_id(&self.state.call_id),
            call_id: self.state.call_id,
            caller_call_id: self.state.caller_call_id,
            gas_accumulated: self.state.gas_accumulated,
        }
        .encode()?;

        debug!(
            parent: &self.span,
            destination = %hex::encode(self.state.caller_addr),
            call_id = %hex::encode(self.state.call_id),
            return_code = ?vm_output.return_code,
            value,
            esdt_transfers = last_transfer.esdt_transfers.len(),
            gas = gas_left,
            "send cross-shard callback"
        );

        host.transfer(
            caller,
            OutputTransfer {
                sender: self.state.address,
                value,
                gas_limit: gas_left,
                gas_locked: 0,
                data,
                async_data,
                call_type: CallType::AsynchronousCallBack,
            },
        )
    }
}
