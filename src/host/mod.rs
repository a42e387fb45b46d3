/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definition of the host collaborators the async engine runs against.
//!
//! The engine never executes contract code itself. It reserves gas through [Metering], reads
//! the running instance through [Runtime], emits cross-shard transfers through [Output],
//! persists its records through [Storage], asks the chain about code and shards through
//! [Blockchain], and starts nested executions through [VmHost::execute_on_dest_context].

use crate::{
    error::AsyncError,
    execution::AsyncContext,
    gas::{extra_gas_locked_for_async, GasSchedule},
    types::{Breakpoint, ContractCallInput, OutputTransfer, PublicAddress, VmOutput},
};

/// Gas of the contract instance currently running.
pub trait Metering {
    fn gas_schedule(&self) -> &GasSchedule;

    fn gas_left(&self) -> u64;

    /// Deducts gas without any bound. Gas left saturates at zero.
    fn use_gas(&mut self, gas: u64);

    /// Gives gas back to the running instance, unless restoring is disabled.
    fn restore_gas(&mut self, gas: u64);

    fn disable_restore_gas(&mut self);

    fn enable_restore_gas(&mut self);

    /// Deducts gas only if all of it is available. Nothing is charged on failure.
    fn use_gas_bounded(&mut self, gas: u64) -> Result<(), AsyncError> {
        if self.gas_left() < gas {
            return Err(AsyncError::NotEnoughGas);
        }
        self.use_gas(gas);
        Ok(())
    }

    fn use_gas_for_async_step(&mut self) -> Result<(), AsyncError> {
        let step = self.gas_schedule().async_call_step;
        self.use_gas_bounded(step)
    }

    /// Gas locked on top of a declared lock so that the callback of a contract with
    /// `code_size` bytes of code can be prepared and run.
    fn compute_extra_gas_locked_for_async(&self, code_size: u64) -> u64 {
        extra_gas_locked_for_async(self.gas_schedule(), code_size)
    }
}

/// The contract instance currently running.
pub trait Runtime {
    /// Input of the running instance.
    fn vm_input(&self) -> &ContractCallInput;

    /// Address of the running contract.
    fn context_address(&self) -> PublicAddress;

    /// Size in bytes of the running contract's code.
    fn code_size(&self) -> u64;

    fn has_function(&self, name: &str) -> bool;

    /// Checks that `name` can be invoked as a callback of the running contract.
    fn validate_callback_name(&self, name: &str) -> Result<(), AsyncError>;

    fn set_breakpoint(&mut self, breakpoint: Breakpoint);
}

/// Output being produced by the running instance.
pub trait Output {
    /// Emits a transfer from the running contract to `destination`.
    fn transfer(
        &mut self,
        destination: PublicAddress,
        transfer: OutputTransfer,
    ) -> Result<(), AsyncError>;

    /// Output produced so far, with the gas left as remaining gas.
    fn vm_output(&self) -> VmOutput;
}

/// Storage of contract accounts, accessed without gas charges.
pub trait Storage {
    /// Returns an empty value if the key is absent.
    fn get_storage_unmetered(&self, address: &PublicAddress, key: &[u8]) -> Vec<u8>;

    /// Writes under a protected key. An empty value deletes the key.
    fn set_protected_storage_unmetered(
        &mut self,
        address: &PublicAddress,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<(), AsyncError>;
}

/// Chain-level facts the engine relies on to classify calls.
pub trait Blockchain {
    /// Returns None if the account has no code in this shard's view.
    fn get_code(&self, address: &PublicAddress) -> Option<Vec<u8>>;

    fn has_code(&self, address: &PublicAddress) -> bool {
        self.get_code(address).map_or(false, |code| !code.is_empty())
    }

    fn are_in_same_shard(&self, left: &PublicAddress, right: &PublicAddress) -> bool;

    fn is_builtin_function_name(&self, name: &str) -> bool;
}

/// Result of a nested execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NestedOutcome {
    pub vm_output: VmOutput,
    /// False if the nested call left async children which resolve in later transactions.
    pub is_complete: bool,
}

/// A host able to run contracts for the async engine.
pub trait VmHost: Metering + Runtime + Output + Storage + Blockchain {
    /// Runs `input` in a nested frame on top of the current one.
    ///
    /// Implementations debit `input.gas_provided` from the current frame, bracket the run
    /// with [AsyncContext::enter_nested] and [AsyncContext::leave_nested], call
    /// [AsyncContext::execute] once the function returned, and restore the nested frame's
    /// remaining gas unless it was an incomplete asynchronous call.
    ///
    /// A failing destination is reported through the returned output's return code.
    /// An error is returned only when the nested frame could not be set up at all.
    fn execute_on_dest_context(
        &mut self,
        async_ctx: &mut AsyncContext,
        input: ContractCallInput,
    ) -> Result<NestedOutcome, AsyncError>;

    /// Runs `function` of the running contract in the current frame.
    ///
    /// A failing function is reported as [AsyncError::ExecutionFailed].
    fn call_sc_function(
        &mut self,
        async_ctx: &mut AsyncContext,
        function: &str,
    ) -> Result<(), AsyncError>;
}
