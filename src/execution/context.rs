/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The async context: the calls a running contract registered, their linkage to the
//! context that started it, and a stack of suspended contexts for nested executions.

use tracing::{trace, Span};

use super::{
    call::AsyncCall,
    group::{AsyncCallGroup, CallLocation},
    state::{AsyncState, ChildResults},
};
use crate::{
    codec::{generate_new_call_id, BuiltinEsdtTransferParser, EsdtTransferParser},
    config::EngineConfig,
    error::AsyncError,
    types::{
        AsyncArguments, CallId, CallType, ContractCallInput, PublicAddress, VmOutput,
        LEGACY_ASYNC_CALL_GROUP_ID,
    },
};

/// AsyncContext orchestrates the async calls of one transaction.
///
/// One instance lives for the whole transaction. The active [AsyncState] belongs to the
/// contract instance currently running. Nested executions push it, start from a fresh state,
/// and pop it back when they return.
pub struct AsyncContext {
    pub(crate) state: AsyncState,
    pub(crate) state_stack: Vec<AsyncState>,
    pub(crate) config: EngineConfig,
    pub(crate) esdt_parser: Box<dyn EsdtTransferParser>,
    /// Every engine event is recorded within this span.
    pub(crate) span: Span,
}

impl AsyncContext {
    pub fn new(config: EngineConfig, span: Span) -> Self {
        Self::with_esdt_parser(config, Box::new(BuiltinEsdtTransferParser), span)
    }

    pub fn with_esdt_parser(
        config: EngineConfig,
        esdt_parser: Box<dyn EsdtTransferParser>,
        span: Span,
    ) -> Self {
        Self {
            state: AsyncState::default(),
            state_stack: Vec::new(),
            config,
            esdt_parser,
            span,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn esdt_parser(&self) -> &dyn EsdtTransferParser {
        self.esdt_parser.as_ref()
    }

    /// Resets the active state.
    pub fn init_state(&mut self) {
        self.state = AsyncState::default();
    }

    /// Starts the active state for a contract instance about to run `input`.
    ///
    /// Only the root call of a transaction may come without [AsyncArguments]: a call started
    /// from a suspended context, or an asynchronous call or callback, fails without them.
    pub fn init_state_from_input(
        &mut self,
        input: &ContractCallInput,
        parent_address: PublicAddress,
    ) -> Result<(), AsyncError> {
        if input.async_arguments.is_none()
            && (!self.state_stack.is_empty() || input.call_type.is_async())
        {
            return Err(AsyncError::MissingAsyncArguments);
        }

        self.init_state();
        self.state.address = input.recipient;
        self.state.caller_addr = input.caller;
        self.state.parent_addr = parent_address;
        self.state.call_type = input.call_type;
        self.state.return_data = Vec::new();

        match &input.async_arguments {
            Some(arguments) => {
                self.state.call_id = arguments.call_id;
                self.state.caller_call_id = arguments.caller_call_id;
                self.state.callback_async_initiator_call_id =
                    arguments.callback_async_initiator_call_id;
                self.state.gas_accumulated = arguments.gas_accumulated;
            }
            None => {
                self.state.call_id = input.current_tx_hash;
            }
        }

        trace!(
            parent: &self.span,
            address = %hex::encode(self.state.address),
            call_id = %hex::encode(self.state.call_id),
            call_type = ?self.state.call_type,
            "init async state"
        );
        Ok(())
    }

    /* ↓↓↓ State stack ↓↓↓ */

    /// Suspends the active state. Fails once the stack reaches the configured nesting depth.
    pub fn push_state(&mut self) -> Result<(), AsyncError> {
        if self.state_stack.len() >= self.config.max_nesting_depth {
            return Err(AsyncError::MaxNestingDepthExceeded);
        }
        self.state_stack.push(self.state.clone());
        Ok(())
    }

    /// Resumes the suspended state on top of the stack. Gas accumulated by the
    /// popped-off state is added to the resumed one.
    pub fn pop_set_active_state(&mut self) {
        if let Some(mut previous) = self.state_stack.pop() {
            previous.gas_accumulated = previous
                .gas_accumulated
                .saturating_add(self.state.gas_accumulated);
            self.state = previous;
        }
    }

    /// Does nothing. Hosts call it with the other contexts when a nested execution fails; the
    /// suspended state is only ever resumed through [AsyncContext::pop_set_active_state], so
    /// neither the active state nor the stack changes here.
    pub fn pop_discard(&mut self) {}

    /// Does nothing. Hosts call it with the other contexts when a nested execution succeeds;
    /// results of a nested async context reach its parent through storage, never by merging,
    /// so neither the active state nor the stack changes here.
    pub fn pop_merge_active_state(&mut self) {}

    pub fn clear_state_stack(&mut self) {
        self.state_stack.clear();
    }

    pub fn stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    /* ↓↓↓ Accessors ↓↓↓ */

    pub fn address(&self) -> PublicAddress {
        self.state.address
    }

    pub fn call_id(&self) -> CallId {
        self.state.call_id
    }

    pub fn call_type(&self) -> CallType {
        self.state.call_type
    }

    pub fn caller_address(&self) -> PublicAddress {
        self.state.caller_addr
    }

    pub fn parent_address(&self) -> PublicAddress {
        self.state.parent_addr
    }

    pub fn caller_call_id(&self) -> Option<CallId> {
        self.state.caller_call_id
    }

    pub fn callback_async_initiator_call_id(&self) -> Option<CallId> {
        self.state.callback_async_initiator_call_id
    }

    pub fn gas_accumulated(&self) -> u64 {
        self.state.gas_accumulated
    }

    pub fn calls_counter(&self) -> u64 {
        self.state.calls_counter
    }

    pub fn total_calls_counter(&self) -> u64 {
        self.state.total_calls_counter
    }

    pub fn return_data(&self) -> &[u8] {
        &self.state.return_data
    }

    pub fn set_return_data(&mut self, data: Vec<u8>) {
        self.state.return_data = data;
    }

    pub fn child_results(&self) -> Option<&ChildResults> {
        self.state.child_results.as_ref()
    }

    /// Records the outcome of the running call when it is an asynchronous call, so that it
    /// can be reported to its caller after its own children complete.
    pub fn set_results(&mut self, vm_output: &VmOutput) {
        if self.state.call_type == CallType::AsynchronousCall {
            self.state.child_results = Some(ChildResults::from(vm_output));
        }
    }

    /// The root context of a transaction was not started by another context.
    pub fn is_first_call(&self) -> bool {
        self.state.caller_call_id.is_none()
    }

    /// An asynchronous call or callback started in its own transaction.
    pub fn is_cross_shard(&self) -> bool {
        self.state_stack.is_empty() && self.state.call_type.is_async()
    }

    /// Whether an async call is running anywhere on the stack, the active state included.
    pub fn is_call_async_on_stack(&self) -> bool {
        self.state.call_type.is_async()
            || self
                .state_stack
                .iter()
                .any(|state| state.call_type.is_async())
    }

    /// No live children and no registered calls remain.
    pub fn is_complete(&self) -> bool {
        self.state.calls_counter == 0 && self.state.groups.is_empty()
    }

    pub fn has_pending_call_groups(&self) -> bool {
        !self.state.groups.is_empty()
    }

    pub fn has_legacy_group(&self) -> bool {
        self.state.groups.contains(LEGACY_ASYNC_CALL_GROUP_ID)
    }

    /// Whether a context callback is set.
    pub fn has_callback(&self) -> bool {
        !self.state.callback.is_empty()
    }

    pub fn call_groups(&self) -> &[AsyncCallGroup] {
        self.state.groups.as_slice()
    }

    pub fn get_call_group(&self, identifier: &str) -> Option<&AsyncCallGroup> {
        self.state.groups.get(identifier)
    }

    pub fn add_call_group(&mut self, group: AsyncCallGroup) -> Result<(), AsyncError> {
        self.state.groups.insert(group)
    }

    pub fn delete_call_group(&mut self, identifier: &str) -> Result<AsyncCallGroup, AsyncError> {
        self.state
            .groups
            .remove(identifier)
            .ok_or_else(|| AsyncError::AsyncCallGroupNotFound(identifier.to_string()))
    }

    pub fn get_async_call_by_call_id(&self, call_id: &CallId) -> Result<&AsyncCall, AsyncError> {
        self.state
            .groups
            .locate(call_id)
            .and_then(|location| self.state.groups.call(location))
            .ok_or(AsyncError::AsyncCallNotFound)
    }

    pub fn set_callback_parent_call(&mut self, call: AsyncCall) {
        self.state.callback_parent_call = Some(call);
    }

    /* ↓↓↓ Call identifiers ↓↓↓ */

    /// Derives the identifier of the next call issued by the active context.
    pub(crate) fn generate_new_call_id(&mut self) -> CallId {
        self.state.total_calls_counter += 1;
        generate_new_call_id(&self.state.call_id, self.state.total_calls_counter)
    }

    /// Links `input` to the active context as a new child call, counting it as live.
    pub fn set_async_arguments_for_call(&mut self, input: &mut ContractCallInput) {
        let call_id = self.generate_new_call_id();
        self.state.calls_counter += 1;
        input.async_arguments = Some(AsyncArguments {
            call_id,
            caller_call_id: Some(self.state.call_id),
            callback_async_initiator_call_id: None,
            gas_accumulated: 0,
        });
    }

    /// Links `input` as the callback answering `call`, which was issued by the active context.
    pub(crate) fn set_async_arguments_for_callback(
        &mut self,
        input: &mut ContractCallInput,
        call: &AsyncCall,
        gas_accumulated: u64,
    ) {
        let call_id = self.generate_new_call_id();
        input.async_arguments = Some(AsyncArguments {
            call_id,
            caller_call_id: call.call_id,
            callback_async_initiator_call_id: Some(self.state.call_id),
            gas_accumulated,
        });
    }

    /// Returns the identifier of the call at `location`, assigning one and counting the call
    /// as live if it has none yet.
    pub(crate) fn ensure_call_id(&mut self, location: CallLocation) -> Result<CallId, AsyncError> {
        let assigned = self
            .state
            .groups
            .call(location)
            .ok_or(AsyncError::AsyncCallNotFound)?
            .call_id;
        if let Some(call_id) = assigned {
            return Ok(call_id);
        }

        let call_id = self.generate_new_call_id();
        self.state.calls_counter += 1;
        let call = self
            .state
            .groups
            .call_mut(location)
            .ok_or(AsyncError::AsyncCallNotFound)?;
        call.call_id = Some(call_id);
        Ok(call_id)
    }
}
