/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistence of incomplete async contexts in the storage of their contract.
//!
//! A context waiting for cross-shard children is saved under its call ID, so that the
//! transaction carrying the last callback can resume it. The records live under protected keys:
//!
//! ```text
//! <protected prefix> AsyncData    <call ID>  ->  AsyncContextRecord
//! <protected prefix> AsyncResults <call ID>  ->  AsyncResultsRecord (only with child results)
//! ```

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::trace;

use super::{
    context::AsyncContext,
    state::{AsyncContextRecord, AsyncResultsRecord, AsyncState},
};
use crate::{
    config::EngineConfig,
    error::AsyncError,
    host::Storage,
    types::{CallId, CallType, PublicAddress},
};

impl AsyncContext {
    /// Writes the active state to the storage of its contract.
    pub fn save<S: Storage>(&self, storage: &mut S) -> Result<(), AsyncError> {
        let address = self.state.address;
        let call_id = self.state.call_id;

        let record = AsyncContextRecord::from(&self.state).try_to_vec()?;
        storage.set_protected_storage_unmetered(
            &address,
            &self.config.async_data_key(&call_id),
            record,
        )?;

        if let Some(child_results) = &self.state.child_results {
            let results = AsyncResultsRecord::V1(child_results.clone()).try_to_vec()?;
            storage.set_protected_storage_unmetered(
                &address,
                &self.config.async_results_key(&call_id),
                results,
            )?;
        }

        trace!(
            parent: &self.span,
            address = %hex::encode(address),
            call_id = %hex::encode(call_id),
            calls_counter = self.state.calls_counter,
            "saved async context"
        );
        Ok(())
    }

    /// Replaces the active state with the stored context of the running call's parent.
    ///
    /// The parent of a direct call is its caller. The parent of a callback is the context
    /// which registered the call being answered. Other calls have no stored parent.
    pub fn load_parent_context<S: Storage>(&mut self, storage: &S) -> Result<(), AsyncError> {
        let (address, call_id) = match self.state.call_type {
            CallType::DirectCall => (self.state.caller_addr, self.state.caller_call_id),
            CallType::AsynchronousCallBack => (
                self.state.address,
                self.state.callback_async_initiator_call_id,
            ),
            CallType::AsynchronousCall => return Err(AsyncError::NoAsyncParentContext),
        };
        let call_id = call_id.ok_or(AsyncError::NoAsyncParentContext)?;
        self.load_specific_context(storage, &address, &call_id)
    }

    /// Replaces the active state with the context stored under (`address`, `call_id`).
    pub fn load_specific_context<S: Storage>(
        &mut self,
        storage: &S,
        address: &PublicAddress,
        call_id: &CallId,
    ) -> Result<(), AsyncError> {
        self.state = read_async_state(storage, &self.config, address, call_id)?;
        trace!(
            parent: &self.span,
            address = %hex::encode(address),
            call_id = %hex::encode(call_id),
            "loaded async context"
        );
        Ok(())
    }

    /// Deletes the records stored under `call_id` by the running contract.
    pub fn delete_from_call_id<S: Storage>(
        &self,
        storage: &mut S,
        call_id: &CallId,
    ) -> Result<(), AsyncError> {
        let address = self.state.address;
        storage.set_protected_storage_unmetered(
            &address,
            &self.config.async_data_key(call_id),
            Vec::new(),
        )?;
        storage.set_protected_storage_unmetered(
            &address,
            &self.config.async_results_key(call_id),
            Vec::new(),
        )
    }

    /// Replaces the active state with the parent context, taken from the stack if the parent
    /// is suspended in this transaction, or from storage otherwise.
    ///
    /// A context taken from the stack is a copy. Changes to it are not written back.
    pub fn load_parent_context_from_stack_or_storage<S: Storage>(
        &mut self,
        storage: &S,
    ) -> Result<(), AsyncError> {
        self.state = self.find_parent_state(storage)?;
        Ok(())
    }

    pub(crate) fn find_parent_state<S: Storage>(&self, storage: &S) -> Result<AsyncState, AsyncError> {
        let (address, call_id) = match self.state.call_type {
            CallType::AsynchronousCallBack => (
                self.state.address,
                self.state.callback_async_initiator_call_id,
            ),
            _ => (self.state.caller_addr, self.state.caller_call_id),
        };
        let call_id = call_id.ok_or(AsyncError::NoAsyncParentContext)?;

        let on_stack = self
            .state_stack
            .iter()
            .find(|state| state.address == address && state.call_id == call_id);
        match on_stack {
            Some(state) => Ok(state.clone()),
            None => read_async_state(storage, &self.config, &address, &call_id),
        }
    }
}

/// Reads the context stored under (`address`, `call_id`), together with its child results.
pub(crate) fn read_async_state<S: Storage>(
    storage: &S,
    config: &EngineConfig,
    address: &PublicAddress,
    call_id: &CallId,
) -> Result<AsyncState, AsyncError> {
    let data = storage.get_storage_unmetered(address, &config.async_data_key(call_id));
    if data.is_empty() {
        return Err(AsyncError::NoStoredAsyncContextFound);
    }
    let record = AsyncContextRecord::try_from_slice(&data)?;

    let results = storage.get_storage_unmetered(address, &config.async_results_key(call_id));
    let child_results = if results.is_empty() {
        None
    } else {
        match AsyncResultsRecord::try_from_slice(&results)? {
            AsyncResultsRecord::V1(child_results) => Some(child_results),
        }
    };

    Ok(record.into_state(child_results))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tracing::Span;

    use super::*;
    use crate::{
        execution::{call::AsyncCall, state::ChildResults},
        types::{AsyncArguments, ContractCallInput, ReturnCode},
    };

    #[derive(Default)]
    struct MemoryStorage(HashMap<(PublicAddress, Vec<u8>), Vec<u8>>);

    impl Storage for MemoryStorage {
        fn get_storage_unmetered(&self, address: &PublicAddress, key: &[u8]) -> Vec<u8> {
            self.0.get(&(*address, key.to_vec())).cloned().unwrap_or_default()
        }

        fn set_protected_storage_unmetered(
            &mut self,
            address: &PublicAddress,
            key: &[u8],
            value: Vec<u8>,
        ) -> Result<(), AsyncError> {
            if value.is_empty() {
                self.0.remove(&(*address, key.to_vec()));
            } else {
                self.0.insert((*address, key.to_vec()), value);
            }
            Ok(())
        }
    }

    fn started_context(call_type: CallType) -> AsyncContext {
        let mut context = AsyncContext::new(EngineConfig::default(), Span::none());
        let input = ContractCallInput {
            caller: [1u8; 32],
            recipient: [2u8; 32],
            call_type,
            current_tx_hash: [9u8; 32],
            async_arguments: call_type.is_async().then_some(AsyncArguments {
                call_id: [9u8; 32],
                caller_call_id: Some([8u8; 32]),
                ..Default::default()
            }),
            ..Default::default()
        };
        context.init_state_from_input(&input, [1u8; 32]).unwrap();
        context
    }

    #[test]
    fn test_save_then_load_restores_context() {
        let mut storage = MemoryStorage::default();
        let mut context = started_context(CallType::DirectCall);
        let mut call = AsyncCall::new([3u8; 32], b"f@01".to_vec(), 0, 500);
        call.call_id = Some([4u8; 32]);
        context.state.groups.get_or_insert("g").add_async_call(call);
        context.state.calls_counter = 1;
        context.state.total_calls_counter = 3;
        context.state.gas_accumulated = 77;
        context.save(&mut storage).unwrap();

        let mut loaded = started_context(CallType::AsynchronousCall);
        loaded
            .load_specific_context(&storage, &[2u8; 32], &[9u8; 32])
            .unwrap();
        assert_eq!(loaded.state, context.state);
    }

    #[test]
    fn test_child_results_are_stored_apart() {
        let mut storage = MemoryStorage::default();
        let mut context = started_context(CallType::AsynchronousCall);
        context.state.child_results = Some(ChildResults {
            return_code: ReturnCode::UserError,
            return_message: "failed".to_string(),
            ..Default::default()
        });
        context.save(&mut storage).unwrap();
        assert_eq!(storage.0.len(), 2);

        let state = read_async_state(&storage, &EngineConfig::default(), &[2u8; 32], &[9u8; 32]).unwrap();
        assert_eq!(state.child_results, context.state.child_results);

        context.delete_from_call_id(&mut storage, &[9u8; 32]).unwrap();
        assert!(storage.0.is_empty());
        assert!(matches!(
            read_async_state(&storage, &EngineConfig::default(), &[2u8; 32], &[9u8; 32]),
            Err(AsyncError::NoStoredAsyncContextFound)
        ));
    }

    #[test]
    fn test_corrupted_record_is_an_error() {
        let mut storage = MemoryStorage::default();
        let key = EngineConfig::default().async_data_key(&[9u8; 32]);
        storage
            .set_protected_storage_unmetered(&[2u8; 32], &key, vec![7, 7, 7])
            .unwrap();
        assert!(matches!(
            read_async_state(&storage, &EngineConfig::default(), &[2u8; 32], &[9u8; 32]),
            Err(AsyncError::Record(_))
        ));
    }

    #[test]
    fn test_parent_context_selection() {
        let storage = MemoryStorage::default();
        let mut context = started_context(CallType::AsynchronousCall);
        assert!(matches!(
            context.load_parent_context(&storage),
            Err(AsyncError::NoAsyncParentContext)
        ));

        // a root direct call has no caller context
        let mut context = started_context(CallType::DirectCall);
        assert!(matches!(
            context.load_parent_context(&storage),
            Err(AsyncError::NoAsyncParentContext)
        ));
    }

    #[test]
    fn test_parent_found_on_stack_before_storage() {
        let storage = MemoryStorage::default();
        let mut context = started_context(CallType::DirectCall);
        context.state.gas_accumulated = 5;
        context.push_state().unwrap();

        let mut nested = ContractCallInput {
            caller: [2u8; 32],
            recipient: [3u8; 32],
            call_type: CallType::DirectCall,
            ..Default::default()
        };
        context.set_async_arguments_for_call(&mut nested);
        context.init_state_from_input(&nested, [2u8; 32]).unwrap();

        context.load_parent_context_from_stack_or_storage(&storage).unwrap();
        assert_eq!(context.address(), [2u8; 32]);
        assert_eq!(context.call_id(), [9u8; 32]);
        assert_eq!(context.gas_accumulated(), 5);
    }
}
