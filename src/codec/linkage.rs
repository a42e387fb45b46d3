/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Linkage between the two halves of a cross-shard call, and the derivation of call identifiers.
//!
//! A cross-shard transfer carries, next to its call data, an `async_data` field which lets the
//! receiving shard rebuild the [AsyncArguments] of the call. It is a Borsh encoded list of byte
//! fields:
//!
//! ```text
//! call:     [call ID, caller context ID]
//! callback: [callback ID, call ID, caller context ID, gas accumulated]
//! ```
//!
//! The call data of a callback starts with the placeholder function [CALLBACK_PLACEHOLDER_FUNCTION],
//! followed by the return code and then either the returned values or the error message. When
//! the callback hands over tokens, the call data is that of the built-in token transfer with the
//! placeholder in place of the called function.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use crate::{
    codec::{parse_call_data, u64_from_be_bytes, u64_to_be_bytes, CallDataBuilder},
    error::AsyncError,
    types::{AsyncArguments, CallId, ReturnCode, CALLBACK_PLACEHOLDER_FUNCTION},
};

/// Identifier of the `counter`-th call issued by the context identified by `parent`.
pub fn generate_new_call_id(parent: &[u8], counter: u64) -> CallId {
    let mut hasher = Sha256::new();
    hasher.update(parent);
    hasher.update(u64_to_be_bytes(counter));
    hasher.finalize().into()
}

/// Identifier under which the callback answering `call_id` runs.
pub fn generate_callback_call_id(call_id: &CallId) -> CallId {
    let mut hasher = Sha256::new();
    hasher.update(call_id);
    hasher.update([0u8]);
    hasher.finalize().into()
}

#[derive(BorshSerialize, BorshDeserialize)]
struct LinkageFields(Vec<Vec<u8>>);

/// Linkage sent with an outbound asynchronous call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallLinkage {
    pub call_id: CallId,
    pub caller_call_id: CallId,
}

impl CallLinkage {
    pub fn encode(&self) -> Result<Vec<u8>, AsyncError> {
        Ok(LinkageFields(vec![self.call_id.to_vec(), self.caller_call_id.to_vec()]).try_to_vec()?)
    }

    pub fn decode(async_data: &[u8]) -> Result<Self, AsyncError> {
        match decode_fields(async_data)?.as_slice() {
            [call_id, caller_call_id] => Ok(Self {
                call_id: call_id_field(call_id)?,
                caller_call_id: call_id_field(caller_call_id)?,
            }),
            fields => Err(AsyncError::InvalidLinkage(format!(
                "expected 2 fields for a call, found {}",
                fields.len()
            ))),
        }
    }
}

/// Linkage sent with an outbound callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackLinkage {
    pub callback_call_id: CallId,
    pub call_id: CallId,
    pub caller_call_id: Option<CallId>,
    pub gas_accumulated: u64,
}

impl CallbackLinkage {
    pub fn encode(&self) -> Result<Vec<u8>, AsyncError> {
        let caller_call_id = self
            .caller_call_id
            .map(|call_id| call_id.to_vec())
            .unwrap_or_default();
        Ok(LinkageFields(vec![
            self.callback_call_id.to_vec(),
            self.call_id.to_vec(),
            caller_call_id,
            u64_to_be_bytes(self.gas_accumulated),
        ])
        .try_to_vec()?)
    }

    pub fn decode(async_data: &[u8]) -> Result<Self, AsyncError> {
        match decode_fields(async_data)?.as_slice() {
            [callback_call_id, call_id, caller_call_id, gas_accumulated] => Ok(Self {
                callback_call_id: call_id_field(callback_call_id)?,
                call_id: call_id_field(call_id)?,
                caller_call_id: if caller_call_id.is_empty() {
                    None
                } else {
                    Some(call_id_field(caller_call_id)?)
                },
                gas_accumulated: u64_from_be_bytes(gas_accumulated).ok_or_else(|| {
                    AsyncError::InvalidLinkage("gas accumulated out of range".to_string())
                })?,
            }),
            fields => Err(AsyncError::InvalidLinkage(format!(
                "expected 4 fields for a callback, found {}",
                fields.len()
            ))),
        }
    }
}

impl AsyncArguments {
    /// Arguments of an asynchronous call received from another shard.
    pub fn from_call_linkage(async_data: &[u8]) -> Result<Self, AsyncError> {
        let linkage = CallLinkage::decode(async_data)?;
        Ok(Self {
            call_id: linkage.call_id,
            caller_call_id: Some(linkage.caller_call_id),
            callback_async_initiator_call_id: None,
            gas_accumulated: 0,
        })
    }

    /// Arguments of a callback received from another shard.
    pub fn from_callback_linkage(async_data: &[u8]) -> Result<Self, AsyncError> {
        let linkage = CallbackLinkage::decode(async_data)?;
        Ok(Self {
            call_id: linkage.callback_call_id,
            caller_call_id: Some(linkage.call_id),
            callback_async_initiator_call_id: linkage.caller_call_id,
            gas_accumulated: linkage.gas_accumulated,
        })
    }
}

fn decode_fields(async_data: &[u8]) -> Result<Vec<Vec<u8>>, AsyncError> {
    LinkageFields::try_from_slice(async_data)
        .map(|fields| fields.0)
        .map_err(|e| AsyncError::InvalidLinkage(e.to_string()))
}

fn call_id_field(field: &[u8]) -> Result<CallId, AsyncError> {
    field
        .try_into()
        .map_err(|_| AsyncError::InvalidLinkage(format!("call id of {} bytes", field.len())))
}

/// Arguments given to a callback: the return code, then the returned values on
/// success or the error message on failure.
pub fn callback_arguments(
    return_code: ReturnCode,
    return_data: &[Vec<u8>],
    return_message: &str,
) -> Vec<Vec<u8>> {
    let mut arguments = vec![return_code.to_bytes()];
    if return_code.is_ok() {
        arguments.extend(return_data.iter().cloned());
    } else {
        arguments.push(return_message.as_bytes().to_vec());
    }
    arguments
}

/// Call data of a cross-shard callback.
pub fn build_callback_call_data(arguments: &[Vec<u8>]) -> Vec<u8> {
    CallDataBuilder::new(CALLBACK_PLACEHOLDER_FUNCTION)
        .arguments(arguments)
        .build()
}

/// Call data of a cross-shard callback riding on the built-in token transfer `function`.
/// The callback takes the place of the function called by the transfer.
pub fn build_callback_call_data_with_transfer(
    function: &str,
    transfer_arguments: &[Vec<u8>],
    arguments: &[Vec<u8>],
) -> Vec<u8> {
    CallDataBuilder::new(function)
        .arguments(transfer_arguments)
        .argument(CALLBACK_PLACEHOLDER_FUNCTION.as_bytes())
        .arguments(arguments)
        .build()
}

/// Call data of a cross-shard callback, as read by the receiving shard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallbackCallData {
    /// Built-in token transfer carrying the callback, as its function and arguments.
    pub transfer: Option<(String, Vec<Vec<u8>>)>,
    pub arguments: Vec<Vec<u8>>,
}

/// Reads call data written by [build_callback_call_data] or [build_callback_call_data_with_transfer].
pub fn parse_callback_call_data(data: &[u8]) -> Result<CallbackCallData, AsyncError> {
    let (function, mut arguments) = parse_call_data(data)?;
    if function == CALLBACK_PLACEHOLDER_FUNCTION {
        return Ok(CallbackCallData {
            transfer: None,
            arguments,
        });
    }

    let placeholder = arguments
        .iter()
        .position(|argument| argument.as_slice() == CALLBACK_PLACEHOLDER_FUNCTION.as_bytes())
        .ok_or_else(|| AsyncError::InvalidCallData(format!("{function} is not a callback")))?;
    let callback_arguments = arguments.split_off(placeholder + 1);
    arguments.truncate(placeholder);
    Ok(CallbackCallData {
        transfer: Some((function, arguments)),
        arguments: callback_arguments,
    })
}
