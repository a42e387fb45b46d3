/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines common data structures exchanged between the async engine and the execution host.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Address of an account (user or contract) on the chain.
pub type PublicAddress = [u8; 32];

/// Output of the SHA-256 hash function.
pub type Sha256Hash = [u8; 32];

/// Identifier of a call, a callback or an async context. Derived by hashing, see [crate::codec::generate_new_call_id].
pub type CallId = Sha256Hash;

/// Name of the callback invoked for legacy async calls.
pub const CALLBACK_FUNCTION_NAME: &str = "callBack";

/// Contract constructor. Async calls cannot be registered while it runs.
pub const INIT_FUNCTION_NAME: &str = "init";

/// Contract upgrade entry point. Async calls cannot be registered while it runs.
pub const UPGRADE_FUNCTION_NAME: &str = "upgradeContract";

/// Identifier of the single group holding a legacy async call.
pub const LEGACY_ASYNC_CALL_GROUP_ID: &str = "legacy";

/// Function name placed in cross-shard callback calldata. The receiving engine
/// resolves the actual callback from the stored async call.
pub const CALLBACK_PLACEHOLDER_FUNCTION: &str = "<callback>";

/// How a call reached the contract being executed.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum CallType {
    #[default]
    DirectCall,
    AsynchronousCall,
    AsynchronousCallBack,
}

impl CallType {
    pub fn is_async(&self) -> bool {
        matches!(self, CallType::AsynchronousCall | CallType::AsynchronousCallBack)
    }
}

/// Outcome code of a contract execution.
///
/// On the wire a return code is written as its minimal big-endian integer, so
/// every code fits in a single byte and [ReturnCode::Ok] is `[0x00]`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum ReturnCode {
    #[default]
    Ok,
    FunctionNotFound,
    FunctionWrongSignature,
    ContractNotFound,
    UserError,
    OutOfGas,
    AccountCollision,
    OutOfFunds,
    CallStackOverFlow,
    ContractInvalid,
    ExecutionFailed,
    UpgradeFailed,
    SimulateFailed,
}

impl ReturnCode {
    const ALL: [ReturnCode; 13] = [
        ReturnCode::Ok,
        ReturnCode::FunctionNotFound,
        ReturnCode::FunctionWrongSignature,
        ReturnCode::ContractNotFound,
        ReturnCode::UserError,
        ReturnCode::OutOfGas,
        ReturnCode::AccountCollision,
        ReturnCode::OutOfFunds,
        ReturnCode::CallStackOverFlow,
        ReturnCode::ContractInvalid,
        ReturnCode::ExecutionFailed,
        ReturnCode::UpgradeFailed,
        ReturnCode::SimulateFailed,
    ];

    pub fn as_u64(&self) -> u64 {
        *self as u64
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        vec![*self as u8]
    }

    /// Interprets a big-endian unsigned integer. Unknown codes are treated as
    /// [ReturnCode::ExecutionFailed] so that a callback still resolves as an error.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        crate::codec::u64_from_be_bytes(bytes)
            .and_then(Self::from_u64)
            .unwrap_or(ReturnCode::ExecutionFailed)
    }

    pub fn is_ok(&self) -> bool {
        *self == ReturnCode::Ok
    }
}

/// Why a running contract instance was stopped early.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Breakpoint {
    #[default]
    None,
    ExecutionFailed,
    SignalError,
    OutOfGas,
    /// The contract registered a legacy async call and must yield to the engine.
    AsyncCall,
}

/// Linkage between a call and the context that issued it.
///
/// For an [CallType::AsynchronousCall], `call_id` is the identifier the caller stored the
/// call under and `caller_call_id` is the caller's context identifier. For an
/// [CallType::AsynchronousCallBack], `caller_call_id` is the identifier of the async call being
/// answered and `callback_async_initiator_call_id` is the context that registered it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AsyncArguments {
    pub call_id: CallId,
    pub caller_call_id: Option<CallId>,
    pub callback_async_initiator_call_id: Option<CallId>,
    pub gas_accumulated: u64,
}

/// Fungible or non-fungible token transfer moved alongside a call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EsdtTransfer {
    pub token_identifier: Vec<u8>,
    pub nonce: u64,
    pub value: u64,
}

impl EsdtTransfer {
    pub fn is_fungible(&self) -> bool {
        self.nonce == 0
    }
}

/// Everything the host needs to start executing a contract function.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContractCallInput {
    pub original_caller: PublicAddress,
    pub caller: PublicAddress,
    pub recipient: PublicAddress,
    pub function: String,
    pub arguments: Vec<Vec<u8>>,
    pub call_value: u64,
    pub call_type: CallType,
    pub gas_price: u64,
    pub gas_provided: u64,
    pub gas_locked: u64,
    pub current_tx_hash: Sha256Hash,
    pub original_tx_hash: Sha256Hash,
    pub prev_tx_hash: Sha256Hash,
    pub return_call_after_error: bool,
    pub esdt_transfers: Vec<EsdtTransfer>,
    pub async_arguments: Option<AsyncArguments>,
}

/// A value transfer (optionally carrying a call) produced by an execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputTransfer {
    pub sender: PublicAddress,
    pub value: u64,
    pub gas_limit: u64,
    pub gas_locked: u64,
    pub data: Vec<u8>,
    pub async_data: Vec<u8>,
    pub call_type: CallType,
}

/// Changes to one account produced by an execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputAccount {
    pub address: PublicAddress,
    pub balance_delta: i128,
    pub output_transfers: Vec<OutputTransfer>,
}

/// Result of executing a contract function.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmOutput {
    pub return_code: ReturnCode,
    pub return_message: String,
    pub return_data: Vec<Vec<u8>>,
    pub gas_remaining: u64,
    pub output_accounts: BTreeMap<PublicAddress, OutputAccount>,
}

impl VmOutput {
    /// Output of a failed execution. All gas is consumed and no data is returned.
    pub fn failure(return_code: ReturnCode, return_message: impl Into<String>) -> Self {
        Self {
            return_code,
            return_message: return_message.into(),
            ..Default::default()
        }
    }
}
