/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Constants and formulas which are primitives used in the gas accounting of async calls.
//!
//! The table below lists where each constant takes part in the engine.
//!
//! |Constant                       | Charged in                                            |
//! |:---                           |:---                                                   |
//! |[ASYNC_CALL_STEP]              | registration, outbound call input, callback input     |
//! |[ASYNC_CALLBACK_GAS_LOCK]      | [extra_gas_locked_for_async]                          |
//! |[AOT_PREPARE_PER_BYTE]         | [extra_gas_locked_for_async]                          |
//! |[DATA_COPY_PER_BYTE]           | [callback_gas_limit]                                  |

use serde::{Deserialize, Serialize};

/* ↓↓↓ Default gas schedule ↓↓↓ */

/// Fixed cost of one async step: registering a call, starting its execution, or building its callback.
pub const ASYNC_CALL_STEP: u64 = 100_000;

/// Gas kept aside at registration so the callback can always run.
pub const ASYNC_CALLBACK_GAS_LOCK: u64 = 4_000_000;

/// Cost per byte of contract code for preparing the caller again when its callback runs.
pub const AOT_PREPARE_PER_BYTE: u64 = 100;

/// Cost per byte of callback argument data.
pub const DATA_COPY_PER_BYTE: u64 = 50;

/// Gas costs consulted by the async engine. Hosts expose it through [crate::host::Metering::gas_schedule].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSchedule {
    pub async_call_step: u64,
    pub async_callback_gas_lock: u64,
    pub aot_prepare_per_byte: u64,
    pub data_copy_per_byte: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            async_call_step: ASYNC_CALL_STEP,
            async_callback_gas_lock: ASYNC_CALLBACK_GAS_LOCK,
            aot_prepare_per_byte: AOT_PREPARE_PER_BYTE,
            data_copy_per_byte: DATA_COPY_PER_BYTE,
        }
    }
}

/// Gas locked on top of what a contract declares, so that its callback can be prepared and run.
///
/// `code_size * aot_prepare_per_byte + async_call_step + async_callback_gas_lock`
pub fn extra_gas_locked_for_async(schedule: &GasSchedule, code_size: u64) -> u64 {
    code_size
        .saturating_mul(schedule.aot_prepare_per_byte)
        .saturating_add(schedule.async_call_step)
        .saturating_add(schedule.async_callback_gas_lock)
}

/// Size of callback argument data as charged: the function name, plus for every
/// argument one separator and two hex characters per byte.
pub fn callback_data_length(function: &str, arguments: &[Vec<u8>]) -> u64 {
    arguments.iter().fold(function.len() as u64, |length, argument| {
        length
            .saturating_add(1)
            .saturating_add((argument.len() as u64).saturating_mul(2))
    })
}

/// Gas limit available to a callback, given what the destination left and the gas locked for it.
///
/// Returns None when the cost of preparing the callback is not strictly covered.
pub fn callback_gas_limit(
    schedule: &GasSchedule,
    destination_gas_remaining: u64,
    gas_locked: u64,
    data_length: u64,
) -> Option<u64> {
    let gas_limit = destination_gas_remaining.saturating_add(gas_locked);
    let gas_to_use = schedule
        .async_call_step
        .saturating_add(schedule.data_copy_per_byte.saturating_mul(data_length));
    if gas_limit <= gas_to_use {
        return None;
    }
    Some(gas_limit - gas_to_use)
}
