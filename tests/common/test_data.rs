use pchain_async_engine::{
    gas::GasSchedule,
    types::{CallType, ContractCallInput, PublicAddress},
};

// Origin Account.
pub const ORIGIN_ADDRESS: PublicAddress = [1u8; 32];
// Contracts in shard 0.
pub const CONTRACT_A: PublicAddress = [10u8; 32];
pub const CONTRACT_B: PublicAddress = [11u8; 32];
// Contract in shard 1.
pub const CONTRACT_C: PublicAddress = [20u8; 32];

pub const TX_HASH: [u8; 32] = [100u8; 32];

/// Gas locked on top of the declared lock for a contract of the simulated code size.
pub const EXTRA_GAS_LOCKED: u64 = 10 + 10 + 20;

pub struct TestData {}

impl TestData {
    /// Small costs so that gas flows can be followed by hand.
    pub fn gas_schedule() -> GasSchedule {
        GasSchedule {
            async_call_step: 10,
            async_callback_gas_lock: 20,
            aot_prepare_per_byte: 1,
            data_copy_per_byte: 1,
        }
    }

    /// A direct call from the origin account to `function` of `recipient`.
    pub fn transaction(recipient: PublicAddress, function: &str, gas: u64) -> ContractCallInput {
        ContractCallInput {
            original_caller: ORIGIN_ADDRESS,
            caller: ORIGIN_ADDRESS,
            recipient,
            function: function.to_string(),
            call_type: CallType::DirectCall,
            gas_price: 1,
            gas_provided: gas,
            current_tx_hash: TX_HASH,
            original_tx_hash: TX_HASH,
            ..Default::default()
        }
    }

    /// Hash of the `n`-th transaction following the one of [TX_HASH].
    pub fn tx_hash(n: u8) -> [u8; 32] {
        [100u8.wrapping_add(n); 32]
    }
}
