/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines all components related to the gas cost of async calls and its metering.
//!
//! Gas reserved by an async call is debited from the caller when the call is registered,
//! handed to the destination when it executes, and whatever is left flows back through
//! the callback and the completion chain.

pub(crate) mod cost_change;
pub(crate) use cost_change::*;

pub mod constants;
pub use constants::*;

pub mod gas_meter;
pub use gas_meter::*;
