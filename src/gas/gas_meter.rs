/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use super::{CostChange, GasSchedule};
use crate::host::Metering;

/// GasMeter keeps track of the gas of one running contract instance.
///
/// Hosts keep one meter per nested execution frame and delegate [Metering] to the
/// meter of the frame on top. Restoring gas can be switched off while a parent's
/// callback runs on behalf of a completed child, so that gas handed back by the
/// callback does not flow into the child's frame.
#[derive(Clone, Debug)]
pub struct GasMeter {
    schedule: GasSchedule,

    /// gas limit given to the instance
    gas_provided: u64,

    /// accumulated deductions and restorations
    change: CostChange,

    restore_gas_enabled: bool,
}

impl GasMeter {
    pub fn new(schedule: GasSchedule, gas_provided: u64) -> Self {
        Self {
            schedule,
            gas_provided,
            change: CostChange::default(),
            restore_gas_enabled: true,
        }
    }

    pub fn gas_provided(&self) -> u64 {
        self.gas_provided
    }

    /// Net gas consumed so far. Zero if more gas was restored than used.
    pub fn gas_used(&self) -> u64 {
        self.change.net_cost().0
    }
}

impl Metering for GasMeter {
    fn gas_schedule(&self) -> &GasSchedule {
        &self.schedule
    }

    fn gas_left(&self) -> u64 {
        self.change.apply_to(self.gas_provided)
    }

    fn use_gas(&mut self, gas: u64) {
        self.change += CostChange::deduct(gas);
    }

    fn restore_gas(&mut self, gas: u64) {
        if self.restore_gas_enabled {
            self.change += CostChange::reward(gas);
        }
    }

    fn disable_restore_gas(&mut self) {
        self.restore_gas_enabled = false;
    }

    fn enable_restore_gas(&mut self) {
        self.restore_gas_enabled = true;
    }
}
