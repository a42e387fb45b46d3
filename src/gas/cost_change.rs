/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A struct which accumulates gas used and gas restored.
//!
//! Gas is deducted when a call reserves or spends it, and rewarded when a nested
//! execution hands back what it did not use. The net cost is computed by offsetting these values.

use std::ops::{Add, AddAssign};

/// ### Example:
/// ```no_run
/// let mut change = CostChange::default(); // = 0
/// change += CostChange::reward(1); // = 1
/// change += CostChange::deduct(2); // = -1
/// assert_eq!(change.net_cost().0, 1);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct CostChange {
    deduct: u64,
    reward: u64,
}

impl CostChange {
    pub const fn deduct(value: u64) -> Self {
        Self {
            deduct: value,
            reward: 0,
        }
    }

    pub const fn reward(value: u64) -> Self {
        Self {
            deduct: 0,
            reward: value,
        }
    }

    /// (net deducted, net rewarded). At most one of them is non-zero.
    pub fn net_cost(&self) -> (u64, u64) {
        (
            self.deduct.saturating_sub(self.reward),
            self.reward.saturating_sub(self.deduct),
        )
    }

    /// Applies the net change to a starting amount of gas.
    pub fn apply_to(&self, gas: u64) -> u64 {
        let (deduct, reward) = self.net_cost();
        gas.saturating_sub(deduct).saturating_add(reward)
    }
}

impl AddAssign for CostChange {
    fn add_assign(&mut self, rhs: Self) {
        self.deduct = self.deduct.saturating_add(rhs.deduct);
        self.reward = self.reward.saturating_add(rhs.reward);
    }
}

impl Add for CostChange {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            deduct: self.deduct.saturating_add(other.deduct),
            reward: self.reward.saturating_add(other.reward),
        }
    }
}

#[test]
fn test_cost_change() {
    let mut change = CostChange::default(); // = 0
    change += CostChange::reward(1); // = 1
    change += CostChange::deduct(2); // = -1
    assert_eq!(change.net_cost(), (1, 0));
    assert_eq!(change.apply_to(10), 9);
    change = change + CostChange::reward(5); // = 4
    assert_eq!(change.net_cost(), (0, 4));
    assert_eq!(change.apply_to(10), 14);
}
