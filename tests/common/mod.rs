#[cfg(test)]
#[allow(dead_code)]
pub mod test_data;
pub use test_data::*;

#[cfg(test)]
#[allow(dead_code)]
pub mod simulate_chain;
pub use simulate_chain::*;
