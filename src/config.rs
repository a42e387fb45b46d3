/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Engine configuration. Every field has a default, so a host may deserialize a partial document.

use serde::{Deserialize, Serialize};

/// Storage key segment under which async context records are kept.
pub const ASYNC_DATA_PREFIX: &[u8] = b"AsyncData";

/// Storage key segment under which the results of a child call are kept.
pub const ASYNC_RESULTS_PREFIX: &[u8] = b"AsyncResults";

pub const DEFAULT_PROTECTED_PREFIX: &[u8] = b"PCHAIN@";

pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix of the storage keys which contracts cannot write to.
    pub protected_prefix: Vec<u8>,
    /// Upper bound on nested executions started while executing async calls.
    pub max_nesting_depth: usize,
    /// Whether contracts may set a callback on their own context.
    pub context_callback_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protected_prefix: DEFAULT_PROTECTED_PREFIX.to_vec(),
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            context_callback_enabled: false,
        }
    }
}

impl EngineConfig {
    /// Storage key of the async context identified by `call_id`.
    pub fn async_data_key(&self, call_id: &[u8]) -> Vec<u8> {
        [self.protected_prefix.as_slice(), ASYNC_DATA_PREFIX, call_id].concat()
    }

    /// Storage key of the child results recorded by the async context identified by `call_id`.
    pub fn async_results_key(&self, call_id: &[u8]) -> Vec<u8> {
        [self.protected_prefix.as_slice(), ASYNC_RESULTS_PREFIX, call_id].concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "context_callback_enabled": true }"#).unwrap();
        assert!(config.context_callback_enabled);
        assert_eq!(config.max_nesting_depth, DEFAULT_MAX_NESTING_DEPTH);
        assert_eq!(config.protected_prefix, DEFAULT_PROTECTED_PREFIX.to_vec());
    }

    #[test]
    fn test_storage_keys() {
        let config = EngineConfig::default();
        assert_eq!(config.async_data_key(&[1, 2]), b"PCHAIN@AsyncData\x01\x02".to_vec());
        assert_ne!(config.async_data_key(&[1]), config.async_results_key(&[1]));
    }
}
