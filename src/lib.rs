/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! ParallelChain Async Engine orchestrates **asynchronous calls** between smart contracts: a contract
//! invokes another one and names a callback, and the engine resolves the call either within the
//! same transaction (same shard) or by suspending the caller until a later transaction brings
//! the answer back (cross-shard).
//!
//! ```text
//! A (shard 1) --call--> B (shard 1)              executed now, callback of A runs now
//! A (shard 1) --call--> C (shard 2)              transfer out, A saved in its storage
//! C (shard 2) --callback--> A (shard 1)          A loaded, callback runs, completion propagates
//! ```
//!
//! ### Example
//!
//! ```rust
//! // inside a host function of the contract instance running on `host`:
//! let call = AsyncCall::new(destination, data, value, gas_limit).with_callbacks("onOk", "onErr");
//! async_ctx.register_async_call(&mut host, "group", call)?;
//! // after the contract function returned:
//! async_ctx.execute(&mut host)?;
//! ```
//!
//! The engine does not run contract code. A host implements the collaborator traits in [host]
//! and drives the [execution] through its entry points. Gas needed by calls and callbacks is
//! [locked](gas) when calls are registered. Call data and the linkage between the halves of a
//! cross-shard call are written with the [codec]. Failures are reported as [error]s.

pub mod codec;

pub mod config;
pub use config::EngineConfig;

pub mod error;
pub use error::{AsyncError, ErrorKind};

pub mod execution;
pub use execution::AsyncContext;

pub mod gas;

pub mod host;

pub mod types;
