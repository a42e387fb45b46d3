/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implementation of the async call engine.
//!
//! A contract [registers](register) [async calls](call) in named [groups](group). Once its
//! function returns, the [AsyncContext] [executes](execute) them: local calls run as nested
//! executions followed by their [callbacks](callback), remote calls leave as cross-shard
//! transfers. A context still waiting for remote children is [persisted](persistence) in the
//! storage of its contract, and [completion](composability) of its last child propagates up
//! the call tree. The host drives all of it through the [entry] points.

pub mod call;
pub use call::*;

pub mod callback;

pub mod composability;
pub use composability::*;

pub mod context;
pub use context::*;

pub mod entry;
pub use entry::*;

pub mod execute;

pub mod group;
pub use group::*;

pub mod persistence;

pub mod register;

pub mod state;
pub use state::{AsyncState, ChildResults};
