/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Named groups of async calls, and the ordered collection of groups held by a context.
//!
//! Deleting a call or a group moves the last element into the freed slot. The order of calls
//! and groups is therefore the registration order only until the first deletion.

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};

use super::call::AsyncCall;
use crate::{error::AsyncError, types::CallId};

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AsyncCallGroup {
    pub identifier: String,
    /// Invoked once every call of the group completed.
    pub callback: String,
    pub gas_locked: u64,
    pub callback_data: Vec<u8>,
    pub calls: Vec<AsyncCall>,
}

impl AsyncCallGroup {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            ..Default::default()
        }
    }

    pub fn add_async_call(&mut self, call: AsyncCall) {
        self.calls.push(call);
    }

    pub fn has_pending_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn has_callback(&self) -> bool {
        !self.callback.is_empty()
    }

    pub fn find_by_destination(&self, destination: &[u8; 32]) -> Option<usize> {
        self.calls
            .iter()
            .position(|call| &call.destination == destination)
    }

    pub fn find_by_call_id(&self, call_id: &CallId) -> Option<usize> {
        self.calls
            .iter()
            .position(|call| call.call_id.as_ref() == Some(call_id))
    }

    /// Removes the call at `index`, moving the last call into its place.
    pub fn delete_async_call(&mut self, index: usize) -> Option<AsyncCall> {
        (index < self.calls.len()).then(|| self.calls.swap_remove(index))
    }

    /// Drops every call which is no longer pending.
    pub fn delete_completed_async_calls(&mut self) {
        self.calls
            .retain(|call| call.status == super::AsyncCallStatus::Pending);
    }
}

/// Position of a call inside [CallGroups].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallLocation {
    pub group: usize,
    pub call: usize,
}

/// Groups in insertion order, indexed by identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallGroups {
    groups: Vec<AsyncCallGroup>,
    index: HashMap<String, usize>,
}

impl From<Vec<AsyncCallGroup>> for CallGroups {
    fn from(groups: Vec<AsyncCallGroup>) -> Self {
        let index = groups
            .iter()
            .enumerate()
            .map(|(position, group)| (group.identifier.clone(), position))
            .collect();
        Self { groups, index }
    }
}

impl CallGroups {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AsyncCallGroup> {
        self.groups.iter()
    }

    pub fn as_slice(&self) -> &[AsyncCallGroup] {
        &self.groups
    }

    pub fn get(&self, identifier: &str) -> Option<&AsyncCallGroup> {
        self.index.get(identifier).map(|position| &self.groups[*position])
    }

    pub fn get_mut(&mut self, identifier: &str) -> Option<&mut AsyncCallGroup> {
        let position = *self.index.get(identifier)?;
        self.groups.get_mut(position)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    pub fn insert(&mut self, group: AsyncCallGroup) -> Result<(), AsyncError> {
        if self.contains(&group.identifier) {
            return Err(AsyncError::AsyncCallGroupExistsAlready(group.identifier));
        }
        self.index.insert(group.identifier.clone(), self.groups.len());
        self.groups.push(group);
        Ok(())
    }

    /// Returns the group with `identifier`, creating it if missing.
    pub fn get_or_insert(&mut self, identifier: &str) -> &mut AsyncCallGroup {
        let position = match self.index.get(identifier) {
            Some(position) => *position,
            None => {
                self.index.insert(identifier.to_string(), self.groups.len());
                self.groups.push(AsyncCallGroup::new(identifier));
                self.groups.len() - 1
            }
        };
        &mut self.groups[position]
    }

    /// Removes the group with `identifier`, moving the last group into its place.
    pub fn remove(&mut self, identifier: &str) -> Option<AsyncCallGroup> {
        let position = self.index.remove(identifier)?;
        let removed = self.groups.swap_remove(position);
        if let Some(moved) = self.groups.get(position) {
            self.index.insert(moved.identifier.clone(), position);
        }
        Some(removed)
    }

    pub fn locate(&self, call_id: &CallId) -> Option<CallLocation> {
        self.groups.iter().enumerate().find_map(|(group, calls)| {
            calls
                .find_by_call_id(call_id)
                .map(|call| CallLocation { group, call })
        })
    }

    /// First call satisfying `predicate`, in group order.
    pub fn find(&self, predicate: impl Fn(&AsyncCall) -> bool) -> Option<CallLocation> {
        self.groups.iter().enumerate().find_map(|(group, calls)| {
            calls
                .calls
                .iter()
                .position(&predicate)
                .map(|call| CallLocation { group, call })
        })
    }

    pub fn call(&self, location: CallLocation) -> Option<&AsyncCall> {
        self.groups.get(location.group)?.calls.get(location.call)
    }

    pub fn call_mut(&mut self, location: CallLocation) -> Option<&mut AsyncCall> {
        self.groups.get_mut(location.group)?.calls.get_mut(location.call)
    }

    pub fn group_identifier(&self, location: CallLocation) -> Option<&str> {
        self.groups
            .get(location.group)
            .map(|group| group.identifier.as_str())
    }

    /// Deletes the call at `location`, and its group if it becomes empty.
    pub fn delete_call(&mut self, location: CallLocation) -> Option<AsyncCall> {
        let group = self.groups.get_mut(location.group)?;
        let removed = group.delete_async_call(location.call)?;
        if group.is_complete() {
            let identifier = group.identifier.clone();
            self.remove(&identifier);
        }
        Some(removed)
    }

    pub fn into_vec(self) -> Vec<AsyncCallGroup> {
        self.groups
    }
}
