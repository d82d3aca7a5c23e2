// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-target recording option overrides.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::model::{RecordingOptions, RecordingOptionsOverrides};

/// Overrides keyed by target id. Entries live until the target is lost.
#[derive(Debug, Default)]
pub struct OptionsCustomizer {
    overrides: RwLock<HashMap<i64, RecordingOptionsOverrides>>,
}

impl OptionsCustomizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, target_id: i64, overrides: RecordingOptionsOverrides) {
        let mut map = self.overrides.write().unwrap_or_else(|p| p.into_inner());
        map.insert(target_id, overrides);
    }

    pub fn get(&self, target_id: i64) -> Option<RecordingOptionsOverrides> {
        let map = self.overrides.read().unwrap_or_else(|p| p.into_inner());
        map.get(&target_id).copied()
    }

    /// Drop a target's overrides. Returns whether any were set.
    pub fn evict(&self, target_id: i64) -> bool {
        let mut map = self.overrides.write().unwrap_or_else(|p| p.into_inner());
        map.remove(&target_id).is_some()
    }

    /// Apply the target's overrides, if any, to `options`.
    pub fn apply(&self, target_id: i64, options: RecordingOptions) -> RecordingOptions {
        match self.get(target_id) {
            Some(overrides) => overrides.apply(options),
            None => options,
        }
    }

    pub fn len(&self) -> usize {
        self.overrides.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
