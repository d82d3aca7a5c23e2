// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replace policy for same-named recordings.

use serde::{Deserialize, Serialize};

use crate::model::RecordingState;

/// What to do when a start request names a recording that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingReplace {
    /// Always remove the existing recording and start a new one.
    Always,
    /// Never touch an existing recording.
    #[default]
    Never,
    /// Replace only a stopped recording.
    Stopped,
}

/// Outcome of applying a [`RecordingReplace`] policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceDecision {
    /// Nothing to replace; start directly.
    Create,
    /// Remove the existing recording first.
    RemoveThenCreate,
    /// Reject the start.
    Conflict,
}

impl RecordingReplace {
    /// Decide given the (mapped) state of an existing same-named recording,
    /// or `None` when there is none.
    pub fn decide(self, existing: Option<RecordingState>) -> ReplaceDecision {
        let Some(state) = existing else {
            return ReplaceDecision::Create;
        };
        match self {
            RecordingReplace::Always => ReplaceDecision::RemoveThenCreate,
            RecordingReplace::Never => ReplaceDecision::Conflict,
            RecordingReplace::Stopped if state == RecordingState::Stopped => {
                ReplaceDecision::RemoveThenCreate
            }
            RecordingReplace::Stopped => ReplaceDecision::Conflict,
        }
    }
}

impl std::fmt::Display for RecordingReplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingReplace::Always => write!(f, "ALWAYS"),
            RecordingReplace::Never => write!(f, "NEVER"),
            RecordingReplace::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl std::str::FromStr for RecordingReplace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALWAYS" => Ok(RecordingReplace::Always),
            "NEVER" => Ok(RecordingReplace::Never),
            "STOPPED" => Ok(RecordingReplace::Stopped),
            _ => Err(format!("Unknown replace policy: {}", s)),
        }
    }
}
