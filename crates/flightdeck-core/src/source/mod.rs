// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recording source - access to recordings on remote JVMs.

pub mod mock;
mod traits;

pub use mock::MockRecordingSource;
pub use traits::*;
