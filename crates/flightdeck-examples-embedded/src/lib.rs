// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Example application embedding flightdeck-core.
//!
//! The demo runs the full lifecycle against the in-memory mock recording
//! source, with recording rows in SQLite and archives in a local directory.
