// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server mode
//!
//! Handles:
//! - Wiring the memory node from configuration
//! - Background workers (consolidation, delta polling)
//! - Graceful shutdown

pub mod server;

pub use server::{build_memory, start_server};
