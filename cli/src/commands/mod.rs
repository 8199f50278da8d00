// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Strata CLI

pub mod config;
pub mod consolidate;

pub use self::config::ConfigCommand;
pub use self::consolidate::ConsolidateArgs;
