// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Strata Cortex
//!
//! Resilient two-tier agent memory: an episodic vector tier and a semantic
//! concept graph, guarded by circuit breakers and retry budgets, consolidated
//! in the background and broadcast live to connected clients.
//!
//! # Architecture
//!
//! - **Layer:** Learning & Memory Layer
//! - **Purpose:** Library behind the `strata` binary

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use application::*;
pub use domain::*;
pub use infrastructure::*;
