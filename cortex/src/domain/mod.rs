// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer for the Strata cortex
//!
//! Records, concepts, error taxonomy, the circuit breaker and the persistence
//! contracts both tiers are built on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and invariants with no I/O of their own

pub mod circuit_breaker;
pub mod concept;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod repository;

pub use circuit_breaker::*;
pub use concept::*;
pub use error::*;
pub use events::*;
pub use memory::*;
pub use repository::*;
