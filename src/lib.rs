// Copyright 2026 Taxprobe Contributors
// SPDX-License-Identifier: Apache-2.0

//! Taxprobe library — property-tax extraction engine for county portals.
//!
//! This library crate exposes the core modules for integration testing.

#![allow(clippy::new_without_default)]

pub mod classify;
pub mod cli;
pub mod driver;
pub mod events;
pub mod extract;
pub mod model;
pub mod orchestrator;
pub mod sink;
pub mod strategy;
