// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Backend Module
//!
//! Capability providers, their instances and instance selection.

mod instance;
mod pool;

pub use instance::{BackendInstance, InstanceLease};
pub use pool::{BackendPool, HealthStatus, PoolError};
