#![allow(dead_code)]

use engine_core::{cancel::CancellationGuard, testing::MemoryHost};
use engine_runtime::BatchEngine;
use serde_json::{Map, Value};
use std::sync::Arc;

pub mod integration;
pub mod utils;

/// Engine over an in-memory host with a fresh guard.
pub fn engine(host: &MemoryHost) -> BatchEngine {
    BatchEngine::new(Arc::new(host.clone()), CancellationGuard::new())
}

pub fn engine_with_guard(host: &MemoryHost, guard: &CancellationGuard) -> BatchEngine {
    BatchEngine::new(Arc::new(host.clone()), guard.clone())
}

/// Raw configuration map from a JSON literal.
pub fn config(raw: Value) -> Map<String, Value> {
    raw.as_object().cloned().unwrap_or_default()
}
