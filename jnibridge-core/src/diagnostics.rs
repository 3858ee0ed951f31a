//! Payloads of the cached cross-runtime diagnostic calls
//!
//! Requests and responses cross the boundary as JSON inside the runtime's
//! byte-array representation (`([B)[B` and `()[B` entry points).

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetricsRequest {}

/// One JVM memory pool (or the heap/non-heap aggregates)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryPool {
    pub name: String,
    pub committed: i64,
    pub init: i64,
    pub max: i64,
    pub used: i64,
    pub peak_committed: i64,
    pub peak_init: i64,
    pub peak_max: i64,
    pub peak_used: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetricsResponse {
    pub memory_pools: Vec<MemoryPool>,
    pub gc_num_collections: i64,
    pub gc_total_time_ms: i64,
    /// Pauses reported by the pause monitor above its info threshold
    pub gc_num_info_threshold_exceeded: i64,
    pub gc_num_warn_threshold_exceeded: i64,
    pub gc_total_extra_sleep_time_millis: i64,
}

impl MemoryMetricsResponse {
    pub fn pool(&self, name: &str) -> Option<&MemoryPool> {
        self.memory_pools.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadsInfoRequest {
    /// Include per-thread stacks and timings, not just the counts
    pub get_complete_info: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub summary: String,
    pub cpu_time_in_ns: i64,
    pub user_time_in_ns: i64,
    pub blocked_count: i64,
    pub blocked_time_in_ms: i64,
    pub is_in_native: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadsInfoResponse {
    pub total_thread_count: i32,
    pub daemon_thread_count: i32,
    pub peak_thread_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<Vec<ThreadInfo>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JmxJsonResponse {
    /// JMX beans rendered as a JSON document
    pub jmx_json: String,
}

impl JmxJsonResponse {
    pub fn parsed(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.jmx_json)?)
    }
}
