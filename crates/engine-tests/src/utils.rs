use engine_core::{host::QueryResult, testing::MemoryHost};
use model::{
    core::value::{Params, to_i64},
    execution::{errors::HostError, stats::QueryStats},
    records::row::WorkItem,
};
use serde_json::{Value, json};
use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

/// Streams `x` from 1 to `$n`.
pub const RANGE_READ: &str = "UNWIND range(1, $n) AS x RETURN x";

/// Creates one node per item of `$_batch`, or for `$x` in per-item mode.
pub const CREATE_WRITE: &str = "UNWIND $_batch AS row CREATE (:Node {x: row.x})";

/// Fails with a division by zero for any `x` divisible by 10.
pub const DIVIDING_WRITE: &str = "UNWIND $_batch AS row CREATE (:Node {y: 10 / (row.x % 10)})";

pub const COUNTDOWN_CONDITION: &str = "RETURN coalesce($previous, 3) - 1 AS loop";

/// Deletes up to 10 of the remaining nodes and returns how many it deleted.
pub const DELETE_CHUNK: &str = "MATCH (n:Node) WITH n LIMIT 10 DETACH DELETE n RETURN count(*)";

pub fn items(n: i64) -> Vec<WorkItem> {
    (1..=n).map(|x| WorkItem::from_pairs([("x", json!(x))])).collect()
}

/// The `x` values a write is bound to, in either execution mode.
pub fn bound_xs(params: &Params) -> Vec<i64> {
    match params.get("x") {
        Some(x) => to_i64(x).into_iter().collect(),
        None => params
            .get("_batch")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().filter_map(|row| to_i64(&row["x"])).collect())
            .unwrap_or_default(),
    }
}

pub fn created(count: usize) -> QueryResult {
    QueryResult::from_stats(QueryStats {
        nodes_created: count as u64,
        properties_set: count as u64,
        labels_added: count as u64,
        ..Default::default()
    })
}

/// Host with the range read and both writes registered.
pub fn seeded_host() -> MemoryHost {
    let host = MemoryHost::new();
    host.register_read(RANGE_READ, |params| {
        let n = params.get("n").and_then(to_i64).unwrap_or(0);
        Ok(items(n))
    });
    host.register_write(CREATE_WRITE, |params| Ok(created(bound_xs(params).len())));
    host.register_write(DIVIDING_WRITE, |params| {
        let xs = bound_xs(params);
        if xs.iter().any(|x| x % 10 == 0) {
            return Err(HostError::operation("/ by zero"));
        }
        Ok(created(xs.len()))
    });
    host.register_read(COUNTDOWN_CONDITION, |params| {
        let previous = params.get("previous").and_then(to_i64).unwrap_or(3);
        Ok(vec![WorkItem::from_pairs([("loop", json!(previous - 1))])])
    });
    host
}

/// Registers `DELETE_CHUNK` over a pool of `nodes` nodes.
pub fn register_delete_chunk(host: &MemoryHost, nodes: i64) -> Arc<AtomicI64> {
    let remaining = Arc::new(AtomicI64::new(nodes));
    let pool = Arc::clone(&remaining);
    host.register_write(DELETE_CHUNK, move |_| {
        let left = pool.load(Ordering::SeqCst);
        let deleted = left.min(10);
        pool.fetch_sub(deleted, Ordering::SeqCst);
        Ok(QueryResult::from_rows(vec![WorkItem::from_pairs([(
            "count(*)",
            json!(deleted),
        )])]))
    });
    remaining
}
