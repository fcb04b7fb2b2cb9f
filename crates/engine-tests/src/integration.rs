#[cfg(test)]
mod tests {
    use crate::{
        config, engine, engine_with_guard,
        utils::{
            COUNTDOWN_CONDITION, CREATE_WRITE, DELETE_CHUNK, DIVIDING_WRITE, RANGE_READ, bound_xs,
            created, items, register_delete_chunk, seeded_host,
        },
    };
    use engine_core::{
        cancel::CancellationGuard,
        host::{GraphHost, QueryResult},
        testing::MemoryHost,
    };
    use engine_processing::{
        pump::{PumpOptions, StreamingPump},
        source::WorkSource,
    };
    use engine_runtime::EngineError;
    use futures::StreamExt;
    use model::{
        core::value::{Params, to_i64},
        execution::errors::HostError,
        records::row::WorkItem,
    };
    use serde_json::json;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };
    use tracing_test::traced_test;

    // Scenario: 100 items in batches of 10, every write succeeds.
    // Expected Outcome: ten committed batches and update statistics for every item.
    #[traced_test]
    #[tokio::test]
    async fn all_batches_commit() {
        let host = seeded_host();
        let summary = engine(&host)
            .iterate(
                RANGE_READ,
                CREATE_WRITE,
                &config(json!({"batchSize": 10, "params": {"n": 100}})),
            )
            .await
            .unwrap();

        assert_eq!(summary.batches, 10);
        assert_eq!(summary.total, 100);
        assert_eq!(summary.committed_operations, 100);
        assert_eq!(summary.failed_operations, 0);
        assert_eq!(summary.failed_batches, 0);
        assert_eq!(summary.retries, 0);
        assert!(!summary.was_terminated);
        assert!(summary.error_messages.is_empty());
        assert_eq!(summary.update_statistics.nodes_created, 100);
        assert_eq!(host.commits(), 10);

        let counts: Vec<i64> = host
            .applied()
            .iter()
            .filter_map(|p| to_i64(&p["_count"]))
            .collect();
        assert_eq!(counts, (0..10).map(|b| b * 10).collect::<Vec<_>>());
    }

    // Scenario: every 10th item makes the write divide by zero, so each batch fails once.
    // Expected Outcome: every batch fails and one error message is counted ten times.
    #[traced_test]
    #[tokio::test]
    async fn deterministic_failures_fail_every_batch() {
        let host = seeded_host();
        let summary = engine(&host)
            .iterate(
                RANGE_READ,
                DIVIDING_WRITE,
                &config(json!({"batchSize": 10, "params": {"n": 100}})),
            )
            .await
            .unwrap();

        assert_eq!(summary.batches, 10);
        assert_eq!(summary.failed_batches, 10);
        assert_eq!(summary.failed_operations, 100);
        assert_eq!(summary.committed_operations, 0);
        assert_eq!(summary.error_messages.len(), 1);
        assert_eq!(summary.error_messages["/ by zero"], 10);
        assert_eq!(summary.operation_error_messages["/ by zero"], 10);
        assert!(host.applied().is_empty());
        assert!(logs_contain("Error during iterate.commit"));
    }

    // Scenario: the loop condition starts at 3 and drops by one each evaluation.
    // Expected Outcome: two cycles, admitted by 2 and then 1.
    #[traced_test]
    #[tokio::test]
    async fn loop_runs_while_condition_is_positive() {
        let host = seeded_host();
        let cycles = engine(&host)
            .iterate_while(
                COUNTDOWN_CONDITION,
                RANGE_READ,
                CREATE_WRITE,
                &config(json!({"batchSize": 5, "params": {"n": 10}})),
            )
            .await
            .unwrap();

        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].loop_value, json!(2));
        assert_eq!(cycles[1].loop_value, json!(1));
        for cycle in &cycles {
            assert_eq!(cycle.summary.total, 10);
            assert_eq!(cycle.summary.committed_operations, 10);
        }

        let value = serde_json::to_value(&cycles[0]).unwrap();
        assert_eq!(value["loop"], json!(2));
        assert_eq!(value["committedOperations"], json!(10));
    }

    #[traced_test]
    #[tokio::test]
    async fn loop_condition_sees_previous_summary() {
        let host = seeded_host();
        let condition = "RETURN $previousSummary IS NULL";
        host.register_read(condition, |params| {
            let first = params["previousSummary"].is_null();
            Ok(vec![WorkItem::from_pairs([("first", json!(first))])])
        });

        let cycles = engine(&host)
            .iterate_while(
                condition,
                RANGE_READ,
                CREATE_WRITE,
                &config(json!({"params": {"n": 3}})),
            )
            .await
            .unwrap();

        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].loop_value, json!(true));
    }

    // Scenario: both the loop condition and the iterate operation are malformed.
    // Expected Outcome: one error listing both diagnostics, condition first, and nothing runs.
    #[traced_test]
    #[tokio::test]
    async fn malformed_operations_are_reported_together() {
        let host = seeded_host();
        host.register_invalid("RETURN $previous -", "Invalid input: expected an expression");
        host.register_invalid("MATCH (n RETURN n", "Invalid input: expected ')'");

        let err = engine(&host)
            .iterate_while(
                "RETURN $previous -",
                "MATCH (n RETURN n",
                CREATE_WRITE,
                &config(json!({})),
            )
            .await
            .unwrap_err();

        let EngineError::Validation(message) = err else {
            panic!("expected a validation error, got {err:?}");
        };
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Exception for field `loopCondition`, message: Invalid input: expected an expression",
                "Exception for field `iterate`, message: Invalid input: expected ')'",
            ]
        );
        assert_eq!(host.begins(), 0);
    }

    #[traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_run_respects_concurrency() {
        let host = seeded_host();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (current, max) = (Arc::clone(&in_flight), Arc::clone(&peak));
        host.register_write("CREATE (:Slow {x: row.x})", move |params| {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(created(bound_xs(params).len()))
        });

        let summary = engine(&host)
            .iterate(
                RANGE_READ,
                "CREATE (:Slow {x: row.x})",
                &config(json!({
                    "batchSize": 5,
                    "parallel": true,
                    "concurrency": 2,
                    "params": {"n": 100}
                })),
            )
            .await
            .unwrap();

        assert_eq!(summary.batches, 20);
        assert_eq!(summary.committed_operations, 100);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(host.applied().len(), 20);
    }

    #[traced_test]
    #[tokio::test]
    async fn retry_succeeds_on_second_attempt() {
        let host = seeded_host();
        let flaky = "CREATE (:Flaky {x: row.x})";
        host.register_write(flaky, |params| {
            let first_attempt = params["_retry"] == json!(0);
            if first_attempt && params["_count"] == json!(20) {
                return Err(HostError::operation("LockClient[12] can't wait on resource"));
            }
            Ok(created(bound_xs(params).len()))
        });

        let summary = engine(&host)
            .iterate(
                RANGE_READ,
                flaky,
                &config(json!({"batchSize": 10, "retries": 2, "params": {"n": 50}})),
            )
            .await
            .unwrap();

        assert_eq!(summary.retries, 1);
        assert_eq!(summary.committed_operations, 50);
        assert_eq!(summary.failed_batches, 0);
        assert!(summary.error_messages.is_empty());
        assert_eq!(
            summary.operation_error_messages["LockClient[12] can't wait on resource"],
            1
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn failed_params_keep_the_first_items() {
        let host = seeded_host();
        let summary = engine(&host)
            .iterate(
                RANGE_READ,
                DIVIDING_WRITE,
                &config(json!({"batchSize": 10, "failedParams": 2, "params": {"n": 20}})),
            )
            .await
            .unwrap();

        assert_eq!(summary.failed_params.len(), 2);
        let first = &summary.failed_params["0"];
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].get("x"), Some(&json!(1)));
        assert_eq!(summary.failed_params["1"][0].get("x"), Some(&json!(11)));
    }

    #[traced_test]
    #[tokio::test]
    async fn failed_params_are_off_by_default() {
        let host = seeded_host();
        let summary = engine(&host)
            .iterate(RANGE_READ, DIVIDING_WRITE, &config(json!({"params": {"n": 20}})))
            .await
            .unwrap();

        assert_eq!(summary.failed_batches, 1);
        assert!(summary.failed_params.is_empty());
    }

    // Scenario: per-item mode with the same failing items as the batch scenario.
    // Expected Outcome: only the failing items are lost; no batch is marked failed.
    #[traced_test]
    #[tokio::test]
    async fn per_item_mode_isolates_failures() {
        let host = seeded_host();
        let summary = engine(&host)
            .iterate(
                RANGE_READ,
                DIVIDING_WRITE,
                &config(json!({"batchSize": 10, "batchMode": "single", "params": {"n": 100}})),
            )
            .await
            .unwrap();

        assert_eq!(summary.committed_operations, 90);
        assert_eq!(summary.failed_operations, 10);
        assert_eq!(summary.failed_batches, 0);
        assert!(summary.error_messages.is_empty());
        assert_eq!(summary.operation_error_messages["/ by zero"], 10);
        assert_eq!(host.applied().len(), 90);
    }

    #[traced_test]
    #[tokio::test]
    async fn legacy_iterate_list_selects_per_item_mode() {
        let host = seeded_host();
        let summary = engine(&host)
            .iterate(
                RANGE_READ,
                CREATE_WRITE,
                &config(json!({"iterateList": false, "params": {"n": 7}})),
            )
            .await
            .unwrap();

        assert_eq!(summary.committed_operations, 7);
        assert_eq!(host.commits(), 7);
    }

    #[traced_test]
    #[tokio::test]
    async fn single_transaction_commits_once() {
        let host = seeded_host();
        let summary = engine(&host)
            .iterate(
                RANGE_READ,
                CREATE_WRITE,
                &config(json!({
                    "batchSize": 10,
                    "batchMode": "SINGLE_TRANSACTION",
                    "parallel": true,
                    "params": {"n": 30}
                })),
            )
            .await
            .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.committed_operations, 30);
        assert_eq!(summary.update_statistics.nodes_created, 30);
        assert_eq!((host.begins(), host.commits()), (1, 1));
        assert!(logs_contain("ignoring parallel=true"));
    }

    // Scenario: a single-transaction run whose sixth batch fails.
    // Expected Outcome: nothing is committed and every observed item is failed.
    #[traced_test]
    #[tokio::test]
    async fn single_transaction_rolls_back_everything() {
        let host = seeded_host();
        let picky = "CREATE (:Picky {x: row.x})";
        host.register_write(picky, |params| {
            if params["_count"] == json!(50) {
                return Err(HostError::operation("Node(55) already exists"));
            }
            Ok(created(bound_xs(params).len()))
        });

        let summary = engine(&host)
            .iterate(
                RANGE_READ,
                picky,
                &config(json!({
                    "batchSize": 10,
                    "batchMode": "SINGLE_TRANSACTION",
                    "params": {"n": 100}
                })),
            )
            .await
            .unwrap();

        assert_eq!(summary.committed_operations, 0);
        assert_eq!(summary.total, 60);
        assert_eq!(summary.failed_operations, 60);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.error_messages["Node(55) already exists"], 1);
        assert_eq!(host.commits(), 0);
        assert_eq!(host.rollbacks(), 1);
        assert!(host.applied().is_empty());
    }

    // Scenario: the guard trips while the fourth batch is being written.
    // Expected Outcome: the run stops early, reports termination, and never over-counts.
    #[traced_test]
    #[tokio::test]
    async fn cancellation_stops_the_run() {
        let host = seeded_host();
        let guard = CancellationGuard::new();
        let trip = guard.clone();
        let watched = "CREATE (:Watched {x: row.x})";
        host.register_write(watched, move |params| {
            if params["_count"] == json!(30) {
                trip.cancel();
            }
            Ok(created(bound_xs(params).len()))
        });

        let summary = engine_with_guard(&host, &guard)
            .iterate(
                RANGE_READ,
                watched,
                &config(json!({"batchSize": 10, "params": {"n": 1000}})),
            )
            .await
            .unwrap();

        assert!(summary.was_terminated);
        assert!(summary.total < 1000);
        assert!(summary.committed_operations + summary.failed_operations <= summary.total);
        assert_eq!(summary.committed_operations, 40);
    }

    #[traced_test]
    #[tokio::test]
    async fn cancelled_loop_runs_no_cycles() {
        let host = seeded_host();
        let guard = CancellationGuard::new();
        guard.cancel();

        let cycles = engine_with_guard(&host, &guard)
            .iterate_while(COUNTDOWN_CONDITION, RANGE_READ, CREATE_WRITE, &config(json!({})))
            .await
            .unwrap();

        assert!(cycles.is_empty());
        assert_eq!(host.begins(), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn unavailable_transactions_fail_the_call() {
        let host = seeded_host();
        host.fail_next_begins(1);

        let err = engine(&host)
            .iterate(
                RANGE_READ,
                CREATE_WRITE,
                &config(json!({"retries": 3, "params": {"n": 10}})),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Host(HostError::Unavailable(_))));
        assert!(err.to_string().contains("Transaction system unavailable"));
    }

    #[traced_test]
    #[tokio::test]
    async fn failing_read_fails_after_earlier_batches() {
        let host = seeded_host();
        let broken = "UNWIND range(1, 25) AS x RETURN 1 / (x - 25) AS x";
        host.register_stream(broken, |_| {
            let rows = (1..=24)
                .map(|x| Ok(WorkItem::from_pairs([("x", json!(x))])))
                .chain(std::iter::once(Err(HostError::operation("/ by zero"))));
            futures::stream::iter(rows).boxed()
        });

        let err = engine(&host)
            .iterate(broken, CREATE_WRITE, &config(json!({"batchSize": 10})))
            .await
            .unwrap_err();

        assert!(
            matches!(err, EngineError::Source(HostError::Operation(ref m)) if m == "/ by zero")
        );
        assert_eq!(host.commits(), 2);
    }

    #[traced_test]
    #[tokio::test]
    async fn rundown_repeats_until_nothing_changes() {
        let host = MemoryHost::new();
        let remaining = register_delete_chunk(&host, 35);

        let summary = engine(&host)
            .rundown(DELETE_CHUNK, Params::new())
            .await
            .unwrap();

        // The final zero-update run is a batch but not an execution.
        assert_eq!(summary.updates, 35);
        assert_eq!(summary.executions, 4);
        assert_eq!(summary.batches, 5);
        assert_eq!(summary.failed_batches, 0);
        assert!(!summary.was_terminated);
        assert_eq!(remaining.load(Ordering::SeqCst), 0);

        let applied = host.applied();
        assert_eq!(applied[1]["_count"], json!(10));
        assert_eq!(applied[4]["_total"], json!(35));
    }

    #[traced_test]
    #[tokio::test]
    async fn rundown_stops_on_commit_failure() {
        let host = MemoryHost::new();
        register_delete_chunk(&host, 100);
        host.fail_next_commits(1);

        let summary = engine(&host)
            .rundown(DELETE_CHUNK, Params::new())
            .await
            .unwrap();

        assert_eq!(summary.executions, 0);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.updates, 0);
        assert_eq!(summary.failed_commits, 1);
        assert_eq!(summary.commit_errors["Transaction commit failed"], 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn rundown_validates_the_statement() {
        let host = MemoryHost::new();
        let err = engine(&host)
            .rundown("MATCH (n) DELETE", Params::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Validation(ref m)
            if m.starts_with("Exception for field `statement`")));
    }

    #[traced_test]
    #[tokio::test]
    async fn rundown_requires_a_limit() {
        let host = MemoryHost::new();
        let unbounded = "MATCH (n:Node) DETACH DELETE n RETURN count(*)";
        host.register_write(unbounded, |_| Ok(QueryResult::default()));

        let err = engine(&host)
            .rundown(unbounded, Params::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Validation(ref m) if m.contains("`limit`")));
        assert_eq!(host.begins(), 0);
    }

    // Scenario: the guard trips while the first rundown execution is running.
    // Expected Outcome: that execution still commits and the result reports termination.
    #[traced_test]
    #[tokio::test]
    async fn rundown_reports_cancellation_during_an_execution() {
        let host = MemoryHost::new();
        let guard = CancellationGuard::new();
        let trip = guard.clone();
        let chunk = "MATCH (n:Node) WITH n LIMIT 10 DELETE n RETURN count(*)";
        host.register_write(chunk, move |_| {
            trip.cancel();
            Ok(QueryResult::from_rows(vec![WorkItem::from_pairs([("count(*)", json!(10))])]))
        });

        let summary = engine_with_guard(&host, &guard)
            .rundown(chunk, Params::new())
            .await
            .unwrap();

        assert!(summary.was_terminated);
        assert_eq!(summary.executions, 1);
        assert_eq!(summary.updates, 10);
        assert_eq!(host.commits(), 1);
    }

    // Items shaped like an end marker still flow through as data.
    #[traced_test]
    #[tokio::test]
    async fn end_marker_lookalikes_are_plain_items() {
        let lookalikes = vec![
            WorkItem::default(),
            WorkItem::from_pairs([("end", json!(true))]),
            WorkItem::from_pairs([("__end__", json!(null))]),
        ];
        let host = MemoryHost::new();
        host.register_rows("RETURN markers", lookalikes.clone());

        let reader = host.clone();
        let pump = StreamingPump::open(
            PumpOptions::default(),
            CancellationGuard::new(),
            move |tx| async move {
                let mut rows = reader.read("RETURN markers", &Params::new()).await?;
                while let Some(row) = rows.next().await {
                    if tx.emit(row?).await.is_err() {
                        break;
                    }
                }
                Ok(())
            },
        );
        let seen: Vec<WorkItem> = pump
            .into_stream()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(seen, lookalikes);

        let mut source = WorkSource::materialized(items(3));
        assert_eq!(source.take(10).await.unwrap().len(), 3);
        assert!(source.take(10).await.unwrap().is_empty());
    }
}
