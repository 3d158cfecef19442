//! Integration tests for batch execution: ordering, error continuation,
//! bounded parallelism, timeouts and the execution log.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::{Behavior, Counters, MockCommand};
use easel_commands::{
    BatchError, BatchExecutor, BatchOptions, BatchRequest, CommandRegistry, CommandResult,
    ExecutionLog, SkipReason,
};

fn register(registry: &CommandRegistry, command: MockCommand) -> Arc<Counters> {
    let (command, counters) = command.build();
    registry.register(command).unwrap();
    counters
}

fn statuses(report: &easel_commands::BatchReport) -> Vec<&'static str> {
    report.results.iter().map(|r| r.result.status()).collect()
}

fn skipped(report: &easel_commands::BatchReport) -> Vec<(usize, SkipReason)> {
    report
        .not_executed
        .iter()
        .map(|s| (s.index, s.reason))
        .collect()
}

// =============================================================================
// Sequential
// =============================================================================

#[tokio::test]
async fn test_sequential_stops_after_first_failure() {
    let registry = Arc::new(CommandRegistry::new());
    register(&registry, MockCommand::succeed("resize"));
    register(&registry, MockCommand::new("sharpen", Behavior::Fail));
    let export = register(&registry, MockCommand::succeed("export"));

    let requests = vec![
        BatchRequest::new("resize"),
        BatchRequest::new("sharpen"),
        BatchRequest::new("export"),
    ];
    let report = BatchExecutor::new(registry)
        .run(&requests, &BatchOptions::sequential())
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(statuses(&report), vec!["success", "failure"]);
    assert_eq!(skipped(&report), vec![(2, SkipReason::Halted)]);
    assert!(report.halted);
    assert_eq!(export.execute(), 0);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_sequential_continue_on_error() {
    let registry = Arc::new(CommandRegistry::new());
    register(&registry, MockCommand::succeed("resize"));
    register(&registry, MockCommand::new("sharpen", Behavior::Panic));
    register(&registry, MockCommand::succeed("export"));

    let requests = vec![
        BatchRequest::new("resize"),
        BatchRequest::new("sharpen"),
        BatchRequest::new("export"),
    ];
    let report = BatchExecutor::new(registry)
        .run(
            &requests,
            &BatchOptions::sequential().with_continue_on_error(true),
        )
        .await
        .unwrap();

    assert_eq!(statuses(&report), vec!["success", "failure", "success"]);
    assert!(report.not_executed.is_empty());
    assert!(!report.halted);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
}

#[tokio::test]
async fn test_per_request_override() {
    let registry = Arc::new(CommandRegistry::new());
    register(&registry, MockCommand::new("optional", Behavior::Fail));
    register(&registry, MockCommand::new("required", Behavior::Fail));
    register(&registry, MockCommand::succeed("export"));

    let requests = vec![
        BatchRequest::new("optional").continue_on_error(true),
        BatchRequest::new("required"),
        BatchRequest::new("export"),
    ];
    let report = BatchExecutor::new(registry.clone())
        .run(&requests, &BatchOptions::sequential())
        .await
        .unwrap();
    assert_eq!(statuses(&report), vec!["failure", "failure"]);
    assert_eq!(skipped(&report), vec![(2, SkipReason::Halted)]);

    // The override also works the other way round
    let requests = vec![
        BatchRequest::new("required").continue_on_error(false),
        BatchRequest::new("export"),
    ];
    let report = BatchExecutor::new(registry)
        .run(
            &requests,
            &BatchOptions::sequential().with_continue_on_error(true),
        )
        .await
        .unwrap();
    assert_eq!(statuses(&report), vec!["failure"]);
    assert_eq!(skipped(&report), vec![(1, SkipReason::Halted)]);
}

#[tokio::test]
async fn test_validation_prevents_side_effects() {
    let registry = Arc::new(CommandRegistry::new());
    let resize = register(&registry, MockCommand::succeed("resize"));

    let requests = vec![BatchRequest::new("resize"), BatchRequest::new("missing")];
    let err = BatchExecutor::new(registry)
        .run(&requests, &BatchOptions::sequential())
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::UnknownCommand { index: 1, .. }));
    assert_eq!(resize.execute(), 0);
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test]
async fn test_request_timeout_does_not_hang() {
    let registry = Arc::new(CommandRegistry::new());
    register(
        &registry,
        MockCommand::new("stubborn", Behavior::IgnoreCancel(Duration::from_secs(5))),
    );

    let requests = vec![BatchRequest::new("stubborn").with_timeout(Duration::from_millis(100))];
    let started = Instant::now();
    let report = BatchExecutor::new(registry)
        .run(&requests, &BatchOptions::sequential())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        report.results[0].result,
        CommandResult::TimedOut {
            after: Duration::from_millis(100)
        }
    );
}

#[tokio::test]
async fn test_default_timeout_applies() {
    let registry = Arc::new(CommandRegistry::new());
    register(
        &registry,
        MockCommand::new("slow", Behavior::Sleep(Duration::from_secs(5))),
    );
    register(&registry, MockCommand::succeed("fast"));

    let requests = vec![BatchRequest::new("slow"), BatchRequest::new("fast")];
    let options = BatchOptions::sequential()
        .with_default_timeout(Duration::from_millis(50))
        .with_continue_on_error(true);
    let report = BatchExecutor::new(registry)
        .run(&requests, &options)
        .await
        .unwrap();

    assert_eq!(statuses(&report), vec!["timed_out", "success"]);
}

#[tokio::test]
async fn test_global_timeout_cancels_running_and_skips_rest() {
    let registry = Arc::new(CommandRegistry::new());
    register(
        &registry,
        MockCommand::new("short", Behavior::Sleep(Duration::from_millis(20))),
    );
    register(
        &registry,
        MockCommand::new("long", Behavior::Sleep(Duration::from_secs(5))),
    );
    let last = register(&registry, MockCommand::succeed("last"));

    let requests = vec![
        BatchRequest::new("short"),
        BatchRequest::new("long"),
        BatchRequest::new("last"),
    ];
    let options = BatchOptions::sequential()
        .with_continue_on_error(true)
        .with_global_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let report = BatchExecutor::new(registry)
        .run(&requests, &options)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(report.timed_out);
    assert_eq!(statuses(&report), vec!["success", "cancelled"]);
    assert_eq!(skipped(&report), vec![(2, SkipReason::GlobalTimeout)]);
    assert_eq!(last.execute(), 0);
    assert_eq!(report.exit_code(), 124);
}

#[tokio::test]
async fn test_caller_cancellation() {
    let registry = Arc::new(CommandRegistry::new());
    register(
        &registry,
        MockCommand::new("long", Behavior::Sleep(Duration::from_secs(5))),
    );
    register(&registry, MockCommand::succeed("next"));

    let requests = vec![BatchRequest::new("long"), BatchRequest::new("next")];
    let token = CancellationToken::new();
    let executor = BatchExecutor::new(registry);
    let options = BatchOptions::sequential().with_continue_on_error(true);

    let (report, _) = tokio::join!(
        executor.run_with_cancel(&requests, &options, token.clone()),
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        }
    );
    let report = report.unwrap();

    assert!(report.cancelled);
    assert!(!report.timed_out);
    assert_eq!(statuses(&report), vec!["cancelled"]);
    assert_eq!(skipped(&report), vec![(1, SkipReason::Cancelled)]);
    assert_eq!(report.exit_code(), 130);
}

// =============================================================================
// Parallel
// =============================================================================

#[tokio::test]
async fn test_parallel_results_keep_request_order() {
    let registry = Arc::new(CommandRegistry::new());
    let delays = [80u64, 10, 50, 0, 30, 5];
    for (i, delay) in delays.iter().enumerate() {
        register(
            &registry,
            MockCommand::new(
                &format!("step-{i}"),
                Behavior::Sleep(Duration::from_millis(*delay)),
            ),
        );
    }

    let requests: Vec<_> = (0..delays.len())
        .map(|i| BatchRequest::new(format!("step-{i}")))
        .collect();
    let report = BatchExecutor::new(registry)
        .run(&requests, &BatchOptions::parallel(3))
        .await
        .unwrap();

    let order: Vec<_> = report.results.iter().map(|r| r.index).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    let ids: Vec<_> = report
        .results
        .iter()
        .map(|r| r.command_id.as_str())
        .collect();
    assert_eq!(
        ids,
        vec!["step-0", "step-1", "step-2", "step-3", "step-4", "step-5"]
    );
    assert!(report.is_success());
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let registry = Arc::new(CommandRegistry::new());
    let counters = register(
        &registry,
        MockCommand::new("tile", Behavior::Sleep(Duration::from_millis(30))).reentrant(),
    );

    let requests: Vec<_> = (0..9).map(|_| BatchRequest::new("tile")).collect();
    let report = BatchExecutor::new(registry)
        .run(&requests, &BatchOptions::parallel(3))
        .await
        .unwrap();

    assert_eq!(report.results.len(), 9);
    assert!(report.is_success());
    assert!(counters.max_active() <= 3);
    assert!(counters.max_active() >= 2);
}

#[tokio::test]
async fn test_parallel_failure_stops_new_dispatch() {
    let registry = Arc::new(CommandRegistry::new());
    register(&registry, MockCommand::new("broken", Behavior::Fail));
    register(
        &registry,
        MockCommand::new("slow", Behavior::Sleep(Duration::from_millis(200))),
    );
    let rest: Vec<_> = (0..3)
        .map(|i| register(&registry, MockCommand::succeed(&format!("rest-{i}"))))
        .collect();

    let requests = vec![
        BatchRequest::new("broken"),
        BatchRequest::new("slow"),
        BatchRequest::new("rest-0"),
        BatchRequest::new("rest-1"),
        BatchRequest::new("rest-2"),
    ];
    let report = BatchExecutor::new(registry)
        .run(&requests, &BatchOptions::parallel(2))
        .await
        .unwrap();

    // The sibling that had already started drains to completion
    assert_eq!(statuses(&report), vec!["failure", "success"]);
    assert_eq!(
        skipped(&report),
        vec![
            (2, SkipReason::Halted),
            (3, SkipReason::Halted),
            (4, SkipReason::Halted),
        ]
    );
    assert!(report.halted);
    assert!(rest.iter().all(|c| c.execute() == 0));
}

#[tokio::test]
async fn test_parallel_continue_on_error_runs_everything() {
    let registry = Arc::new(CommandRegistry::new());
    register(&registry, MockCommand::new("broken", Behavior::Fail));
    for i in 0..4 {
        register(&registry, MockCommand::succeed(&format!("ok-{i}")));
    }

    let mut requests = vec![BatchRequest::new("broken")];
    requests.extend((0..4).map(|i| BatchRequest::new(format!("ok-{i}"))));

    let report = BatchExecutor::new(registry)
        .run(
            &requests,
            &BatchOptions::parallel(2).with_continue_on_error(true),
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 5);
    assert_eq!(report.total(), requests.len());
    assert_eq!(report.failed(), 1);
    assert!(!report.halted);
}

#[tokio::test]
async fn test_parallel_global_timeout() {
    let registry = Arc::new(CommandRegistry::new());
    let counters = register(
        &registry,
        MockCommand::new("long", Behavior::Sleep(Duration::from_secs(5))).reentrant(),
    );

    let requests: Vec<_> = (0..4).map(|_| BatchRequest::new("long")).collect();
    let options = BatchOptions::parallel(2)
        .with_continue_on_error(true)
        .with_global_timeout(Duration::from_millis(100));

    let report = BatchExecutor::new(registry)
        .run(&requests, &options)
        .await
        .unwrap();

    assert!(report.timed_out);
    assert_eq!(statuses(&report), vec!["cancelled", "cancelled"]);
    assert_eq!(
        skipped(&report),
        vec![(2, SkipReason::GlobalTimeout), (3, SkipReason::GlobalTimeout)]
    );
    assert_eq!(counters.cleanup(), 2);
}

#[tokio::test]
async fn test_oversized_parallelism_is_clamped() {
    let registry = Arc::new(CommandRegistry::new());
    register(&registry, MockCommand::succeed("resize"));
    register(&registry, MockCommand::succeed("export"));

    let options: BatchOptions =
        serde_json::from_str(r#"{"max_parallelism": 18446744073709551615}"#).unwrap();
    assert_eq!(options.max_parallelism, usize::MAX);

    let requests = vec![BatchRequest::new("resize"), BatchRequest::new("export")];
    let executor = BatchExecutor::new(registry);

    let report = executor.run(&requests, &options).await.unwrap();
    assert_eq!(statuses(&report), vec!["success", "success"]);

    let report = executor
        .run(&requests[..1], &BatchOptions::parallel(usize::MAX))
        .await
        .unwrap();
    assert!(report.is_success());
}

// =============================================================================
// Execution log
// =============================================================================

#[tokio::test]
async fn test_execution_log_is_persisted() {
    let registry = Arc::new(CommandRegistry::new());
    register(&registry, MockCommand::succeed("resize"));
    register(&registry, MockCommand::new("sharpen", Behavior::Fail));
    register(&registry, MockCommand::succeed("export"));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs").join("batch-log.json");

    let requests = vec![
        BatchRequest::new("resize").describe("shrink to 50%"),
        BatchRequest::new("sharpen"),
        BatchRequest::new("export"),
    ];
    let options = BatchOptions::sequential().with_log(Some(path.clone()));
    let report = BatchExecutor::new(registry)
        .run(&requests, &options)
        .await
        .unwrap();

    assert_eq!(report.log_path.as_deref(), Some(path.as_path()));
    let log = ExecutionLog::read_from(&path).await.unwrap();
    assert_eq!(log.batch_id, report.batch_id);

    let statuses: Vec<_> = log.entries.iter().map(|e| e.status.as_str()).collect();
    assert_eq!(statuses, vec!["success", "failure", "not_executed"]);
    assert_eq!(
        log.entries[0].request.description.as_deref(),
        Some("shrink to 50%")
    );
    assert_eq!(log.entries[2].skip_reason, Some(SkipReason::Halted));

    // No temporary files are left next to the log
    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_log_captured_in_memory_only() {
    let registry = Arc::new(CommandRegistry::new());
    register(&registry, MockCommand::succeed("resize"));

    let report = BatchExecutor::new(registry)
        .run(
            &[BatchRequest::new("resize")],
            &BatchOptions::sequential().with_log(None),
        )
        .await
        .unwrap();

    assert!(report.log_path.is_none());
    assert_eq!(report.log.unwrap().entries.len(), 1);
}
