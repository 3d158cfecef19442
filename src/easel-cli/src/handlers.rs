//! Subcommand implementations. Each returns the process exit code.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use easel_commands::invocation::{EXIT_SUCCESS, EXIT_USAGE};
use easel_commands::{
    BatchError, BatchFile, BatchReport, CommandCategory, CommandHandle, CommandResult,
    InvokeOptions,
};

use crate::cli::{BatchArgs, ListArgs, RunArgs, StatsArgs};
use crate::host::Host;

pub async fn run(host: &Host, args: RunArgs, cancel: CancellationToken) -> Result<i32> {
    let mut options = InvokeOptions::default().with_cancel(cancel);
    if let Some(ms) = args.timeout_ms.or(host.config.cli.invocation_timeout_ms) {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let outcome = host
        .invoker
        .invoke_cli(&args.command_id, args.params, options)
        .await;

    if args.json {
        let value = match &outcome.result {
            Some(result) => serde_json::to_value(result)?,
            None => serde_json::json!({ "status": "rejected", "message": outcome.message }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if outcome.is_success() {
        println!("{}", outcome.message);
        if let Some(data) = outcome.result.as_ref().and_then(CommandResult::data) {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
    } else {
        eprintln!("Error: {}", outcome.message);
    }

    Ok(outcome.exit_code)
}

pub async fn batch(host: &Host, args: BatchArgs, cancel: CancellationToken) -> Result<i32> {
    let file = BatchFile::load(&args.file)
        .await
        .with_context(|| format!("Failed to load batch file {}", args.file.display()))?;

    let mut options = file.options_or(&host.config.batch);
    if let Some(n) = args.parallel {
        options.max_parallelism = n;
    }
    if args.continue_on_error {
        options.continue_on_error = true;
    }
    if let Some(ms) = args.global_timeout_ms {
        options.global_timeout_ms = Some(ms);
    }
    if args.log.is_some() {
        options = options.with_log(args.log);
    }

    let report = match host
        .batch_executor()
        .run_with_cancel(&file.requests, &options, cancel)
        .await
    {
        Ok(report) => report,
        Err(e @ (BatchError::UnknownCommand { .. } | BatchError::InvalidParameters { .. })) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_USAGE);
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(report.exit_code())
}

fn print_report(report: &BatchReport) {
    let mut lines: Vec<(usize, String)> = report
        .results
        .iter()
        .map(|item| {
            (
                item.index,
                format!(
                    "  #{:<3} {:<28} {:<10} {}",
                    item.index,
                    item.command_id,
                    item.result.status(),
                    item.result.message()
                ),
            )
        })
        .collect();
    lines.extend(report.not_executed.iter().map(|skip| {
        (
            skip.index,
            format!(
                "  #{:<3} {:<28} {:<10} {}",
                skip.index, skip.command_id, "skipped", skip.reason
            ),
        )
    }));
    lines.sort_by_key(|(index, _)| *index);

    println!("Batch {}", report.batch_id);
    for (_, line) in lines {
        println!("{}", line);
    }
    println!("{}", report.summary());
    if let Some(path) = &report.log_path {
        println!("Log written to {}", path.display());
    }
}

pub fn list(host: &Host, args: ListArgs) -> Result<i32> {
    let handles = if let Some(name) = &args.category {
        let Some(category) = CommandCategory::parse(name) else {
            eprintln!("Error: unknown category '{}'", name);
            return Ok(EXIT_USAGE);
        };
        host.registry.list_by_category(category)
    } else if args.shortcuts {
        host.registry.list_with_shortcuts()
    } else if let Some(query) = &args.search {
        host.registry.search(query)
    } else {
        host.registry.list()
    };

    if args.json {
        let descriptors: Vec<_> = handles.iter().map(|h| h.descriptor()).collect();
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(EXIT_SUCCESS);
    }

    if handles.is_empty() {
        println!("No commands found.");
        return Ok(EXIT_SUCCESS);
    }

    println!("{:<28} {:<24} {:<12} SHORTCUT", "ID", "NAME", "CATEGORY");
    for handle in &handles {
        println!("{}", format_row(handle));
    }
    Ok(EXIT_SUCCESS)
}

fn format_row(handle: &CommandHandle) -> String {
    let d = handle.descriptor();
    let mut row = format!(
        "{:<28} {:<24} {:<12} {}",
        d.id,
        d.name,
        d.category.to_string(),
        d.shortcut.as_deref().unwrap_or("-")
    );
    if !handle.is_enabled() {
        row.push_str(" (disabled)");
    }
    row
}

pub fn stats(host: &Host, args: StatsArgs) -> Result<i32> {
    let stats = host.registry.stats();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("Commands:       {}", stats.total);
    println!("  enabled:      {}", stats.enabled);
    println!("  visible:      {}", stats.visible);
    println!("  with shortcut: {}", stats.with_shortcuts);
    println!("Plugins:        {}", host.plugins.registered_plugins().join(", "));
    if !stats.by_category.is_empty() {
        println!("By category:");
        for (category, count) in &stats.by_category {
            println!("  {:<12} {}", category.to_string(), count);
        }
    }
    Ok(EXIT_SUCCESS)
}
