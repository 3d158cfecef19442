//! Integration tests for the command registry under concurrent use.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::MockCommand;
use easel_commands::{CommandCategory, CommandRegistry, RegistryError, RegistryEvent};

#[test]
fn test_concurrent_register_same_id_has_one_winner() {
    const THREADS: usize = 16;

    let registry = Arc::new(CommandRegistry::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let descriptor =
                    easel_commands::CommandDescriptor::new("new-document", format!("New {i}"));
                let (command, _) = MockCommand::succeed("new-document")
                    .with_descriptor(descriptor)
                    .build();
                barrier.wait();
                registry.register(command).map(|h| h.descriptor().name.clone())
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
    let conflicts = outcomes
        .iter()
        .filter(|o| matches!(o, Err(RegistryError::DuplicateId(id)) if id == "new-document"))
        .count();

    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, THREADS - 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(
        &registry.get("new-document").unwrap().descriptor().name,
        winners[0]
    );
}

#[test]
fn test_concurrent_register_distinct_ids() {
    let registry = Arc::new(CommandRegistry::new());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registry = registry.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let (command, _) = MockCommand::succeed(&format!("cmd-{t}-{i}")).build();
                    registry.register(command).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.len(), 400);
    assert_eq!(registry.stats().total, 400);
}

#[test]
fn test_category_ordering_scenario() {
    let registry = CommandRegistry::new();
    let (save, _) = MockCommand::succeed("save-document")
        .in_category(CommandCategory::File, 20)
        .build();
    let (new, _) = MockCommand::succeed("new-document")
        .in_category(CommandCategory::File, 10)
        .build();
    let (undo, _) = MockCommand::succeed("undo")
        .in_category(CommandCategory::Edit, 0)
        .build();

    registry.register(save).unwrap();
    registry.register(undo).unwrap();
    registry.register(new).unwrap();

    let file: Vec<_> = registry
        .list_by_category(CommandCategory::File)
        .iter()
        .map(|h| h.id().to_string())
        .collect();
    assert_eq!(file, vec!["new-document", "save-document"]);

    let all: Vec<_> = registry.list().iter().map(|h| h.id().to_string()).collect();
    assert_eq!(all, vec!["new-document", "save-document", "undo"]);
}

#[test]
fn test_register_unregister_round_trip() {
    let registry = CommandRegistry::new();
    let (command, counters) = MockCommand::succeed("flatten").build();

    registry.register(command).unwrap();
    assert!(registry.is_registered("flatten"));

    assert!(registry.unregister("flatten"));
    assert!(!registry.is_registered("flatten"));
    assert!(registry.list().iter().all(|h| h.id() != "flatten"));
    assert_eq!(counters.dispose(), 1);
}

#[test]
fn test_duplicate_leaves_existing_entry_untouched() {
    let registry = CommandRegistry::new();
    let (first, first_counters) = MockCommand::succeed("flatten")
        .in_category(CommandCategory::Layer, 1)
        .build();
    let (second, second_counters) = MockCommand::succeed("flatten").build();

    let original = registry.register(first).unwrap();
    original.set_enabled(false);

    assert!(registry.register(second).is_err());

    let current = registry.get("flatten").unwrap();
    assert!(Arc::ptr_eq(&original, &current));
    assert_eq!(current.descriptor().category, CommandCategory::Layer);
    assert!(!current.is_enabled());
    assert_eq!(first_counters.dispose(), 0);
    assert_eq!(second_counters.dispose(), 0);
}

#[test]
fn test_clear_tolerates_dispose_failures() {
    let registry = CommandRegistry::new();
    let (a, a_counters) = MockCommand::succeed("a").failing_dispose().build();
    let (b, b_counters) = MockCommand::succeed("b").build();
    registry.register(a).unwrap();
    registry.register(b).unwrap();

    assert_eq!(registry.clear(), 2);
    assert!(registry.is_empty());
    assert_eq!(a_counters.dispose(), 1);
    assert_eq!(b_counters.dispose(), 1);
}

#[tokio::test]
async fn test_events_follow_registry_changes() {
    let registry = CommandRegistry::new();
    let mut events = registry.subscribe();

    let (command, _) = MockCommand::succeed("invert").build();
    registry.register(command).unwrap();
    let (duplicate, _) = MockCommand::succeed("invert").build();
    let _ = registry.register(duplicate);
    registry.unregister("invert");

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(match event {
            RegistryEvent::Registered { id, .. } => format!("+{id}"),
            RegistryEvent::Unregistered { id, .. } => format!("-{id}"),
        });
    }
    assert_eq!(seen, vec!["+invert", "-invert"]);
}

#[test]
fn test_concurrent_register_and_unregister() {
    let registry = Arc::new(CommandRegistry::new());
    for i in 0..100 {
        let (command, _) = MockCommand::succeed(&format!("old-{i}")).build();
        registry.register(command).unwrap();
    }

    let writer = {
        let registry = registry.clone();
        thread::spawn(move || {
            for i in 0..100 {
                let (command, _) = MockCommand::succeed(&format!("new-{i}")).build();
                registry.register(command).unwrap();
            }
        })
    };
    let remover = {
        let registry = registry.clone();
        thread::spawn(move || {
            for i in 0..100 {
                assert!(registry.unregister(&format!("old-{i}")));
            }
        })
    };
    let reader = {
        let registry = registry.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                let listed = registry.list();
                assert!(listed.len() <= 200);
            }
        })
    };

    writer.join().unwrap();
    remover.join().unwrap();
    reader.join().unwrap();

    assert_eq!(registry.len(), 100);
    assert!(registry.ids().iter().all(|id| id.starts_with("new-")));
}
