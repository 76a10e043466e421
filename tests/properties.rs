// tests/properties.rs

use std::collections::HashSet;

use proptest::prelude::*;
use taskgate::batch::{BatchFactory, BatchOptions};
use taskgate::coordinator::Membership;
use taskgate::engine::PhaseEntry;
use taskgate::prereq::{add_prerequisite, StatusPattern};
use taskgate::status::{ensure_legal, is_legal, Phase, Status};
use taskgate::types::CoordinatorKind;
use taskgate_test_utils::builders::{id, StoreFixture, TaskBuilder};

fn status_strategy() -> impl Strategy<Value = Status> {
    (0..Status::ALL.len()).prop_map(|i| Status::ALL[i])
}

proptest! {
    #[test]
    fn ensure_legal_agrees_with_the_table(from in status_strategy(), to in status_strategy()) {
        prop_assert_eq!(ensure_legal(from, to).is_ok(), from == to || is_legal(from, to));
    }

    #[test]
    fn exact_names_match_their_own_status(status in status_strategy()) {
        let pattern = StatusPattern::parse(status.as_str()).unwrap();
        prop_assert!(pattern.matches(status));
        prop_assert!(StatusPattern::from(status).matches(status));
    }

    // Only legal moves are ever persisted, whatever order they are tried in.
    #[test]
    fn random_moves_never_persist_an_illegal_transition(
        moves in proptest::collection::vec(status_strategy(), 1..40)
    ) {
        let fx = StoreFixture::new();
        let task = fx.insert(TaskBuilder::new("align"));
        let mut current = Status::Standby;

        for next in moves {
            let result = fx.engine.update(id(&task), |t| {
                t.status = next;
                Ok(true)
            });
            if current == next || is_legal(current, next) {
                prop_assert!(result.is_ok());
                current = next;
            } else {
                prop_assert!(result.is_err());
            }
            prop_assert_eq!(fx.status_of(id(&task)), current);
        }
    }

    #[test]
    fn effective_minimum_is_clamped_to_the_group_size(group in 1usize..20, min in proptest::option::of(0usize..30)) {
        let mut options = BatchOptions::default().with_group_size(group);
        options.min_group_size = min;
        let effective = options.effective_min_group_size();
        prop_assert!(effective <= group);
        prop_assert_eq!(effective, min.unwrap_or(group).min(group));
    }

    // Full chunks always get a coordinator; the final partial chunk only
    // when it reaches the (clamped) minimum.
    #[test]
    fn batches_partition_their_tasks(
        (n, group, min) in (1usize..12, 1usize..5).prop_flat_map(|(n, g)| (Just(n), Just(g), 1..=g + 2)),
        parallel in any::<bool>(),
    ) {
        let fx = StoreFixture::new();
        let tasks = fx.standby_programs("align", n);
        let kind = if parallel { CoordinatorKind::Parallel } else { CoordinatorKind::Serial };
        let options = BatchOptions::default().with_group_size(group).with_min_group_size(min);
        let outcome = BatchFactory::new(&fx.engine, kind)
            .create_from_task_list(&tasks, &options)
            .unwrap();

        let full_chunks = n / group;
        let tail = n % group;
        let tail_grouped = tail > 0 && tail >= min.min(group);
        prop_assert_eq!(outcome.coordinators.len(), full_chunks + usize::from(tail_grouped));
        if !tail_grouped {
            prop_assert!(outcome.coordinators.len() <= full_chunks);
        }
        prop_assert_eq!(outcome.ungrouped.len(), if tail_grouped { 0 } else { tail });

        let mut seen = HashSet::new();
        for (i, coordinator) in outcome.coordinators.iter().enumerate() {
            let membership = Membership::load(coordinator).unwrap();
            let expected: Vec<_> = tasks.iter().skip(i * group).take(group).map(id).collect();
            prop_assert_eq!(&membership.members, &expected);
            for member in membership.members {
                prop_assert!(seen.insert(member));
                prop_assert!(fx.read(member).configure_only);
            }
        }
        for task in &outcome.ungrouped {
            prop_assert!(seen.insert(id(task)));
            prop_assert!(!task.configure_only);
        }
        prop_assert_eq!(seen.len(), n);
        for task in &tasks {
            prop_assert_eq!(fx.status_of(id(task)), Status::New);
        }
    }
}

proptest! {
    #[test]
    fn adding_the_same_edge_twice_changes_nothing(other in 100u64..200, status in status_strategy()) {
        let mut once = TaskBuilder::new("align").build();
        add_prerequisite(&mut once, other, Phase::Setup, status.into()).unwrap();
        let mut twice = once.clone();
        add_prerequisite(&mut twice, other, Phase::Setup, status.into()).unwrap();
        prop_assert_eq!(once.prerequisites, twice.prerequisites);
    }

    // A phase that cannot be entered yet writes nothing.
    #[test]
    fn deferred_entry_leaves_the_task_untouched(upstream_status in status_strategy()) {
        prop_assume!(!upstream_status.is_settled());
        let fx = StoreFixture::new();
        let upstream = fx.insert(TaskBuilder::new("upstream").status(upstream_status));
        let mut draft = TaskBuilder::new("align").status(Status::New).build();
        add_prerequisite(&mut draft, id(&upstream), Phase::Setup, Status::Completed.into()).unwrap();
        let task = fx.engine.create(draft).unwrap();

        prop_assert!(!fx.engine.evaluator().can_enter(&task, Phase::Setup).unwrap());
        let entry = fx.engine.try_enter_phase(id(&task), Phase::Setup).unwrap();
        prop_assert!(matches!(entry, PhaseEntry::Deferred));
        let after = fx.read(id(&task));
        prop_assert_eq!(after.status, Status::New);
        prop_assert_eq!(after.version, task.version);
    }
}
