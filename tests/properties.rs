use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use dagflow::*;
use proptest::prelude::*;

fn name(i: usize) -> String {
    format!("n{i}")
}

/// Random acyclic task list: task `i` may only depend on tasks before it.
fn dag() -> impl Strategy<Value = Vec<Task>> {
    (1usize..10).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n).prop_map(move |matrix| {
            (0..n)
                .map(|i| {
                    (0..i)
                        .filter(|&j| matrix[i][j])
                        .fold(Task::new(name(i), "noop"), |task, j| task.depends_on(name(j)))
                })
                .collect::<Vec<Task>>()
        })
    })
}

/// Random directed graph on up to six nodes, self loops included.
fn digraph() -> impl Strategy<Value = (Vec<String>, HashMap<String, Vec<String>>)> {
    (1usize..=6).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n).prop_map(move |matrix| {
            let order: Vec<String> = (0..n).map(name).collect();
            let deps: HashMap<String, Vec<String>> = (0..n)
                .map(|i| (name(i), (0..n).filter(|&j| matrix[i][j]).map(name).collect::<Vec<_>>()))
                .collect();
            (order, deps)
        })
    })
}

/// Length of the shortest closed walk through `start`, by BFS.
fn shortest_return(start: &str, deps: &HashMap<String, Vec<String>>) -> Option<usize> {
    let mut dist: HashMap<&str, usize> = HashMap::new();
    let mut queue = VecDeque::from([(start, 0usize)]);
    while let Some((node, d)) = queue.pop_front() {
        for next in &deps[node] {
            if next == start {
                return Some(d + 1);
            }
            if !dist.contains_key(next.as_str()) {
                dist.insert(next.as_str(), d + 1);
                queue.push_back((next.as_str(), d + 1));
            }
        }
    }
    None
}

proptest! {
    #[test]
    fn levels_partition_tasks_and_respect_dependencies(tasks in dag()) {
        let graph = GraphBuilder::new().build(&tasks).unwrap();
        let levels = level(&graph);

        let mut level_of = HashMap::new();
        for (k, level) in levels.iter().enumerate() {
            for id in level {
                prop_assert!(level_of.insert(id.clone(), k).is_none(), "{id} placed twice");
            }
        }
        prop_assert_eq!(level_of.len(), tasks.len());

        for task in &tasks {
            let k = level_of[&task.id];
            for dep in &task.dependencies {
                prop_assert!(level_of[dep] < k);
            }
            // each task sits as early as its dependencies allow
            let earliest = task.dependencies.iter().map(|d| level_of[d] + 1).max().unwrap_or(0);
            prop_assert_eq!(k, earliest);
        }
    }

    #[test]
    fn reported_cycle_is_real_and_minimal((order, deps) in digraph()) {
        let expected = order.iter().filter_map(|n| shortest_return(n, &deps)).min();
        let found = find_shortest_cycle(&order, &deps);

        prop_assert_eq!(found.as_ref().map(Vec::len), expected);
        if let Some(cycle) = found {
            let distinct: HashSet<_> = cycle.iter().collect();
            prop_assert_eq!(distinct.len(), cycle.len());
            for (i, node) in cycle.iter().enumerate() {
                let next = &cycle[(i + 1) % cycle.len()];
                prop_assert!(deps[node].contains(next), "{node} does not depend on {next}");
            }
        }
    }

    #[test]
    fn backoff_never_shrinks_and_respects_cap(
        base in 1u64..5_000,
        cap in proptest::option::of(1u64..100_000),
        attempt in 1u32..80,
    ) {
        let mut policy = RetryPolicy::new(10, Duration::from_millis(base));
        if let Some(cap) = cap {
            policy = policy.with_max_delay(Duration::from_millis(cap));
        }
        let now = policy.next_delay(attempt);
        let later = policy.next_delay(attempt + 1);

        prop_assert!(later >= now);
        if let Some(cap) = cap {
            prop_assert!(now <= Duration::from_millis(cap));
        }
        if attempt == 1 {
            prop_assert_eq!(now, Duration::from_millis(cap.map_or(base, |c| c.min(base))));
        }
    }
}
