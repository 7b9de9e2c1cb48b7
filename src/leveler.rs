use crate::DependencyGraph;
use serde::{Deserialize, Serialize};

/// Partitions the graph into levels of mutually independent tasks.
///
/// Level `k` holds the tasks whose dependencies all sit in levels `0..k`.
/// Inside a level tasks keep graph input order.
pub fn level(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let tasks = graph.tasks();
    let mut remaining: Vec<usize> = tasks.iter().map(|t| t.dependencies.len()).collect();
    let mut current: Vec<usize> = (0..tasks.len()).filter(|&i| remaining[i] == 0).collect();
    let mut levels = Vec::new();

    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            for child in graph.dependents_of(&tasks[i].id) {
                let Some(j) = graph.position(child) else {
                    continue;
                };
                remaining[j] -= 1;
                if remaining[j] == 0 {
                    next.push(j);
                }
            }
        }
        next.sort_unstable();
        levels.push(current.iter().map(|&i| tasks[i].id.clone()).collect());
        current = next;
    }

    levels
}

/// The planned levels of a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub levels: Vec<Vec<String>>,
    pub total_tasks: usize,
    /// Widest level, the most tasks that could ever run at once.
    pub max_parallelism: usize,
}

impl ExecutionPlan {
    pub fn new(levels: Vec<Vec<String>>) -> Self {
        let total_tasks = levels.iter().map(Vec::len).sum();
        let max_parallelism = levels.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            levels,
            total_tasks,
            max_parallelism,
        }
    }
}

impl std::fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, level) in self.levels.iter().enumerate() {
            writeln!(f, "Level {}: {}", i, level.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GraphBuilder, Task};

    fn ids(levels: &[&[&str]]) -> Vec<Vec<String>> {
        levels
            .iter()
            .map(|l| l.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn diamond_has_three_levels() {
        let graph = GraphBuilder::new()
            .build(&[
                Task::new("A", "noop"),
                Task::new("B", "noop").depends_on("A"),
                Task::new("C", "noop").depends_on("A"),
                Task::new("D", "noop").depends_on("B").depends_on("C"),
            ])
            .unwrap();
        assert_eq!(level(&graph), ids(&[&["A"], &["B", "C"], &["D"]]));
    }

    #[test]
    fn level_follows_longest_dependency_chain() {
        // e depends on a directly and on d through a chain, so it lands after d
        let graph = GraphBuilder::new()
            .build(&[
                Task::new("e", "noop").depends_on("a").depends_on("d"),
                Task::new("d", "noop").depends_on("c"),
                Task::new("c", "noop").depends_on("a"),
                Task::new("a", "noop"),
                Task::new("z", "noop"),
            ])
            .unwrap();
        assert_eq!(level(&graph), ids(&[&["a", "z"], &["c"], &["d"], &["e"]]));
    }

    #[test]
    fn ties_keep_input_order() {
        let graph = GraphBuilder::new()
            .build(&[
                Task::new("root", "noop"),
                Task::new("zeta", "noop").depends_on("root"),
                Task::new("alpha", "noop").depends_on("root"),
                Task::new("mid", "noop").depends_on("root"),
            ])
            .unwrap();
        assert_eq!(level(&graph), ids(&[&["root"], &["zeta", "alpha", "mid"]]));
    }

    #[test]
    fn empty_graph_has_no_levels() {
        let graph = GraphBuilder::new().build(&[]).unwrap();
        assert!(level(&graph).is_empty());
        assert_eq!(ExecutionPlan::new(Vec::new()).max_parallelism, 0);
    }

    #[test]
    fn plan_renders_levels() {
        let plan = ExecutionPlan::new(ids(&[&["a"], &["b", "c"]]));
        assert_eq!(plan.total_tasks, 3);
        assert_eq!(plan.max_parallelism, 2);
        assert_eq!(plan.to_string(), "Level 0: a\nLevel 1: b, c\n");
    }
}
