use crate::{GraphError, Task, find_shortest_cycle};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A validated, acyclic set of tasks plus the derived adjacency.
///
/// Tasks keep their input order, which every later stage uses to break ties.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.task(id)
            .map(|task| task.dependencies.as_slice())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Renders every root with the chain of tasks that depend on it.
    ///
    /// A task reachable along several paths is expanded once; later
    /// occurrences are marked `(shown above)`, so the output has one line per
    /// root and per edge.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let mut shown = HashSet::new();
        for task in self.tasks.iter().filter(|t| t.dependencies.is_empty()) {
            out.push_str(&task.id);
            out.push('\n');
            shown.insert(task.id.as_str());
            self.render_chain(&task.id, "  ", &mut shown, &mut out);
        }
        out
    }

    fn render_chain<'a>(&'a self, id: &str, prefix: &str, shown: &mut HashSet<&'a str>, out: &mut String) {
        for child in self.dependents_of(id) {
            if !shown.insert(child.as_str()) {
                out.push_str(&format!("{prefix}└─> {child} (shown above)\n"));
                continue;
            }
            out.push_str(&format!("{prefix}└─> {child}\n"));
            self.render_chain(child, &format!("{prefix}    "), shown, out);
        }
    }
}

/// Validates task lists into a [`DependencyGraph`].
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    setup_task: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Designates a setup task that every other task implicitly depends on.
    pub fn with_setup_task(mut self, id: impl Into<String>) -> Self {
        self.setup_task = Some(id.into());
        self
    }

    pub fn build(&self, tasks: &[Task]) -> Result<DependencyGraph, GraphError> {
        let mut tasks = tasks.to_vec();
        let mut index = HashMap::with_capacity(tasks.len());

        for (i, task) in tasks.iter_mut().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateTask(task.id.clone()));
            }
            let mut seen = HashSet::new();
            task.dependencies.retain(|dep| seen.insert(dep.clone()));
        }

        for task in &tasks {
            if let Some(dep) = task.dependencies.iter().find(|d| !index.contains_key(*d)) {
                return Err(GraphError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        if let Some(setup) = &self.setup_task {
            add_setup_edges(&mut tasks, &index, setup)?;
        }

        let order: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let deps: HashMap<String, Vec<String>> = tasks
            .iter()
            .map(|t| (t.id.clone(), t.dependencies.clone()))
            .collect();
        if let Some(cycle) = find_shortest_cycle(&order, &deps) {
            return Err(GraphError::Cycle { cycle });
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for task in &tasks {
            for dep in &task.dependencies {
                dependents.entry(dep.clone()).or_default().push(task.id.clone());
            }
        }

        debug!(tasks = tasks.len(), "dependency graph built");
        Ok(DependencyGraph {
            tasks,
            index,
            dependents,
        })
    }
}

/// Makes `setup` a dependency of every task that does not already reach it.
///
/// A task reaches the setup task through any dependency that is not itself an
/// ancestor of the setup task, so only tasks whose dependencies are all
/// ancestors (or that have none) get the direct edge. Ancestors of the setup
/// task are left alone: an edge there would close a cycle.
fn add_setup_edges(
    tasks: &mut [Task],
    index: &HashMap<String, usize>,
    setup: &str,
) -> Result<(), GraphError> {
    let Some(&setup_pos) = index.get(setup) else {
        return Err(GraphError::UnknownSetupTask(setup.to_string()));
    };

    let mut ancestors: HashSet<String> = HashSet::new();
    let mut stack = tasks[setup_pos].dependencies.clone();
    while let Some(id) = stack.pop() {
        if id != setup && ancestors.insert(id.clone()) {
            stack.extend(tasks[index[&id]].dependencies.iter().cloned());
        }
    }

    for task in tasks.iter_mut() {
        if task.id == setup || ancestors.contains(&task.id) {
            continue;
        }
        let reaches_setup = task
            .dependencies
            .iter()
            .any(|dep| dep == setup || !ancestors.contains(dep));
        if !reaches_setup {
            debug!(task_id = %task.id, setup, "adding implicit setup dependency");
            task.dependencies.push(setup.to_string());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Vec<Task> {
        vec![
            Task::new("a", "noop"),
            Task::new("b", "noop").depends_on("a"),
            Task::new("c", "noop").depends_on("a"),
            Task::new("d", "noop").depends_on("b").depends_on("c"),
        ]
    }

    #[test]
    fn builds_adjacency_in_input_order() {
        let graph = GraphBuilder::new().build(&diamond()).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.dependents_of("a"), ["b".to_string(), "c".to_string()]);
        assert_eq!(graph.dependencies_of("d"), ["b".to_string(), "c".to_string()]);
        assert_eq!(graph.position("c"), Some(2));
    }

    #[test]
    fn rejects_dangling_dependency() {
        let tasks = vec![Task::new("a", "noop").depends_on("ghost")];
        assert_eq!(
            GraphBuilder::new().build(&tasks).unwrap_err(),
            GraphError::UnknownDependency {
                task: "a".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn rejects_duplicate_ids() {
        let tasks = vec![Task::new("a", "noop"), Task::new("a", "other")];
        assert_eq!(
            GraphBuilder::new().build(&tasks).unwrap_err(),
            GraphError::DuplicateTask("a".into())
        );
    }

    #[test]
    fn rejects_two_task_cycle_naming_both() {
        let tasks = vec![
            Task::new("X", "noop").depends_on("Y"),
            Task::new("Y", "noop").depends_on("X"),
        ];
        assert_eq!(
            GraphBuilder::new().build(&tasks).unwrap_err(),
            GraphError::Cycle {
                cycle: vec!["X".into(), "Y".into()]
            }
        );
    }

    #[test]
    fn collapses_repeated_dependencies() {
        let tasks = vec![
            Task::new("a", "noop"),
            Task::new("b", "noop").depends_on("a").depends_on("a"),
        ];
        let graph = GraphBuilder::new().build(&tasks).unwrap();
        assert_eq!(graph.dependencies_of("b"), ["a".to_string()]);
    }

    #[test]
    fn setup_task_only_attaches_where_not_reachable() {
        let tasks = vec![
            Task::new("lint", "noop"),
            Task::new("setup", "fs"),
            Task::new("build", "noop").depends_on("lint"),
            Task::new("docs", "noop").depends_on("setup"),
            Task::new("test", "noop").depends_on("build"),
        ];
        let graph = GraphBuilder::new()
            .with_setup_task("setup")
            .build(&tasks)
            .unwrap();

        assert!(graph.dependencies_of("setup").is_empty());
        assert_eq!(graph.dependencies_of("lint"), ["setup".to_string()]);
        // build reaches setup through lint, test through build
        assert_eq!(graph.dependencies_of("build"), ["lint".to_string()]);
        assert_eq!(graph.dependencies_of("test"), ["build".to_string()]);
        assert_eq!(graph.dependencies_of("docs"), ["setup".to_string()]);
    }

    #[test]
    fn setup_task_ancestors_are_not_rewired() {
        let tasks = vec![
            Task::new("fetch", "net"),
            Task::new("setup", "fs").depends_on("fetch"),
            Task::new("render", "noop").depends_on("fetch"),
        ];
        let graph = GraphBuilder::new()
            .with_setup_task("setup")
            .build(&tasks)
            .unwrap();

        assert!(graph.dependencies_of("fetch").is_empty());
        assert_eq!(
            graph.dependencies_of("render"),
            ["fetch".to_string(), "setup".to_string()]
        );
    }

    #[test]
    fn unknown_setup_task_is_rejected() {
        let err = GraphBuilder::new()
            .with_setup_task("setup")
            .build(&diamond())
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownSetupTask("setup".into()));
    }

    #[test]
    fn input_tasks_are_not_mutated() {
        let tasks = vec![Task::new("setup", "fs"), Task::new("a", "noop")];
        let graph = GraphBuilder::new()
            .with_setup_task("setup")
            .build(&tasks)
            .unwrap();
        assert!(tasks[1].dependencies.is_empty());
        assert_eq!(graph.dependencies_of("a"), ["setup".to_string()]);
    }

    #[test]
    fn renders_tree_from_roots() {
        let graph = GraphBuilder::new().build(&diamond()).unwrap();
        assert_eq!(
            graph.render_tree(),
            "a\n  └─> b\n      └─> d\n  └─> c\n      └─> d (shown above)\n"
        );
    }

    #[test]
    fn stacked_diamonds_render_one_line_per_edge() {
        // each diamond doubles the paths to its sink
        let mut tasks = vec![Task::new("j0", "noop")];
        for i in 0..20 {
            let (join, l, r) = (format!("j{i}"), format!("l{i}"), format!("r{i}"));
            tasks.push(Task::new(l.clone(), "noop").depends_on(join.clone()));
            tasks.push(Task::new(r.clone(), "noop").depends_on(join));
            tasks.push(Task::new(format!("j{}", i + 1), "noop").depends_on(l).depends_on(r));
        }
        let graph = GraphBuilder::new().build(&tasks).unwrap();

        let edges: usize = graph.tasks().iter().map(|t| t.dependencies.len()).sum();
        assert_eq!(graph.render_tree().lines().count(), 1 + edges);
    }
}
