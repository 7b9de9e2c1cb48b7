use std::collections::{HashMap, HashSet, VecDeque};

/// Returns the cycle with the fewest tasks, or `None` if the graph is acyclic.
///
/// The cycle is listed along dependency edges: `[x, y]` means `x` depends on
/// `y` and `y` depends on `x`. `order` fixes the scan order so that ties between
/// equally short cycles always resolve the same way.
///
/// Every task is expanded at most once, but the search recurses along
/// dependency chains, so stack depth grows with the longest chain.
pub fn find_shortest_cycle(
    order: &[String],
    deps: &HashMap<String, Vec<String>>,
) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut shortest: Option<Vec<String>> = None;

    fn dfs<'a>(
        task_id: &'a str,
        deps: &'a HashMap<String, Vec<String>>,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        shortest: &mut Option<Vec<String>>,
    ) {
        if let Some(pos) = path.iter().position(|&on_path| on_path == task_id) {
            // back edge: the cycle is the path slice from the revisited node
            let cycle = &path[pos..];
            if shortest.as_ref().is_none_or(|best| cycle.len() < best.len()) {
                *shortest = Some(cycle.iter().map(|s| (*s).to_string()).collect());
            }
            return;
        }
        if !visited.insert(task_id) {
            return;
        }

        path.push(task_id);
        if let Some(children) = deps.get(task_id) {
            for dep in children {
                dfs(dep, deps, visited, path, shortest);
            }
        }
        path.pop();
    }

    // keep scanning every component, a later one may hold a shorter cycle
    for task_id in order {
        if !visited.contains(task_id.as_str()) {
            dfs(task_id, deps, &mut visited, &mut Vec::new(), &mut shortest);
        }
    }

    // DFS skips cycles reached through already visited nodes, so tighten the
    // candidate with a bounded BFS from every task.
    let mut best = shortest?;
    for task_id in order {
        if best.len() == 1 {
            break;
        }
        if let Some(cycle) = shortest_cycle_through(task_id, deps, best.len()) {
            best = cycle;
        }
    }
    Some(best)
}

/// Shortest cycle through `start` with fewer than `limit` tasks.
fn shortest_cycle_through(
    start: &str,
    deps: &HashMap<String, Vec<String>>,
    limit: usize,
) -> Option<Vec<String>> {
    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut seen: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(start, 1)]);

    while let Some((node, depth)) = queue.pop_front() {
        let Some(children) = deps.get(node) else {
            continue;
        };
        if depth < limit && children.iter().any(|dep| dep == start) {
            let mut cycle = vec![node.to_string()];
            let mut cursor = node;
            while let Some(&prev) = parent.get(cursor) {
                cycle.push(prev.to_string());
                cursor = prev;
            }
            cycle.reverse();
            return Some(cycle);
        }
        if depth + 1 >= limit {
            continue;
        }
        for dep in children {
            if seen.insert(dep.as_str()) {
                parent.insert(dep.as_str(), node);
                queue.push_back((dep.as_str(), depth + 1));
            }
        }
    }

    None
}
