use std::collections::{HashMap, HashSet};

use crate::error::QueueError;
use crate::task::Task;

/// Read-only dependency view over a queue's task table.
///
/// Built on demand for validation and planning; the queue itself keeps its
/// own reverse index for propagation.
#[derive(Debug)]
pub struct DependencyGraph<'a> {
    /// Dependency edges: task_id -> list of dependencies
    edges: HashMap<&'a str, &'a [String]>,

    /// Reverse edges: task_id -> list of tasks that depend on it
    reverse_edges: HashMap<&'a str, Vec<&'a str>>,

    /// Insertion order of the task table (for stable output)
    insertion_order: Vec<&'a str>,
}

impl<'a> DependencyGraph<'a> {
    pub fn new<I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut edges = HashMap::new();
        let mut reverse_edges: HashMap<&'a str, Vec<&'a str>> = HashMap::new();
        let mut insertion_order = Vec::new();

        for task in tasks {
            edges.insert(task.id(), task.dependencies());
            insertion_order.push(task.id());

            for dep in task.dependencies() {
                reverse_edges.entry(dep.as_str()).or_default().push(task.id());
            }
        }

        Self {
            edges,
            reverse_edges,
            insertion_order,
        }
    }

    /// Checks that every dependency exists and that the graph is acyclic.
    pub fn validate(&self) -> Result<(), QueueError> {
        for task_id in &self.insertion_order {
            for dep in self.edges[task_id].iter() {
                if !self.edges.contains_key(dep.as_str()) {
                    return Err(QueueError::DependencyNotFound {
                        task_id: task_id.to_string(),
                        missing_dep: dep.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.detect_cycle() {
            return Err(QueueError::CircularDependency(cycle));
        }

        Ok(())
    }

    /// Topological sort using Kahn's algorithm
    ///
    /// Returns stages where tasks in the same stage have no dependencies on
    /// each other. Within a stage, tasks keep table insertion order.
    ///
    /// # Time Complexity
    ///
    /// O(V log V + E) where V = number of tasks, E = number of dependencies
    pub fn stages(&self) -> Result<Vec<Vec<String>>, QueueError> {
        self.validate()?;

        let position: HashMap<&str, usize> = self
            .insertion_order
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        // edges[A] = [B, C] means A depends on B and C, so A's in-degree = 2
        let mut in_degree: HashMap<&str, usize> = self
            .edges
            .iter()
            .map(|(id, deps)| (*id, deps.len()))
            .collect();

        let mut current_stage: Vec<&str> = self
            .insertion_order
            .iter()
            .copied()
            .filter(|id| in_degree[id] == 0)
            .collect();

        let mut stages: Vec<Vec<String>> = Vec::new();
        let mut processed = 0;

        while !current_stage.is_empty() {
            processed += current_stage.len();

            let mut next_stage = Vec::new();
            for task_id in &current_stage {
                if let Some(dependents) = self.reverse_edges.get(task_id) {
                    for dependent in dependents {
                        if let Some(degree) = in_degree.get_mut(dependent) {
                            *degree -= 1;
                            if *degree == 0 {
                                next_stage.push(*dependent);
                            }
                        }
                    }
                }
            }
            next_stage.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));

            stages.push(current_stage.iter().map(|id| id.to_string()).collect());
            current_stage = next_stage;
        }

        if processed != self.edges.len() {
            return Err(QueueError::CircularDependency(
                "Unable to complete topological sort (cycle detected)".to_string(),
            ));
        }

        Ok(stages)
    }

    /// Detect circular dependencies using DFS
    ///
    /// # Time Complexity
    ///
    /// O(V + E) where V = number of tasks, E = number of dependencies
    fn detect_cycle(&self) -> Option<String> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for &task_id in &self.insertion_order {
            if !visited.contains(task_id) && self.dfs_cycle(task_id, &mut visited, &mut stack) {
                return Some(format_cycle_path(&stack));
            }
        }

        None
    }

    fn dfs_cycle(
        &self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> bool {
        visited.insert(node);
        stack.push(node);

        if let Some(&dependencies) = self.edges.get(node) {
            for dep in dependencies {
                let dep = dep.as_str();
                if let Some(pos) = stack.iter().position(|x| *x == dep) {
                    stack.push(dep);
                    stack.drain(..pos);
                    return true;
                }

                if self.edges.contains_key(dep)
                    && !visited.contains(dep)
                    && self.dfs_cycle(dep, visited, stack)
                {
                    return true;
                }
            }
        }

        stack.pop();
        false
    }
}

fn format_cycle_path(stack: &[&str]) -> String {
    stack.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::with_id(id, id).with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_stages_keep_insertion_order() {
        let tasks = vec![
            task("c", &["a", "b"]),
            task("b", &["a"]),
            task("a", &[]),
            task("d", &[]),
        ];
        let graph = DependencyGraph::new(&tasks);
        assert_eq!(
            graph.stages().unwrap(),
            vec![
                vec!["a".to_string(), "d".to_string()],
                vec!["b".to_string()],
                vec!["c".to_string()],
            ]
        );
    }

    #[test]
    fn test_missing_dependency() {
        let tasks = vec![task("a", &[]), task("b", &["ghost"])];
        let err = DependencyGraph::new(&tasks).validate().unwrap_err();
        assert_eq!(
            err,
            QueueError::DependencyNotFound {
                task_id: "b".to_string(),
                missing_dep: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_cycle_path_is_reported() {
        let tasks = vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])];
        match DependencyGraph::new(&tasks).validate() {
            Err(QueueError::CircularDependency(path)) => {
                assert_eq!(path, "a -> c -> b -> a");
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_graph() {
        let tasks: Vec<Task> = Vec::new();
        assert!(DependencyGraph::new(&tasks).stages().unwrap().is_empty());
    }
}
