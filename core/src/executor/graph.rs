use std::collections::{HashMap, HashSet, VecDeque};

use crate::blueprint::{Blueprint, Task};
use crate::error::ExecutorError;

/// Task dependency graph (DAG).
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// Task nodes: task name -> validated task record.
    pub nodes: HashMap<String, Task>,

    /// Dependency edges: task name -> names it requires.
    pub edges: HashMap<String, Vec<String>>,

    /// Reverse edges: task name -> names that require it.
    pub reverse_edges: HashMap<String, Vec<String>>,

    /// Blueprint declaration order (for stable iteration).
    insertion_order: Vec<String>,
}

impl TaskGraph {
    /// Construct the graph from an explicit task list.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, ExecutorError> {
        let mut nodes = HashMap::new();
        let mut edges = HashMap::new();
        let mut reverse_edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut insertion_order = Vec::new();

        for task in tasks {
            if nodes.contains_key(&task.name) {
                return Err(ExecutorError::DuplicateTask(task.name));
            }

            let name = task.name.clone();
            let requires = task.requires.clone();

            nodes.insert(name.clone(), task);
            edges.insert(name.clone(), requires.clone());
            insertion_order.push(name.clone());

            for dep in requires {
                reverse_edges.entry(dep).or_default().push(name.clone());
            }
        }

        Ok(Self {
            nodes,
            edges,
            reverse_edges,
            insertion_order,
        })
    }

    /// Construct the graph for one build pass: the tasks named in
    /// `BUILD.TASKS` plus their transitive `REQUIRES` closure, in blueprint
    /// declaration order.
    pub fn for_build(blueprint: &Blueprint) -> Result<Self, ExecutorError> {
        let mut wanted: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = blueprint.build.tasks.iter().map(String::as_str).collect();

        while let Some(name) = queue.pop_front() {
            if !wanted.insert(name.to_string()) {
                continue;
            }
            match blueprint.task(name) {
                Some(task) => queue.extend(task.requires.iter().map(String::as_str)),
                // The resolver guarantees this; a miss here means the caller
                // bypassed validation.
                None => {
                    return Err(ExecutorError::DependencyNotFound {
                        task: name.to_string(),
                        missing: name.to_string(),
                    })
                }
            }
        }

        let tasks = blueprint
            .task_order
            .iter()
            .filter(|name| wanted.contains(*name))
            .filter_map(|name| blueprint.task(name).cloned())
            .collect();

        Self::from_tasks(tasks)
    }

    /// Check edge integrity and reject cyclic graphs.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        for (name, requires) in &self.edges {
            for dep in requires {
                if !self.nodes.contains_key(dep) {
                    return Err(ExecutorError::DependencyNotFound {
                        task: name.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.detect_cycle() {
            return Err(ExecutorError::CircularDependency(cycle));
        }

        Ok(())
    }

    /// Kahn's algorithm. Returns execution stages in which tasks are
    /// mutually independent; also serves as the engine's cycle check.
    pub fn topological_sort(&self) -> Result<Vec<Vec<String>>, ExecutorError> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .keys()
            .map(|name| (name.as_str(), 0))
            .collect();

        for (name, requires) in &self.edges {
            *in_degree.get_mut(name.as_str()).expect("node present") += requires.len();
        }

        let mut stages: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(name, _)| name.to_string())
            .collect();
        self.sort_by_insertion(&mut current);

        let mut processed = 0;

        while !current.is_empty() {
            processed += current.len();

            let mut next = Vec::new();
            for name in &current {
                if let Some(dependents) = self.reverse_edges.get(name) {
                    for dependent in dependents {
                        let deg = in_degree.get_mut(dependent.as_str()).expect("node present");
                        *deg -= 1;
                        if *deg == 0 {
                            next.push(dependent.clone());
                        }
                    }
                }
            }
            self.sort_by_insertion(&mut next);

            stages.push(std::mem::replace(&mut current, next));
        }

        if processed != self.nodes.len() {
            return Err(ExecutorError::CircularDependency(
                "unable to complete topological sort (cycle detected)".to_string(),
            ));
        }

        Ok(stages)
    }

    fn sort_by_insertion(&self, names: &mut [String]) {
        names.sort_by_key(|name| {
            self.insertion_order
                .iter()
                .position(|n| n == name)
                .unwrap_or(usize::MAX)
        });
    }

    /// DFS cycle detection; returns the cycle path for diagnostics.
    fn detect_cycle(&self) -> Option<String> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for name in &self.insertion_order {
            if !visited.contains(name) && self.dfs_cycle(name, &mut visited, &mut stack) {
                return Some(stack.join(" -> "));
            }
        }

        None
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> bool {
        visited.insert(node.to_string());
        stack.push(node.to_string());

        if let Some(requires) = self.edges.get(node) {
            for dep in requires {
                if let Some(pos) = stack.iter().position(|n| n == dep) {
                    stack.push(dep.clone());
                    *stack = stack[pos..].to_vec();
                    return true;
                }

                if !visited.contains(dep) && self.dfs_cycle(dep, visited, stack) {
                    return true;
                }
            }
        }

        stack.pop();
        false
    }
}
