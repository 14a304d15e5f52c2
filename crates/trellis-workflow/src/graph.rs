use std::collections::HashMap;

use trellis_config::{ModuleRef, Step};

use crate::error::WorkflowError;

/// Anything that can be placed in a dependency graph by name.
pub trait GraphNode {
  fn node_name(&self) -> &str;
  fn dependencies(&self) -> &[String];
}

impl GraphNode for Step {
  fn node_name(&self) -> &str {
    &self.name
  }

  fn dependencies(&self) -> &[String] {
    &self.depends_on
  }
}

impl GraphNode for ModuleRef {
  fn node_name(&self) -> &str {
    &self.name
  }

  fn dependencies(&self) -> &[String] {
    &self.depends_on
  }
}

/// Validated dependency topology of steps or modules.
///
/// Nodes are addressed by their declaration index. The graph is immutable;
/// schedulers copy [`DependencyGraph::in_degrees`] and decrement their own
/// counters as nodes complete.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
  names: Vec<String>,
  index: HashMap<String, usize>,
  /// node -> nodes it depends on.
  dependencies: Vec<Vec<usize>>,
  /// node -> nodes that depend on it.
  dependents: Vec<Vec<usize>>,
  in_degree: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
  Unvisited,
  InProgress,
  Done,
}

impl DependencyGraph {
  /// Build and validate a graph from nodes in declaration order.
  ///
  /// Fails on duplicate names, unknown dependencies, or cycles. Nothing is
  /// executed before this succeeds.
  pub fn build<N: GraphNode>(nodes: &[N]) -> Result<Self, WorkflowError> {
    let mut names = Vec::with_capacity(nodes.len());
    let mut index = HashMap::with_capacity(nodes.len());

    for (i, node) in nodes.iter().enumerate() {
      let name = node.node_name().to_string();
      if index.insert(name.clone(), i).is_some() {
        return Err(WorkflowError::DuplicateName(name));
      }
      names.push(name);
    }

    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (i, node) in nodes.iter().enumerate() {
      for dep in node.dependencies() {
        let Some(&dep_idx) = index.get(dep) else {
          return Err(WorkflowError::UnknownDependency {
            node: names[i].clone(),
            dependency: dep.clone(),
          });
        };
        // Repeated entries count once.
        if !dependencies[i].contains(&dep_idx) {
          dependencies[i].push(dep_idx);
          dependents[dep_idx].push(i);
        }
      }
    }

    let in_degree = dependencies.iter().map(Vec::len).collect();

    let graph = Self {
      names,
      index,
      dependencies,
      dependents,
      in_degree,
    };

    if let Some(path) = graph.find_cycle() {
      return Err(WorkflowError::CircularDependency { path });
    }

    Ok(graph)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// Name of the node at `idx`.
  pub fn name(&self, idx: usize) -> &str {
    &self.names[idx]
  }

  /// Declaration index of a node.
  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.index.get(name).copied()
  }

  /// Nodes that depend on `idx`.
  pub fn dependents(&self, idx: usize) -> &[usize] {
    &self.dependents[idx]
  }

  /// Nodes `idx` depends on.
  pub fn dependencies(&self, idx: usize) -> &[usize] {
    &self.dependencies[idx]
  }

  /// Fresh copy of the initial in-degree counters for one scheduling pass.
  pub fn in_degrees(&self) -> Vec<usize> {
    self.in_degree.clone()
  }

  /// Nodes with no dependencies, in declaration order.
  pub fn roots(&self) -> Vec<usize> {
    (0..self.len()).filter(|&i| self.in_degree[i] == 0).collect()
  }

  /// Every node that transitively depends on `idx`, excluding `idx` itself.
  pub fn transitive_dependents(&self, idx: usize) -> Vec<usize> {
    let mut seen = vec![false; self.len()];
    let mut stack = self.dependents[idx].clone();
    let mut out = Vec::new();

    while let Some(next) = stack.pop() {
      if seen[next] {
        continue;
      }
      seen[next] = true;
      out.push(next);
      stack.extend_from_slice(&self.dependents[next]);
    }

    out.sort_unstable();
    out
  }

  /// Depth-first search along `depends_on` edges, returning the first cycle
  /// found as a closed path (`A -> B -> A`).
  fn find_cycle(&self) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; self.len()];
    let mut stack = Vec::new();

    for start in 0..self.len() {
      if marks[start] == Mark::Unvisited
        && let Some(cycle) = self.visit(start, &mut marks, &mut stack)
      {
        return Some(cycle);
      }
    }

    None
  }

  fn visit(&self, node: usize, marks: &mut [Mark], stack: &mut Vec<usize>) -> Option<Vec<String>> {
    marks[node] = Mark::InProgress;
    stack.push(node);

    for &dep in &self.dependencies[node] {
      match marks[dep] {
        Mark::InProgress => {
          let start = stack.iter().position(|&n| n == dep)?;
          let mut path: Vec<String> = stack[start..]
            .iter()
            .map(|&i| self.names[i].clone())
            .collect();
          path.push(self.names[dep].clone());
          return Some(path);
        }
        Mark::Unvisited => {
          if let Some(cycle) = self.visit(dep, marks, stack) {
            return Some(cycle);
          }
        }
        Mark::Done => {}
      }
    }

    stack.pop();
    marks[node] = Mark::Done;
    None
  }
}
