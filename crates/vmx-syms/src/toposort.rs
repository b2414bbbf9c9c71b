//! Deterministic topological sort with a tie-break by declaration
//! position, shared by struct field ordering (§4.8) and the package
//! build graph layout (§4.6). Grounded on the `toposort.Sorter` used
//! from `pl/sempass/struct.go` in `examples/original_source/`.

use crate::pos::Pos;

struct Node {
    name: String,
    pos: Pos,
    deps: Vec<String>,
}

/// Accumulates named nodes with their dependency lists, then produces
/// a topological order or a cycle diagnostic.
pub struct Sorter {
    kind: &'static str,
    nodes: Vec<Node>,
}

/// A true cycle, naming every participant in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub kind: &'static str,
    pub participants: Vec<(String, Pos)>,
}

impl Cycle {
    pub fn message(&self) -> String {
        let names: Vec<&str> = self.participants.iter().map(|(n, _)| n.as_str()).collect();
        format!("cyclic {} dependency: {}", self.kind, names.join(" -> "))
    }
}

impl Sorter {
    /// `kind` is a short noun used in the cycle message ("struct",
    /// "package").
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
        }
    }

    pub fn add_node(&mut self, name: impl Into<String>, pos: Pos, deps: Vec<String>) {
        self.nodes.push(Node {
            name: name.into(),
            pos,
            deps,
        });
    }

    /// Kahn's algorithm, but among nodes with satisfied dependencies at
    /// each step we always pick the one declared earliest — this is
    /// the deterministic tie-break §3 and §4.8 require.
    pub fn sort(self) -> Result<Vec<String>, Cycle> {
        let index: std::collections::HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; self.nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, n) in self.nodes.iter().enumerate() {
            for dep in &n.deps {
                if let Some(&di) = index.get(dep.as_str()) {
                    indegree[i] += 1;
                    dependents[di].push(i);
                }
            }
        }

        let mut done = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        loop {
            let ready = (0..self.nodes.len())
                .filter(|&i| !done[i] && indegree[i] == 0)
                .min();
            let Some(i) = ready else { break };
            done[i] = true;
            order.push(self.nodes[i].name.clone());
            for &dep_i in &dependents[i] {
                indegree[dep_i] -= 1;
            }
        }

        if order.len() != self.nodes.len() {
            let participants = (0..self.nodes.len())
                .filter(|&i| !done[i])
                .map(|i| (self.nodes[i].name.clone(), self.nodes[i].pos.clone()))
                .collect();
            return Err(Cycle {
                kind: self.kind,
                participants,
            });
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32) -> Pos {
        Pos::new("test.g", line, 1)
    }

    #[test]
    fn pointer_field_breaks_the_cycle() {
        // type A struct { b B }; type B struct { p *A }
        // B has no same-package value-embedded dep on A (pointer, so
        // the caller wouldn't add "A" to B's deps); order is B, A.
        let mut s = Sorter::new("struct");
        s.add_node("A", pos(1), vec!["B".into()]);
        s.add_node("B", pos(2), vec![]);
        assert_eq!(s.sort().unwrap(), vec!["B", "A"]);
    }

    #[test]
    fn true_value_cycle_is_rejected() {
        // type A struct { b B }; type B struct { a A }
        let mut s = Sorter::new("struct");
        s.add_node("A", pos(1), vec!["B".into()]);
        s.add_node("B", pos(2), vec!["A".into()]);
        let cycle = s.sort().unwrap_err();
        let names: Vec<_> = cycle.participants.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"A".to_string()));
        assert!(names.contains(&"B".to_string()));
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let mut s = Sorter::new("package");
        s.add_node("b", pos(2), vec![]);
        s.add_node("a", pos(1), vec![]);
        s.add_node("c", pos(3), vec!["a".into(), "b".into()]);
        assert_eq!(s.sort().unwrap(), vec!["b", "a", "c"]);
    }
}
