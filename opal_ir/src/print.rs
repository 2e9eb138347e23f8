//! Human-readable graph listings for debugging and test failure output.

use crate::graph::Graph;
use crate::node::{InputType, NodeId};

/// Borrowing pretty-printer; obtained through [`Graph::listing`].
pub struct GraphListing<'g> {
    graph: &'g Graph,
}

impl Graph {
    /// A listing of every live node with its edges and stamp.
    pub fn listing(&self) -> GraphListing<'_> {
        GraphListing { graph: self }
    }
}

fn edge_tag(ty: InputType) -> &'static str {
    match ty {
        InputType::Value => "v",
        InputType::Condition => "c",
        InputType::State => "st",
        InputType::Guard => "g",
        InputType::Anchor => "a",
        InputType::Memory => "m",
        InputType::Association => "assoc",
        InputType::Extension => "x",
    }
}

impl std::fmt::Display for GraphListing<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "graph: {} live nodes, stage {:?}",
            self.graph.live_count(),
            self.graph.stage()
        )?;
        for (id, node) in self.graph.live_nodes() {
            write!(f, "  {:>5}  {}", format!("{:?}", id), node)?;
            if !node.inputs().is_empty() {
                write!(f, " [")?;
                for (i, input) in node.inputs().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}:{:?}", edge_tag(input.ty), input.node)?;
                }
                write!(f, "]")?;
            }
            let wired: Vec<NodeId> = node
                .successors()
                .iter()
                .copied()
                .filter(|s| s.is_valid())
                .collect();
            if !wired.is_empty() {
                write!(f, " ->")?;
                for succ in wired {
                    write!(f, " {:?}", succ)?;
                }
            }
            if node.stamp().produces_value() {
                write!(f, " : {}", node.stamp())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::Graph;

    #[test]
    fn test_listing_mentions_every_live_node() {
        let mut g = Graph::new();
        let entry = g.append_begin(g.start);
        let c = g.const_int(42);
        g.append_return(entry, Some(c));

        let listing = g.listing().to_string();
        assert!(listing.contains("Start"));
        assert!(listing.contains("Constant(42)"));
        assert!(listing.contains("Return"));
        // Killed nodes disappear from the listing.
        let dead = g.const_int(7);
        g.kill(dead);
        assert!(!g.listing().to_string().contains("Constant(7)"));
    }
}
