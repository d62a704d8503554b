use std::fmt;

use super::graph::{Graph, Node};

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func @{}(", self.entry.name)?;
        for (idx, input) in self.inputs.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "%in{idx} \"{}\": {}", input.name, input.spec)?;
        }
        f.write_str(")")?;
        if !self.entry.attrs.is_empty() {
            f.write_str(" attributes {")?;
            for (idx, (name, value)) in self.entry.attrs.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{name} = {value}")?;
            }
            f.write_str("}")?;
        }
        writeln!(f, " {{")?;
        for param in &self.params {
            writeln!(f, "  param @{}: {}", param.name, param.spec)?;
        }
        for node in &self.nodes {
            writeln!(f, "  {}", NodeLine(node))?;
        }
        f.write_str("  return")?;
        for (idx, output) in self.outputs.iter().enumerate() {
            let sep = if idx == 0 { " " } else { ", " };
            write!(f, "{sep}%{}", output.0)?;
        }
        writeln!(f)?;
        f.write_str("}")
    }
}

struct NodeLine<'a>(&'a Node);

impl fmt::Display for NodeLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.0;
        write!(f, "%{} \"{}\" = {}(", node.id.0, node.name, node.op)?;
        for (idx, input) in node.inputs.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{input}")?;
        }
        f.write_str(")")?;
        if !node.attrs.is_empty() {
            f.write_str(" {")?;
            for (idx, (name, value)) in node.attrs.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{name} = {value}")?;
            }
            f.write_str("}")?;
        }
        write!(f, " -> {}", node.output)
    }
}
