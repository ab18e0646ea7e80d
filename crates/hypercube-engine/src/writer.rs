//! Plan printer for compiled [`Calc`] trees.
//!
//! Produces an indented one-node-per-line rendering, with each node's
//! printable arguments in `name(key=value, ...)` form. Callers can attach
//! extra arguments to specific node *instances* (keyed by address, so two
//! structurally-equal nodes annotate independently) before printing; the
//! profiler uses this to show evaluation counts next to the plan.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use ahash::AHashMap;

use crate::calc::Calc;

fn node_key(node: &dyn Calc) -> usize {
    node as *const dyn Calc as *const () as usize
}

#[derive(Default)]
pub struct CalcWriter {
    overrides: AHashMap<usize, BTreeMap<String, String>>,
}

impl CalcWriter {
    pub fn new() -> Self {
        CalcWriter::default()
    }

    /// Attaches an extra printed argument to one node instance.
    pub fn set_argument(
        &mut self,
        node: &dyn Calc,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.overrides
            .entry(node_key(node))
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Renders the tree into `out`, appending.
    pub fn write(&self, root: &dyn Calc, out: &mut String) {
        self.write_node(root, 0, out);
    }

    fn write_node(&self, node: &dyn Calc, depth: usize, out: &mut String) {
        for _ in 0..depth {
            out.push_str("    ");
        }
        let name = node.name();
        out.push_str(if name.is_empty() { "?" } else { name });

        let mut args = BTreeMap::new();
        node.collect_arguments(&mut args);
        if let Some(extra) = self.overrides.get(&node_key(node)) {
            for (k, v) in extra {
                args.insert(k.clone(), v.clone());
            }
        }
        out.push('(');
        let mut first = true;
        for (k, v) in &args {
            if !first {
                out.push_str(", ");
            }
            first = false;
            let _ = write!(out, "{k}={v}");
        }
        out.push(')');
        out.push('\n');

        for child in node.children() {
            self.write_node(child, depth + 1, out);
        }
    }
}
