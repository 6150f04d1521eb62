//! The `graph` command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use super::{OutputFormat, ProjectArgs};
use crate::compiler::DependencyGraph;
use crate::core::ResourceName;

/// Print resources in dependency order.
#[derive(Args, Debug, Clone)]
pub struct GraphCommand {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Output format: text or json
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct GraphReport {
    order: Vec<ResourceName>,
    cycles: Vec<Vec<ResourceName>>,
}

impl GraphCommand {
    pub fn execute(self) -> Result<()> {
        let compiler = self.project.compile()?;
        let graph = compiler.dependency_graph();
        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built dependency graph"
        );

        let report = build_report(&graph);
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => {
                for (i, name) in report.order.iter().enumerate() {
                    let deps: Vec<String> =
                        graph.dependencies(name).iter().map(ToString::to_string).collect();
                    if deps.is_empty() {
                        println!("{:>3}. {}", i + 1, name.to_string().bold());
                    } else {
                        println!(
                            "{:>3}. {} {} {}",
                            i + 1,
                            name.to_string().bold(),
                            "<-".dimmed(),
                            deps.join(", ")
                        );
                    }
                }
                for cycle in &report.cycles {
                    let names: Vec<String> = cycle.iter().map(ToString::to_string).collect();
                    println!("{} cycle: {}", "⚠".yellow(), names.join(" -> "));
                }
            }
        }
        Ok(())
    }
}

/// Orders the acyclic part of the graph; resources on a cycle are listed
/// separately.
fn build_report(graph: &DependencyGraph) -> GraphReport {
    let cycles = graph.cycles();
    let order = match graph.topological_order() {
        Ok(order) => order,
        Err(_) => {
            let mut acyclic = DependencyGraph::default();
            let on_cycle = |name: &ResourceName| cycles.iter().any(|c| c.contains(name));
            for name in graph.names() {
                if on_cycle(&name) {
                    continue;
                }
                acyclic.add_node(name.clone());
                for dep in graph.dependencies(&name) {
                    if !on_cycle(&dep) {
                        acyclic.add_dependency(name.clone(), dep);
                    }
                }
            }
            acyclic.topological_order().unwrap_or_default()
        }
    };
    GraphReport { order, cycles }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceKind;

    fn model(name: &str) -> ResourceName {
        ResourceName::new(ResourceKind::Model, name)
    }

    #[test]
    fn test_report_skips_cycle_members() {
        let mut graph = DependencyGraph::default();
        graph.add_dependency(model("a"), model("b"));
        graph.add_dependency(model("b"), model("a"));
        graph.add_dependency(model("d"), model("c"));

        let report = build_report(&graph);
        assert_eq!(report.cycles, vec![vec![model("a"), model("b")]]);
        assert_eq!(report.order, vec![model("c"), model("d")]);
    }
}
