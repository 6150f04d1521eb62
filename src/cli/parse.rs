//! The `parse` command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use super::{OutputFormat, ProjectArgs};
use crate::compiler::Compiler;
use crate::core::ParseError;
use crate::table::Resource;

/// Parse a project and list its resources and errors.
#[derive(Args, Debug, Clone)]
pub struct ParseCommand {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Output format: text or json
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Exit with an error if the project has any parse errors
    #[arg(long)]
    pub strict: bool,
}

#[derive(Serialize)]
struct ParseReport<'a> {
    olap_connector: &'a str,
    resources: Vec<&'a Resource>,
    errors: &'a [ParseError],
}

impl ParseCommand {
    pub fn execute(self) -> Result<()> {
        let compiler = self.project.compile()?;
        match self.format {
            OutputFormat::Json => {
                let report = ParseReport {
                    olap_connector: compiler.olap_connector(),
                    resources: compiler.resources().values().collect(),
                    errors: compiler.errors(),
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => print!("{}", render_text(&compiler)),
        }

        let errors = compiler.errors().len();
        if self.strict && errors > 0 {
            anyhow::bail!("project has {errors} parse error(s)");
        }
        Ok(())
    }
}

fn render_text(compiler: &Compiler) -> String {
    let mut out = String::new();
    for resource in compiler.resources().values() {
        out.push_str(&format!(
            "{} {}\n",
            resource.name.kind.to_string().cyan(),
            resource.name.name.bold()
        ));
        out.push_str(&format!("  paths: {}\n", resource.paths.join(", ")));
        if !resource.refs.is_empty() {
            let refs: Vec<String> = resource.refs.iter().map(ToString::to_string).collect();
            out.push_str(&format!("  refs:  {}\n", refs.join(", ")));
        }
    }

    for error in compiler.errors() {
        out.push_str(&error.display_colored());
        out.push('\n');
    }

    let summary = format!(
        "{} resource(s), {} error(s)",
        compiler.resources().len(),
        compiler.errors().len()
    );
    if compiler.errors().is_empty() {
        out.push_str(&format!("{} {}\n", "✓".green(), summary));
    } else {
        out.push_str(&format!("{} {}\n", "✗".red(), summary));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerOptions;
    use crate::repo::MemoryRepo;
    use std::sync::Arc;

    #[test]
    fn test_render_text_lists_resources_and_errors() {
        colored::control::set_override(false);
        let repo = Arc::new(MemoryRepo::from_files([
            ("rill.yaml", ""),
            ("models/m1.sql", "SELECT 1"),
            ("models/m2.sql", "SELECT * FROM m1"),
            ("themes/bad.yaml", "type: theme\ncolors: [1"),
        ]));
        let compiler = Compiler::parse(repo, CompilerOptions::default()).unwrap();
        let text = render_text(&compiler);

        assert!(text.contains("model m1\n"));
        assert!(text.contains("  refs:  model/m1\n"));
        assert!(text.contains("/themes/bad.yaml"));
        assert!(text.ends_with("2 resource(s), 1 error(s)\n"));
    }
}
