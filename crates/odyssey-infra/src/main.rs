//! Command-line entry point: validate a project or print its stack plan.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use log::info;
use odyssey_infra::config::{ProjectLayout, ValidationMode};
use odyssey_infra::{StackError, StackOptions, plan_stack};
use std::fs;
use std::path::PathBuf;

/// Command-line options.
#[derive(Debug, Parser)]
#[command(
    name = "odyssey-infra",
    version,
    about = "Resolve and validate Odyssey infrastructure config"
)]
struct Cli {
    /// Project root holding project.json
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Environment to plan instead of the one in project.json
    #[arg(long, global = true)]
    env: Option<String>,
    /// Extra placeholder variable as KEY=VALUE; may be repeated
    #[arg(long = "var", global = true, value_parser = parse_variable)]
    vars: Vec<(String, String)>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check every resource and report all errors at once
    Validate,
    /// Build the stack plan and print it as JSON
    Synth {
        /// Write the plan to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    fn options(&self, mode: ValidationMode) -> StackOptions {
        let mut options = StackOptions::new().with_mode(mode);
        if let Some(env) = &self.env {
            options = options.with_env(env);
        }
        for (name, value) in &self.vars {
            options = options.with_variable(name, value);
        }
        options
    }
}

fn main() -> anyhow::Result<()> {
    odyssey_infra::init_logging();

    let cli = Cli::parse();
    let layout = ProjectLayout::new(&cli.root);
    info!(
        "starting odyssey-infra (root={}, env={:?}, vars={})",
        layout.root().display(),
        cli.env,
        cli.vars.len()
    );

    match &cli.command {
        Command::Validate => {
            let options = cli.options(ValidationMode::Aggregate);
            match plan_stack(&layout, &options) {
                Ok(plan) => {
                    println!(
                        "configuration is valid for env '{}' ({} resources)",
                        plan.environment.name,
                        plan.len()
                    );
                    Ok(())
                }
                Err(err) => report_failure(&err),
            }
        }
        Command::Synth { output } => {
            let options = cli.options(ValidationMode::FailFast);
            let plan = match plan_stack(&layout, &options) {
                Ok(plan) => plan,
                Err(err) => return report_failure(&err),
            };
            let json =
                serde_json::to_string_pretty(&plan).context("failed to serialize stack plan")?;
            match output {
                Some(path) => {
                    fs::write(path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!("stack plan written (path={})", path.display());
                }
                None => println!("{json}"),
            }
            Ok(())
        }
    }
}

fn report_failure(err: &StackError) -> anyhow::Result<()> {
    let messages = err.messages();
    for message in &messages {
        eprintln!("error: {message}");
    }
    bail!("configuration check failed with {} error(s)", messages.len())
}

/// Parse `KEY=VALUE`; keys use the placeholder name alphabet.
fn parse_variable(raw: &str) -> Result<(String, String), String> {
    let Some((name, value)) = raw.split_once('=') else {
        return Err(format!("expected KEY=VALUE, got '{raw}'"));
    };
    if name.is_empty() || !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return Err(format!("variable name must match [A-Za-z0-9_]+, got '{name}'"));
    }
    Ok((name.to_string(), value.to_string()))
}
