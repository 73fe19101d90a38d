//! dagfold CLI
//!
//! Evaluate and validate dagfold program files.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use dagfold_core::{Graph, Node, Root, Value};
use dagfold_runtime::{Engine, EngineConfig, FoldState, Registry, standard, standard_reference};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dagfold")]
#[command(about = "dagfold - evaluate DAG programs with a stack-safe fold engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a program and print its value
    Run {
        /// Path to program file
        #[arg(short, long)]
        file: PathBuf,
        /// Abort after this many handler resumptions
        #[arg(long)]
        max_steps: Option<u64>,
        /// Use the one-at-a-time par_map
        #[arg(long)]
        reference: bool,
    },
    /// Check a program file without evaluating it
    Validate {
        /// Path to program file
        #[arg(short, long)]
        file: PathBuf,
    },
}

/// Program file: a node arena and the entry to evaluate
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgramFile {
    graph: Graph,
    entry: Root,
}

fn load_program(path: &Path) -> Result<ProgramFile> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let program: ProgramFile = serde_json::from_str(&text)
        .wrap_err_with(|| format!("failed to parse {}", path.display()))?;
    program.graph.validate()?;
    let entry = program.entry.node();
    if program.graph.get(entry).is_none() {
        return Err(eyre!("entry {entry} is not in the graph"));
    }
    Ok(program)
}

fn registry(reference: bool) -> Registry {
    if reference {
        standard_reference()
    } else {
        standard()
    }
}

/// Tags used by the program that no built-in handler covers
fn unknown_tags(graph: &Graph, registry: &Registry) -> Vec<String> {
    let mut unknown: Vec<String> = graph
        .iter()
        .map(|(_, node)| node.tag.as_str())
        .filter(|tag| *tag != Node::PARAM_TAG && !registry.contains(tag))
        .map(str::to_string)
        .collect();
    unknown.sort();
    unknown.dedup();
    unknown
}

async fn run(program: ProgramFile, config: EngineConfig, reference: bool) -> Result<Value> {
    let engine = Engine::new(program.graph, registry(reference)).with_config(config);
    let mut state = FoldState::new();
    let value = engine.fold(program.entry, &mut state).await?;

    let stats = state.stats();
    info!(
        handler_runs = stats.handler_runs,
        cache_hits = stats.cache_hits,
        steps = stats.steps,
        max_depth = stats.max_depth,
        "fold complete"
    );
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dagfold=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            max_steps,
            reference,
        } => {
            let program = load_program(&file)?;
            let config = EngineConfig {
                max_steps,
            };
            let value = run(program, config, reference).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Commands::Validate { file } => {
            let program = load_program(&file)?;
            for tag in unknown_tags(&program.graph, &standard()) {
                warn!(%tag, "no built-in handler; evaluation fails if this tag is reached");
            }
            println!(
                "{}: {} nodes, entry {}",
                file.display(),
                program.graph.len(),
                program.entry.node()
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_program(value: &serde_json::Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file
    }

    fn try_catch_program() -> serde_json::Value {
        json!({
            "graph": {"nodes": [
                {"tag": "core/literal", "payload": {"literal": "boom"}},
                {"tag": "error/fail", "payload": {"child": 0}},
                {"tag": "core/param", "payload": {"param": 9001}},
                {"tag": "core/list", "payload": {"args": [2, 2]}},
                {"tag": "error/try", "payload": {"try": {
                    "expr": 1,
                    "catch": {"param": 9001, "body": 3},
                    "matches": null,
                    "finally": null
                }}}
            ]},
            "entry": {"ast": {"result": 4}, "source": "test"}
        })
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from(["dagfold", "run", "--file", "p.json", "--max-steps", "10", "--reference"]).unwrap();
        match cli.command {
            Commands::Run {
                file,
                max_steps,
                reference,
            } => {
                assert_eq!(file, PathBuf::from("p.json"));
                assert_eq!(max_steps, Some(10));
                assert!(reference);
            }
            Commands::Validate { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_load_program() {
        let file = write_program(&try_catch_program());
        let program = load_program(file.path()).unwrap();
        assert_eq!(program.graph.len(), 5);
        assert_eq!(program.entry.node().as_u32(), 4);
    }

    #[test]
    fn test_load_rejects_forward_reference() {
        let file = write_program(&json!({
            "graph": {"nodes": [{"tag": "core/list", "payload": {"args": [1]}}, {"tag": "core/literal", "payload": {"literal": 1}}]},
            "entry": 0
        }));
        assert!(load_program(file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_missing_entry() {
        let file = write_program(&json!({
            "graph": {"nodes": [{"tag": "core/literal", "payload": {"literal": 1}}]},
            "entry": 3
        }));
        let err = load_program(file.path()).unwrap_err();
        assert!(err.to_string().contains("node_3"));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(load_program(file.path()).is_err());
    }

    #[test]
    fn test_unknown_tags() {
        let file = write_program(&json!({
            "graph": {"nodes": [
                {"tag": "plugin/b", "payload": "empty"},
                {"tag": "plugin/a", "payload": "empty"},
                {"tag": "plugin/b", "payload": "empty"},
                {"tag": "core/param", "payload": {"param": 1}}
            ]},
            "entry": 0
        }));
        let program = load_program(file.path()).unwrap();
        assert_eq!(unknown_tags(&program.graph, &standard()), vec!["plugin/a", "plugin/b"]);
    }

    #[tokio::test]
    async fn test_run_program_file() {
        let file = write_program(&try_catch_program());
        let program = load_program(file.path()).unwrap();
        let value = run(program, EngineConfig::default(), false).await.unwrap();
        assert_eq!(value, json!(["boom", "boom"]));
    }

    #[tokio::test]
    async fn test_run_respects_step_limit() {
        let file = write_program(&try_catch_program());
        let program = load_program(file.path()).unwrap();
        let config = EngineConfig::new().with_max_steps(1);
        assert!(run(program, config, true).await.is_err());
    }
}
