// SPDX-License-Identifier: MIT OR Apache-2.0
//! `procgraph` - inspect, interpret and compile procgraph documents.
//!
//! ```text
//! procgraph <document.ron> [list | eval <function> | glsl <function> [image|buffer]]
//! ```
//!
//! Log verbosity follows `RUST_LOG`.

use procgraph_core::{Graph, GraphError, GraphSnapshot, OutputTarget};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Command line errors
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Usage: procgraph <document.ron> [list | eval <function> | glsl <function> [image|buffer]]")]
    Usage,

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse document: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("No function named '{0}'")]
    UnknownFunction(String),

    #[error("Function '{0}' produced no result")]
    NoResult(String),
}

/// What to do with the loaded document
#[derive(Debug, PartialEq, Eq)]
enum Command {
    List,
    Eval(String),
    Glsl(String, OutputTarget),
}

fn parse_args(args: &[String]) -> Result<(PathBuf, Command), CliError> {
    let Some(path) = args.first() else {
        return Err(CliError::Usage);
    };
    let rest: Vec<&str> = args[1..].iter().map(String::as_str).collect();
    let command = match rest.as_slice() {
        [] | ["list"] => Command::List,
        ["eval", name] => Command::Eval(name.to_string()),
        ["glsl", name] | ["glsl", name, "buffer"] => {
            Command::Glsl(name.to_string(), OutputTarget::Buffer)
        }
        ["glsl", name, "image"] => Command::Glsl(name.to_string(), OutputTarget::Image),
        _ => return Err(CliError::Usage),
    };
    Ok((PathBuf::from(path), command))
}

fn load(path: &PathBuf) -> Result<Graph, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.clone(),
        source,
    })?;
    let snapshot = GraphSnapshot::from_ron(&text)?;
    let graph = snapshot.restore()?;
    tracing::info!(
        "Loaded '{}' with {} functions from {}",
        graph.name,
        graph.functions().len(),
        path.display()
    );
    Ok(graph)
}

fn run(document: &Graph, command: Command) -> Result<String, CliError> {
    let scope = document.environment();
    let env = scope.env();
    match command {
        Command::List => {
            let mut out = String::new();
            for function in document.functions() {
                let Some(f) = function.try_lock() else {
                    continue;
                };
                out.push_str(&format!("{} ({})\n", f.name(), f.id()));
            }
            Ok(out)
        }
        Command::Eval(name) => {
            let function = document
                .function_by_name(&name)
                .ok_or_else(|| CliError::UnknownFunction(name.clone()))?;
            let value = function
                .evaluate(&env, &[])
                .ok_or(CliError::NoResult(name))?;
            Ok(format!("{value:?}\n"))
        }
        Command::Glsl(name, target) => {
            let function = document
                .function_by_name(&name)
                .ok_or_else(|| CliError::UnknownFunction(name.clone()))?;
            let source = function.lock().program_source(&env, target);
            source.ok_or(CliError::NoResult(name))
        }
    }
}

fn main() -> ExitCode {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("procgraph_core=info,procgraph=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = parse_args(&args).and_then(|(path, command)| {
        let document = load(&path)?;
        run(&document, command)
    });

    match result {
        Ok(out) => {
            print!("{out}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procgraph_core::graphs::function::Function;
    use procgraph_core::nodes::arithmetic::{BinaryMath, BinaryOp};
    use procgraph_core::nodes::constant::Constant;
    use procgraph_core::nodes::flow::Execute;
    use procgraph_core::{InputRef, OutputRef, Value};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn document() -> Graph {
        let mut f = Function::new("Answer");
        let exec = f.graph_mut().add_node(Execute);
        let a = f.graph_mut().add_node(Constant::float(40.0));
        let b = f.graph_mut().add_node(Constant::float(2.0));
        let add = f.graph_mut().add_node(BinaryMath::new(BinaryOp::Add));
        f.connect(OutputRef::new(exec, 0), InputRef::new(add, 0)).unwrap();
        f.connect(OutputRef::new(a, 0), InputRef::new(add, 1)).unwrap();
        f.connect(OutputRef::new(b, 0), InputRef::new(add, 2)).unwrap();
        f.set_output(Some(add));
        let mut graph = Graph::new("doc");
        graph.add_function(f);
        graph
    }

    #[test]
    fn test_parse_args() {
        assert!(matches!(parse_args(&[]), Err(CliError::Usage)));
        let (path, command) = parse_args(&args(&["doc.ron"])).unwrap();
        assert_eq!(path, PathBuf::from("doc.ron"));
        assert_eq!(command, Command::List);
        let (_, command) = parse_args(&args(&["doc.ron", "glsl", "F", "image"])).unwrap();
        assert_eq!(command, Command::Glsl("F".to_string(), OutputTarget::Image));
        assert!(parse_args(&args(&["doc.ron", "frobnicate"])).is_err());
    }

    #[test]
    fn test_eval_and_list() {
        let graph = document();
        let listed = run(&graph, Command::List).unwrap();
        assert!(listed.starts_with("Answer ("));
        let out = run(&graph, Command::Eval("Answer".to_string())).unwrap();
        assert_eq!(out, format!("{:?}\n", Value::Float(42.0)));
        assert!(matches!(
            run(&graph, Command::Eval("Missing".to_string())),
            Err(CliError::UnknownFunction(_))
        ));
    }
}
