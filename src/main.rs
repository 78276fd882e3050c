//! Interactive producer for the arithmetic stages
//!
//! Type stage namespaces one per line to build a route, `go` to submit it.

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use stagehand::{FnSink, Manager, ManagerBuilder, RequestId, StageRegistry};

const HELP: &str = "\
commands:
  <namespace>   append a stage to the pending route
  go            submit the pending route
  value <n>     set the initial value (default 0)
  list          show registered stages
  quit          drain and exit";

#[derive(Debug, PartialEq)]
enum Command {
    Stage(String),
    Go,
    Value(Value),
    List,
    Help,
    Quit,
    Empty,
}

fn parse(line: &str) -> Result<Command> {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    let command = match parts.next() {
        None => Command::Empty,
        Some("go") => Command::Go,
        Some("list") => Command::List,
        Some("help") => Command::Help,
        Some("quit") | Some("exit") => Command::Quit,
        Some("value") => {
            let raw = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("usage: value <n>"))?;
            let value: Value = serde_json::from_str(raw)
                .map_err(|_| anyhow::anyhow!("'{}' is not a number", raw))?;
            if !value.is_number() {
                anyhow::bail!("'{}' is not a number", raw);
            }
            Command::Value(value)
        }
        Some(namespace) => Command::Stage(namespace.to_string()),
    };
    Ok(command)
}

struct Session {
    route: Vec<String>,
    value: Value,
}

impl Session {
    fn new() -> Self {
        Self {
            route: Vec::new(),
            value: json!(0),
        }
    }

    /// Returns false once the session should end
    async fn handle(&mut self, manager: &Manager, command: Command) -> bool {
        match command {
            Command::Empty => {}
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
            Command::List => {
                for namespace in manager.namespaces() {
                    println!("  {}", namespace);
                }
            }
            Command::Value(value) => {
                println!("initial value set to {}", value);
                self.value = value;
            }
            Command::Stage(namespace) => {
                if manager.namespaces().contains(&namespace) {
                    self.route.push(namespace);
                    println!("route: {}", self.route.join(" -> "));
                } else {
                    println!("unknown stage '{}', try `list`", namespace);
                }
            }
            Command::Go => {
                let route = std::mem::take(&mut self.route);
                match manager.submit(self.value.clone(), route).await {
                    Ok(id) => println!("submitted {}", id),
                    Err(e) => println!("rejected: {}", e),
                }
            }
        }
        true
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    stagehand::logging::init("stagehand=info")?;

    let sink = FnSink::new(|id: &RequestId, value: Value| {
        println!("done {} = {}", id, value);
    });
    let manager = ManagerBuilder::new()
        .with_registry(StageRegistry::arithmetic()?)
        .with_name("stagehand-repl")
        .with_sink(Arc::new(sink))
        .build()
        .await?;

    println!("{}", HELP);
    let mut session = Session::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse(&line) {
            Ok(command) => {
                if !session.handle(&manager, command).await {
                    break;
                }
            }
            Err(e) => println!("{}", e),
        }
    }

    let report = manager.shutdown().await?;
    if !report.worker_failures.is_empty() {
        warn!(failures = report.worker_failures.len(), "Some workers failed");
    }
    println!(
        "submitted {}, completed {}, lost {}",
        report.submitted, report.completed, report.lost
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("go").unwrap(), Command::Go);
        assert_eq!(parse("  list ").unwrap(), Command::List);
        assert_eq!(parse("").unwrap(), Command::Empty);
        assert_eq!(parse("quit").unwrap(), Command::Quit);
        assert_eq!(
            parse("module_add").unwrap(),
            Command::Stage("module_add".to_string())
        );
        assert_eq!(parse("value 2.5").unwrap(), Command::Value(json!(2.5)));
        assert!(parse("value").is_err());
        assert!(parse("value ten").is_err());
    }

    #[tokio::test]
    async fn test_session_builds_and_submits_route() {
        let (sink, mut rx) = stagehand::ChannelSink::new();
        let manager = ManagerBuilder::new()
            .with_registry(StageRegistry::arithmetic().unwrap())
            .with_sink(Arc::new(sink))
            .build()
            .await
            .unwrap();

        let mut session = Session::new();
        for line in ["value 1", "module_add", "bogus", "module_multiply", "go"] {
            assert!(session.handle(&manager, parse(line).unwrap()).await);
        }
        assert!(session.route.is_empty());

        let done = rx.recv().await.unwrap();
        assert_eq!(done.value, json!(22));
        assert!(!session.handle(&manager, Command::Quit).await);
        manager.shutdown().await.unwrap();
    }
}
