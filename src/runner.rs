//! Objective Runner
//!
//! Drives a shared manager from the tokio runtime: a fixed-rate tick loop
//! and line commands for externally driven objectives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::objective::ObjectiveManager;

pub type SharedManager = Arc<Mutex<ObjectiveManager>>;

/// Tick the manager every `interval` until the task is aborted
pub fn spawn_tick_loop(manager: SharedManager, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            manager.lock().await.tick(interval);
        }
    })
}

/// A single operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Increment { id: String, amount: u32 },
    Complete { id: String },
    Fail { id: String },
    Reset { id: String },
    Restart { id: String },
    Flag { name: String, value: String },
    Unflag { name: String },
    Status,
}

impl Command {
    /// Parse one line such as `increment kill_slimes 2` or `flag door open`
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| "Empty command".to_string())?;
        let mut arg = |what: &str| {
            parts
                .next()
                .map(str::to_string)
                .ok_or_else(|| format!("'{}' needs {}", verb, what))
        };

        let command = match verb.to_lowercase().as_str() {
            "increment" | "inc" => {
                let id = arg("an id")?;
                let amount = match arg("an amount") {
                    Ok(raw) => raw
                        .parse()
                        .map_err(|e| format!("Invalid amount '{}': {}", raw, e))?,
                    Err(_) => 1,
                };
                Command::Increment { id, amount }
            }
            "complete" => Command::Complete { id: arg("an id")? },
            "fail" => Command::Fail { id: arg("an id")? },
            "reset" => Command::Reset { id: arg("an id")? },
            "restart" => Command::Restart { id: arg("a group id")? },
            "flag" | "set" => Command::Flag {
                name: arg("a flag name")?,
                value: arg("a value").unwrap_or_else(|_| "true".to_string()),
            },
            "unflag" | "clear" => Command::Unflag {
                name: arg("a flag name")?,
            },
            "status" => Command::Status,
            other => return Err(format!("Unknown command '{}'", other)),
        };

        Ok(command)
    }

    /// Execute against the manager. Returns text to show the operator.
    pub fn apply(&self, manager: &mut ObjectiveManager) -> Option<String> {
        match self {
            Command::Increment { id, amount } => {
                warn_unknown(manager, id);
                manager.increment_successes_by(id, *amount);
            }
            Command::Complete { id } => {
                warn_unknown(manager, id);
                manager.complete(id);
            }
            Command::Fail { id } => {
                warn_unknown(manager, id);
                manager.fail(id);
            }
            Command::Reset { id } => {
                warn_unknown(manager, id);
                manager.reset(id);
            }
            Command::Restart { id } => {
                if manager.group_state(id).is_none() {
                    warn!("'{}' is not a registered group", id);
                }
                manager.restart_group(id);
            }
            Command::Flag { name, value } => {
                info!("Flag '{}' set to '{}'", name, value);
                manager.set_flag(name, value);
            }
            Command::Unflag { name } => {
                manager.clear_flag(name);
            }
            Command::Status => {
                return Some(
                    serde_json::to_string_pretty(&manager.snapshot())
                        .unwrap_or_else(|e| format!("Failed to render status: {}", e)),
                );
            }
        }
        None
    }
}

fn warn_unknown(manager: &ObjectiveManager, id: &str) {
    if !manager.is_registered(id) {
        warn!("'{}' is not registered, ignoring", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::{ConditionSpec, Definition, Objective, ObjectiveGroup};

    #[test]
    fn test_command_parsing() {
        assert_eq!(
            Command::parse("increment kill_slimes 3"),
            Ok(Command::Increment { id: "kill_slimes".into(), amount: 3 })
        );
        assert_eq!(
            Command::parse("inc kill_slimes"),
            Ok(Command::Increment { id: "kill_slimes".into(), amount: 1 })
        );
        assert_eq!(
            Command::parse("flag door"),
            Ok(Command::Flag { name: "door".into(), value: "true".into() })
        );
        assert_eq!(Command::parse("  STATUS "), Ok(Command::Status));
        assert!(Command::parse("").is_err());
        assert!(Command::parse("complete").is_err());
        assert!(Command::parse("increment a lots").is_err());
        assert!(Command::parse("dance").is_err());
    }

    #[test]
    fn test_command_apply() {
        let mut manager = ObjectiveManager::new();
        let chapter: Definition = ObjectiveGroup::sequential(
            "chapter",
            vec![Objective::new("a", 2).into(), Objective::new("b", 1).into()],
        )
        .into();
        manager.register(&chapter);

        Command::parse("increment a 2").unwrap().apply(&mut manager);
        assert!(manager.is_complete("a"));
        Command::parse("fail b").unwrap().apply(&mut manager);
        assert!(manager.is_failed("chapter"));

        Command::parse("restart chapter").unwrap().apply(&mut manager);
        assert_eq!(manager.success_count("a"), 0);
        assert!(!manager.is_failed("chapter"));

        let status = Command::Status.apply(&mut manager).unwrap();
        assert!(status.contains("\"chapter\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_drives_polling() {
        let mut manager = ObjectiveManager::new();
        let watch = Objective::new("hold", 2)
            .polled_by(ConditionSpec::Flag { name: "holding".into(), equals: None }.build());
        manager.register(&watch.into());
        manager.set_flag("holding", "yes");

        let shared: SharedManager = Arc::new(Mutex::new(manager));
        let handle = spawn_tick_loop(shared.clone(), Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(175)).await;
        handle.abort();

        let manager = shared.lock().await;
        assert!(manager.is_complete("hold"));
        assert!(manager.elapsed() >= Duration::from_millis(100));
    }
}
