use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FocusError, FocusResult};

use super::{
    controller::{FocusController, StatusReport},
    state::ConfigOverrides,
};

/// Requests accepted from UI surfaces, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    GetStatus,
    StartFocus {
        #[serde(default)]
        minutes: Option<Value>,
    },
    StopFocus,
    #[serde(alias = "startPomodoro")]
    StartCycle {
        #[serde(default)]
        settings: ConfigOverrides,
    },
    #[serde(alias = "stopPomodoro")]
    StopCycle,
    #[serde(alias = "stats:addTasksDone")]
    AddTasksDoneDelta { delta: i64 },
    #[serde(alias = "stats:addPauseReason")]
    AddPauseReason { reason: String },
    AddBlockedSite { domain: String },
    RemoveBlockedSite { domain: String },
    ListBlockedSites,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Status(Box<StatusReport>),
    Blocklist { ok: bool, blocklist: Vec<String> },
    Ack { ok: bool },
}

impl Reply {
    fn ack() -> Self {
        Reply::Ack { ok: true }
    }
}

/// Run one command to completion. The reply is sent only after the state is
/// committed and rules are resynced.
pub async fn dispatch(controller: &FocusController, command: Command) -> FocusResult<Reply> {
    match command {
        Command::GetStatus => Ok(Reply::Status(Box::new(controller.status().await?))),
        Command::StartFocus { minutes } => {
            controller.start_focus(minutes).await?;
            Ok(Reply::ack())
        }
        Command::StopFocus => {
            controller.stop_focus().await?;
            Ok(Reply::ack())
        }
        Command::StartCycle { settings } => {
            controller.start_cycle(settings).await?;
            Ok(Reply::ack())
        }
        Command::StopCycle => {
            controller.stop_cycle().await?;
            Ok(Reply::ack())
        }
        Command::AddTasksDoneDelta { delta } => {
            controller.record_task_completion_delta(delta).await?;
            Ok(Reply::ack())
        }
        Command::AddPauseReason { reason } => {
            controller.record_pause_reason(&reason).await?;
            Ok(Reply::ack())
        }
        Command::AddBlockedSite { domain } => Ok(Reply::Blocklist {
            ok: true,
            blocklist: controller.add_blocked_site(&domain).await?,
        }),
        Command::RemoveBlockedSite { domain } => Ok(Reply::Blocklist {
            ok: true,
            blocklist: controller.remove_blocked_site(&domain).await?,
        }),
        Command::ListBlockedSites => Ok(Reply::Blocklist {
            ok: true,
            blocklist: controller.list_blocked_sites().await?,
        }),
    }
}

/// Parse a raw JSON request and dispatch it. Malformed requests are `InvalidInput`.
pub async fn dispatch_json(controller: &FocusController, raw: &str) -> FocusResult<Value> {
    let command: Command = serde_json::from_str(raw)
        .map_err(|err| FocusError::invalid(format!("unrecognized command: {err}")))?;
    let reply = dispatch(controller, command).await?;
    serde_json::to_value(reply).map_err(|err| FocusError::Persistence(err.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_message_shapes() {
        let start: Command =
            serde_json::from_value(json!({ "type": "startFocus", "minutes": 30 })).unwrap();
        assert_eq!(
            start,
            Command::StartFocus {
                minutes: Some(json!(30))
            }
        );

        let legacy: Command = serde_json::from_value(json!({
            "type": "startPomodoro",
            "settings": { "focusMinutes": 50 }
        }))
        .unwrap();
        match legacy {
            Command::StartCycle { settings } => {
                assert_eq!(settings.focus_minutes, Some(json!(50)))
            }
            other => panic!("unexpected command {other:?}"),
        }

        let tasks: Command =
            serde_json::from_value(json!({ "type": "stats:addTasksDone", "delta": -1 })).unwrap();
        assert_eq!(tasks, Command::AddTasksDoneDelta { delta: -1 });

        let bare: Command = serde_json::from_value(json!({ "type": "startCycle" })).unwrap();
        assert_eq!(
            bare,
            Command::StartCycle {
                settings: ConfigOverrides::default()
            }
        );
    }

    #[test]
    fn rejects_unknown_types() {
        assert!(serde_json::from_value::<Command>(json!({ "type": "selfDestruct" })).is_err());
        assert!(serde_json::from_value::<Command>(json!({ "minutes": 5 })).is_err());
    }

    #[test]
    fn ack_serializes_as_ok_flag() {
        assert_eq!(serde_json::to_value(Reply::ack()).unwrap(), json!({ "ok": true }));
    }
}
