//! Run-record shape and the atomic-write convention used to persist it.
//!
//! Grounded on the original source's `PlannerExecutorSystem.dump_log` /
//! `SingleAgent.dump_log` (`json.dump` of a literal dict), reworked per §7's
//! "the coordinator guarantees the run log is written even on fatal paths"
//! policy and the donor's scoped-resource idiom for cleanup-on-drop
//! (`tempfile::NamedTempFile`): serialize to a temp file in the destination
//! directory, then atomically rename into place.

use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One of the documented terminal states a run can end in (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Solved,
    Giveup,
    Cost,
    MaxRounds,
    PlannerRounds,
    Error,
    Unknown,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::Solved => "solved",
            ExitReason::Giveup => "giveup",
            ExitReason::Cost => "cost",
            ExitReason::MaxRounds => "max_rounds",
            ExitReason::PlannerRounds => "planner_rounds",
            ExitReason::Error => "error",
            ExitReason::Unknown => "unknown",
        }
    }
}

/// Plain, JSON-serializable run record written atomically at teardown.
/// Shaped to cover both the planner-executor run (`planner` + `executors`)
/// and the single-agent run (`executor` only) by leaving the agent-specific
/// fields optional; a given run populates only the ones its topology has.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub start_time: String,
    pub end_time: String,
    pub time_taken_secs: f64,
    pub autoprompter_model: Option<String>,
    pub planner_model: Option<String>,
    pub executor_model: String,
    pub total_cost: f64,
    pub success: bool,
    pub exit_reason: String,
    pub error: Option<String>,
    pub autoprompter: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planner: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executors: Option<Vec<Vec<Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_errors: Option<Vec<Option<String>>>,
    pub debug_log: Vec<String>,
}

/// Serializes `record` and writes it atomically under
/// `<logdir>/<user>/<experiment>/<canonical_name>.json`, creating parent
/// directories as needed.
pub fn write_atomic(
    logdir: &Path,
    user: &str,
    experiment: &str,
    canonical_name: &str,
    record: &RunRecord,
) -> std::io::Result<PathBuf> {
    let dir = logdir.join(user).join(experiment);
    std::fs::create_dir_all(&dir)?;
    let dest = dir.join(format!("{}.json", canonical_name));

    let body = serde_json::to_vec_pretty(record)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(&body)?;
    tmp.persist(&dest)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> RunRecord {
        RunRecord {
            start_time: "2024-01-01T00:00:00Z".into(),
            end_time: "2024-01-01T00:05:00Z".into(),
            time_taken_secs: 300.0,
            autoprompter_model: None,
            planner_model: Some("gpt-4o".into()),
            executor_model: "gpt-4o".into(),
            total_cost: 0.02,
            success: true,
            exit_reason: ExitReason::Solved.as_str().to_string(),
            error: None,
            autoprompter: vec![],
            planner: Some(vec![]),
            executors: Some(vec![]),
            executor: None,
            executor_errors: Some(vec![]),
            debug_log: vec!["line one".into()],
        }
    }

    #[test]
    fn writes_atomically_under_canonical_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_atomic(
            dir.path(),
            "alice",
            "exp1",
            "2024q-pwn-baby_pwn",
            &sample_record(),
        )
        .unwrap();
        assert!(path.ends_with("alice/exp1/2024q-pwn-baby_pwn.json"));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"exit_reason\""));
        let parsed: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["success"], true);
    }

    #[test]
    fn omits_single_agent_fields_when_not_a_planner_executor_run() {
        let mut record = sample_record();
        record.planner = None;
        record.executors = None;
        record.executor_errors = None;
        record.executor = Some(vec![]);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("planner").is_none());
        assert!(json.get("executor").is_some());
    }
}
