//! Documented command-line surface (§6) for the run entry points. Argument
//! *parsing* is out of core scope — a `clap`-based (or any other) front end
//! populates this struct and hands it to the coordinator, mirroring how
//! [`crate::prompt_manager::PromptManager`] and [`crate::config::RunConfig`]
//! receive pre-parsed values rather than parsing anything themselves.

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub challenge: Option<String>,
    pub dataset: Option<PathBuf>,
    pub split: Option<String>,
    pub keys: Option<PathBuf>,
    pub container_image: Option<String>,
    pub container_network: Option<String>,
    pub logdir: Option<PathBuf>,
    pub experiment_name: Option<String>,
    pub config: Option<PathBuf>,
    pub autoprompter_model: Option<String>,
    pub planner_model: Option<String>,
    pub executor_model: Option<String>,
    pub max_cost: Option<f64>,
    pub enable_autoprompt: Option<bool>,
    pub overwrite_existing: bool,
    pub skip_existing: bool,
    pub debug: bool,
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_all_unset() {
        let args = RunArgs::default();
        assert!(args.challenge.is_none());
        assert!(!args.overwrite_existing);
        assert!(!args.debug);
    }
}
