//! Built-in tool implementations.
//!
//! - [`run_command::RunCommandTool`]: shell execution inside the working container.
//! - [`create_file::CreateFileTool`]: writes a file into the container.
//! - [`submit_flag::SubmitFlagTool`]: active flag detection.
//! - [`giveup::GiveupTool`]: abandons the challenge.
//! - [`delegate::DelegateTool`], [`finish_task::FinishTaskTool`],
//!   [`generate_prompt::GeneratePromptTool`]: sentinel tools intercepted by
//!   the agent loop before dispatch (see `crate::agent`).
//! - [`reversing::DisassembleTool`], [`reversing::DecompileTool`]: Ghidra-backed
//!   binary analysis.

pub mod create_file;
pub mod delegate;
pub mod finish_task;
pub mod generate_prompt;
pub mod giveup;
pub mod reversing;
pub mod run_command;
pub mod submit_flag;

pub use create_file::CreateFileTool;
pub use delegate::DelegateTool;
pub use finish_task::FinishTaskTool;
pub use generate_prompt::GeneratePromptTool;
pub use giveup::GiveupTool;
pub use reversing::{DecompileTool, DisassembleTool};
pub use run_command::RunCommandTool;
pub use submit_flag::SubmitFlagTool;
