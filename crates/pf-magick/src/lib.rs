//! # pf-magick
//!
//! Engine orchestration for pixforge: everything between a validated
//! [`pf_core::ConversionRequest`] and an encoded file on disk.
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- locate `magick` and the
//!   optional `heif-enc` plugin.
//! - **Command execution** ([`ToolCommand`]) -- spawn with a deadline, bounded
//!   output capture, kill-and-reap on timeout.
//! - **Workspaces** ([`WorkspaceManager`], [`Workspace`]) -- one directory per
//!   request, deleted exactly once.
//! - **Translation** ([`plan`]) -- `(format, mode, setting)` to engine flags.
//! - **Execution** ([`ConversionExecutor`]) -- run a plan and classify it.
//! - **Orchestration** ([`Converter`]) -- the full request flow.

pub mod command;
pub mod convert;
pub mod executor;
pub mod plan;
pub mod tools;
pub mod workspace;

pub use command::{CapturedRun, ToolCommand, ToolOutput};
pub use convert::{ConvertedImage, Converter, Engine, PLUGIN_UNAVAILABLE};
pub use executor::{ConversionExecutor, ConversionOutcome, ExecutionResult};
pub use plan::{encoder_flags, translate, EncodingPlan};
pub use tools::{ToolInfo, ToolRegistry, ENGINE, PLUGIN};
pub use workspace::{Workspace, WorkspaceManager};
