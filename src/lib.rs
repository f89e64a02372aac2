//! Forkchat - branching conversations with a chat completion model
//!
//! Every message is a node in a tree. Editing, regenerating or continuing an
//! answer creates or extends branches instead of overwriting history, and the
//! user picks which branch is shown at each level.
//!
//! The crate is layered bottom-up:
//! - [`reactive`]: observable values everything else is built on
//! - [`store`]: durable key/value records (`SQLite` or in memory)
//! - [`llm`]: streaming chat completions and their error classification
//! - [`tasks`]: cancellable generations with live text
//! - [`tree`]: the conversation model and per-level cursors

pub mod config;
pub mod llm;
pub mod reactive;
pub mod settings;
pub mod store;
pub mod tasks;
pub mod tree;

pub use config::Config;
pub use settings::{Settings, SettingsStore};
pub use store::{MemoryStore, RecordStore, SqliteStore};
pub use tasks::{CompletionTask, FinishReason, TaskStore};
pub use tree::{BranchCursor, BranchRequest, ConversationTree, DeletionReport, MessageNode};
