//! Per-level handle into the tree
//!
//! A cursor is one displayed level of the conversation: a node, the messages
//! leading up to it, and a callback into the level above. Operations made
//! through a cursor refresh that level's weight and, when it changed, tell the
//! parent level to refresh too. Nodes themselves never point at their parent.

use super::{BranchRequest, ConversationTree, DeletionReport, MessageNode, TreeResult, ROOT_ID};
use crate::llm::ChatMessage;
use crate::reactive::Subscription;
use crate::tasks::CompletionTask;
use std::sync::Arc;

type WeightListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct BranchCursor {
    tree: ConversationTree,
    id: String,
    context: Vec<ChatMessage>,
    on_weight_change: Option<WeightListener>,
}

impl BranchCursor {
    pub(super) fn root(tree: ConversationTree) -> Self {
        Self {
            tree,
            id: ROOT_ID.to_string(),
            context: Vec::new(),
            on_weight_change: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Messages from the root down to and including this node
    pub fn context(&self) -> &[ChatMessage] {
        &self.context
    }

    pub fn node(&self) -> MessageNode {
        self.tree.node(&self.id)
    }

    pub fn children(&self) -> Vec<MessageNode> {
        self.tree.children(&self.id)
    }

    pub fn selected(&self) -> Option<MessageNode> {
        self.tree.selected_child(&self.id)
    }

    /// Generation currently writing into the selected child
    pub fn selected_task(&self) -> Option<CompletionTask> {
        let selected = self.node().selected?;
        self.tree.tasks().find(&selected)
    }

    /// Listen for writes to this level's node
    pub fn subscribe(&self, listener: impl Fn(&MessageNode) + Send + Sync + 'static) -> Subscription {
        self.tree.subscribe(&self.id, listener)
    }

    /// Cursor for the selected child, whose parent callback refreshes this level
    pub fn descend(&self) -> Option<BranchCursor> {
        let child = self.selected()?;

        let mut context = self.context.clone();
        if child.has_content() {
            context.push(ChatMessage::new(child.role, child.text()));
        }

        let parent = self.clone();
        let on_weight_change: WeightListener = Arc::new(move || {
            if let Err(e) = parent.refresh() {
                tracing::warn!(node_id = %parent.id, error = %e, "Failed to refresh parent weight");
            }
        });

        Some(BranchCursor {
            tree: self.tree.clone(),
            id: child.id,
            context,
            on_weight_change: Some(on_weight_change),
        })
    }

    pub fn create_branch(&self, request: BranchRequest) -> TreeResult<String> {
        let id = self.tree.create_branch(&self.id, &self.context, request)?;
        self.refresh()?;
        Ok(id)
    }

    /// New user message with a generated answer
    pub fn send(&self, content: impl Into<String>) -> TreeResult<String> {
        self.create_branch(BranchRequest::user_turn(content))
    }

    /// New sibling answer for the selected assistant message
    pub fn regenerate(&self) -> TreeResult<String> {
        self.create_branch(BranchRequest::regenerate())
    }

    pub fn edit_selected(&self, content: impl Into<String>) -> TreeResult<bool> {
        self.tree.edit_selected(&self.id, content)
    }

    pub fn continue_selected(&self) -> TreeResult<bool> {
        self.tree.continue_selected(&self.id, &self.context)
    }

    pub fn select_child(&self, child_id: &str) -> TreeResult<bool> {
        self.tree.select_child(&self.id, child_id)
    }

    pub fn delete_child(&self, child_id: &str) -> TreeResult<DeletionReport> {
        let report = self.tree.delete_child(&self.id, child_id)?;
        self.refresh()?;
        Ok(report)
    }

    /// Recompute this level's weight; on change, refresh the parent level
    pub fn refresh(&self) -> TreeResult<bool> {
        let changed = self.tree.refresh_weight(&self.id)?;
        if changed {
            if let Some(notify) = &self.on_weight_change {
                notify();
            }
        }
        Ok(changed)
    }
}

impl std::fmt::Debug for BranchCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchCursor")
            .field("id", &self.id)
            .field("context", &self.context.len())
            .field("has_parent", &self.on_weight_change.is_some())
            .finish_non_exhaustive()
    }
}
