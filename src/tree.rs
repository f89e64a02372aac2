//! Branching conversation tree
//!
//! Every node is its own record in the [`RecordStore`]; a parent lists its
//! children and which one is selected. Generations run through the
//! [`TaskStore`] and write their text back into the node they produce.
//!
//! Weights are cached aggregates. They are recomputed when a caller asks for a
//! refresh, never propagated upward here: [`BranchCursor`] carries the
//! callback that lets a level tell its parent to refresh.

mod cursor;
mod node;
mod store;

#[cfg(test)]
mod proptests;

pub use cursor::BranchCursor;
pub use node::{join_continuation, new_node_id, tail_chars, MessageNode, NodeMeta, ROOT_ID};
pub use store::NodeStore;

use crate::llm::{ChatMessage, CompletionRequest, Role};
use crate::reactive::Subscription;
use crate::settings::SettingsStore;
use crate::store::{RecordStore, StoreError};
use crate::tasks::{TaskCallbacks, TaskStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Characters of existing text quoted back to the model when continuing
const CONTINUE_TAIL_CHARS: usize = 5;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TreeResult<T> = Result<T, TreeError>;

/// What a new branch should contain
#[derive(Debug, Clone, Default)]
pub struct BranchRequest {
    /// Role of the new node; inferred from the selected sibling, else the
    /// parent's reply role, when absent
    pub role: Option<Role>,
    pub content: Option<String>,
    /// Fill an assistant node from the model using the ancestor context
    pub fill_from_model: bool,
    /// For a non-empty user node, also create and generate an answer under it
    pub with_generated_answer: bool,
}

impl BranchRequest {
    /// A node with fixed content and no generation
    pub fn message(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: Some(role),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A user message plus a generated answer beneath it
    pub fn user_turn(content: impl Into<String>) -> Self {
        Self {
            role: Some(Role::User),
            content: Some(content.into()),
            with_generated_answer: true,
            ..Self::default()
        }
    }

    /// Another model answer next to the current one
    pub fn regenerate() -> Self {
        Self {
            role: Some(Role::Assistant),
            fill_from_model: true,
            ..Self::default()
        }
    }
}

/// Outcome of removing a subtree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Records erased
    pub removed: usize,
    /// Active generations aborted
    pub aborted: usize,
    /// Keys whose removal failed and may be left orphaned
    pub failed: Vec<String>,
}

/// The conversation model: node operations plus generation
#[derive(Clone)]
pub struct ConversationTree {
    nodes: Arc<NodeStore>,
    tasks: Arc<TaskStore>,
    settings: Arc<SettingsStore>,
    fallback_api_key: Option<String>,
}

impl ConversationTree {
    pub fn new(
        records: Arc<dyn RecordStore>,
        tasks: Arc<TaskStore>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            nodes: Arc::new(NodeStore::new(records)),
            tasks,
            settings,
            fallback_api_key: None,
        }
    }

    /// Credential to use when settings carry none
    #[must_use]
    pub fn with_fallback_api_key(mut self, api_key: Option<String>) -> Self {
        self.fallback_api_key = api_key;
        self
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn node(&self, id: &str) -> MessageNode {
        self.nodes.get(id)
    }

    pub fn children(&self, id: &str) -> Vec<MessageNode> {
        self.nodes
            .get(id)
            .children
            .iter()
            .map(|child| self.nodes.get(child))
            .collect()
    }

    pub fn selected_child(&self, id: &str) -> Option<MessageNode> {
        self.nodes.get(id).selected.map(|child| self.nodes.get(&child))
    }

    /// Listen for writes to node `id`
    pub fn subscribe(
        &self,
        id: &str,
        listener: impl Fn(&MessageNode) + Send + Sync + 'static,
    ) -> Subscription {
        self.nodes.subscribe(id, listener)
    }

    /// Create the root record if it does not exist yet.
    ///
    /// The root has the assistant role and no content, so the first turn
    /// below it is the user's.
    pub fn ensure_root(&self) -> TreeResult<MessageNode> {
        if let Some(root) = self.nodes.find(ROOT_ID)? {
            return Ok(root);
        }
        let root = MessageNode::new(ROOT_ID, Role::Assistant);
        self.nodes.put(&root)?;
        tracing::info!(node_id = ROOT_ID, "Created conversation root");
        Ok(root)
    }

    /// Cursor on the root level
    pub fn root(&self) -> TreeResult<BranchCursor> {
        self.ensure_root()?;
        Ok(BranchCursor::root(self.clone()))
    }

    /// Cursors from the root down the chain of selected children
    pub fn selected_path(&self) -> TreeResult<Vec<BranchCursor>> {
        let mut path = vec![self.root()?];
        let mut seen = HashSet::from([ROOT_ID.to_string()]);
        while let Some(next) = path.last().and_then(BranchCursor::descend) {
            if !seen.insert(next.id().to_string()) {
                tracing::warn!(node_id = %next.id(), "Selection cycle in conversation tree");
                break;
            }
            path.push(next);
        }
        Ok(path)
    }

    /// Add a new child in front of `parent_id`'s children and select it.
    ///
    /// `context` is the conversation leading up to and including the parent.
    pub fn create_branch(
        &self,
        parent_id: &str,
        context: &[ChatMessage],
        request: BranchRequest,
    ) -> TreeResult<String> {
        let parent = self.nodes.get(parent_id);
        let sibling_role = parent
            .selected
            .as_deref()
            .and_then(|id| self.nodes.find(id).ok().flatten())
            .map(|sibling| sibling.role);
        let role = request
            .role
            .or(sibling_role)
            .unwrap_or_else(|| parent.role.reply_role());

        let id = new_node_id();
        let mut node = MessageNode::new(&id, role).with_content(request.content);

        if request.with_generated_answer && role == Role::User && node.has_content() {
            let answer_id = new_node_id();
            self.nodes
                .put(&MessageNode::new(&answer_id, Role::Assistant))?;
            node.push_front_selected(&answer_id);

            let mut messages = context.to_vec();
            messages.push(ChatMessage::new(role, node.text()));
            self.generate(&answer_id, messages)?;
        }

        node.weight = self.compute_weight(&node);
        self.nodes.put(&node)?;

        if request.fill_from_model && !request.with_generated_answer && role == Role::Assistant {
            self.generate(&id, context.to_vec())?;
        }

        let mut parent = self.nodes.get(parent_id);
        parent.push_front_selected(&id);
        self.nodes.put(&parent)?;

        tracing::info!(parent_id = %parent_id, node_id = %id, role = %role, "Created branch");
        Ok(id)
    }

    /// Replace the content of `parent_id`'s selected child
    pub fn edit_selected(&self, parent_id: &str, content: impl Into<String>) -> TreeResult<bool> {
        let Some(selected) = self.nodes.get(parent_id).selected else {
            return Ok(false);
        };
        let content = content.into();
        Ok(self
            .nodes
            .update(&selected, move |node| node.content = Some(content))?)
    }

    /// Ask the model to keep writing the selected assistant answer.
    ///
    /// Returns `false` when there is nothing to continue: no selection, not an
    /// assistant answer, no text yet, or a generation already running for it.
    pub fn continue_selected(&self, parent_id: &str, context: &[ChatMessage]) -> TreeResult<bool> {
        let Some(selected_id) = self.nodes.get(parent_id).selected else {
            return Ok(false);
        };
        let selected = self.nodes.get(&selected_id);

        if selected.role != Role::Assistant || !selected.has_content() {
            tracing::debug!(node_id = %selected_id, "Nothing to continue");
            return Ok(false);
        }
        if self.tasks.is_active(&selected_id) {
            tracing::debug!(node_id = %selected_id, "Generation already running");
            return Ok(false);
        }

        let ending = tail_chars(selected.text(), CONTINUE_TAIL_CHARS);
        let mut messages = context.to_vec();
        messages.push(ChatMessage::new(selected.role, selected.text()));
        messages.push(ChatMessage::user(format!(
            "!continue response, start after '{ending}'!"
        )));

        self.generate(&selected_id, messages)?;
        Ok(true)
    }

    /// Select `child_id` under `parent_id`. Ids that are not children are ignored.
    pub fn select_child(&self, parent_id: &str, child_id: &str) -> TreeResult<bool> {
        let mut parent = self.nodes.get(parent_id);
        if parent.position_of(child_id).is_none() {
            tracing::debug!(parent_id = %parent_id, child_id = %child_id, "Ignoring selection of non-child");
            return Ok(false);
        }
        if parent.selected.as_deref() == Some(child_id) {
            return Ok(false);
        }
        parent.selected = Some(child_id.to_string());
        self.nodes.put(&parent)?;
        Ok(true)
    }

    /// Detach `child_id` from `parent_id`, then erase its whole subtree and
    /// abort any generation writing into it.
    ///
    /// Removal is best effort per key: a failing key is logged and reported,
    /// and the rest of the subtree is still removed.
    pub fn delete_child(&self, parent_id: &str, child_id: &str) -> TreeResult<DeletionReport> {
        let mut parent = self.nodes.get(parent_id);
        if !parent.detach_child(child_id) {
            tracing::debug!(parent_id = %parent_id, child_id = %child_id, "Not a child, nothing to delete");
            return Ok(DeletionReport::default());
        }
        self.nodes.put(&parent)?;

        let plan = self.subtree_ids(child_id);
        let mut report = DeletionReport::default();
        for id in &plan {
            if self.tasks.abort(id) {
                report.aborted += 1;
            }
            match self.nodes.remove(id) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(node_id = %id, error = %e, "Failed to remove node record");
                    report.failed.push(id.clone());
                }
            }
        }

        tracing::info!(
            parent_id = %parent_id,
            child_id = %child_id,
            removed = report.removed,
            aborted = report.aborted,
            failed = report.failed.len(),
            "Deleted branch"
        );
        Ok(report)
    }

    /// Ids of `id` and all its descendants, parents before children
    pub fn subtree_ids(&self, id: &str) -> Vec<String> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id.to_string()];

        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let node = self.nodes.get(&current);
            stack.extend(node.children.into_iter().rev());
            order.push(current);
        }
        order
    }

    /// Weight implied by the node's children and their cached weights
    pub fn compute_weight(&self, node: &MessageNode) -> u64 {
        node.children
            .iter()
            .map(|child| 1 + self.nodes.get(child).weight)
            .sum()
    }

    /// Recompute `id`'s cached weight, persisting it if it changed
    pub fn refresh_weight(&self, id: &str) -> TreeResult<bool> {
        let Some(mut node) = self.nodes.find(id)? else {
            return Ok(false);
        };
        let weight = self.compute_weight(&node);
        if weight == node.weight {
            return Ok(false);
        }
        tracing::debug!(node_id = %id, old = node.weight, new = weight, "Weight refreshed");
        node.weight = weight;
        self.nodes.put(&node)?;
        Ok(true)
    }

    /// Recompute every cached weight under `id` from scratch, returning the
    /// true descendant count of `id`
    pub fn repair_weights(&self, id: &str) -> TreeResult<u64> {
        let order = self.subtree_ids(id);
        let mut weights: HashMap<String, u64> = HashMap::new();

        // Reverse pre-order settles every descendant before its ancestor
        for current in order.iter().rev() {
            let Some(mut node) = self.nodes.find(current)? else {
                weights.insert(current.clone(), 0);
                continue;
            };
            let weight = node
                .children
                .iter()
                .map(|child| 1 + weights.get(child).copied().unwrap_or(0))
                .sum();
            if node.weight != weight {
                node.weight = weight;
                self.nodes.put(&node)?;
            }
            weights.insert(current.clone(), weight);
        }

        Ok(weights.get(id).copied().unwrap_or(0))
    }

    /// Start a generation that streams into `node_id`.
    ///
    /// Existing content is kept and the new text joined after it, which is
    /// how a continuation extends an answer.
    fn generate(&self, node_id: &str, messages: Vec<ChatMessage>) -> TreeResult<()> {
        let settings = self.settings.get();

        let mut base = String::new();
        let model = settings.model.clone();
        self.nodes.update(node_id, |node| {
            base = node.content.clone().unwrap_or_default();
            node.meta = NodeMeta {
                model: Some(model),
                error: None,
            };
        })?;

        let request = CompletionRequest::streaming(settings.model, messages)
            .with_max_tokens(settings.max_tokens)
            .with_temperature(settings.temperature);
        let api_key = settings.api_key.or_else(|| self.fallback_api_key.clone());

        let text_nodes = Arc::clone(&self.nodes);
        let text_id = node_id.to_string();
        let text_base = base.clone();

        let done_nodes = Arc::clone(&self.nodes);
        let done_id = node_id.to_string();

        let error_nodes = Arc::clone(&self.nodes);
        let error_id = node_id.to_string();

        let callbacks = TaskCallbacks::new()
            .on_text(move |text| {
                let content = join_continuation(&text_base, text);
                if let Err(e) = text_nodes.update(&text_id, |node| node.content = Some(content)) {
                    tracing::warn!(node_id = %text_id, error = %e, "Failed to store streamed text");
                }
            })
            .on_done(move |text, reason| {
                if text.is_empty() {
                    tracing::debug!(node_id = %done_id, reason = ?reason, "Generation produced no text");
                    return;
                }
                let content = join_continuation(&base, &text);
                if let Err(e) = done_nodes.update(&done_id, |node| node.content = Some(content)) {
                    tracing::warn!(node_id = %done_id, error = %e, "Failed to store final text");
                }
            })
            .on_error(move |err| {
                let message = err.message;
                if let Err(e) = error_nodes.update(&error_id, |node| node.meta.error = Some(message)) {
                    tracing::warn!(node_id = %error_id, error = %e, "Failed to record generation error");
                }
            });

        self.tasks.start(node_id, api_key, request, callbacks);
        Ok(())
    }
}
