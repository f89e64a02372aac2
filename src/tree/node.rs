//! Persisted message node

use crate::llm::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Id of the conversation root
pub const ROOT_ID: &str = "#0000";

/// Fresh node id, unique within a conversation
pub fn new_node_id() -> String {
    format!("#{}", Uuid::new_v4().simple())
}

/// Which model produced a node, and why generation failed if it did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One message in the conversation tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageNode {
    pub id: String,
    #[serde(default)]
    pub role: Role,
    /// Absent until some text exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Child ids in display order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    /// Active child; always one of `children` when set
    #[serde(default)]
    pub selected: Option<String>,
    /// Cached sum over children of `1 + child.weight`
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub meta: NodeMeta,
}

impl MessageNode {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: Option<String>) -> Self {
        self.content = content;
        self
    }

    /// Text of the node, empty if none
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn error(&self) -> Option<&str> {
        self.meta.error.as_deref()
    }

    pub fn position_of(&self, child_id: &str) -> Option<usize> {
        self.children.iter().position(|c| c == child_id)
    }

    /// Remove `child_id`, moving the selection to the sibling that takes its
    /// place, else the first sibling, else nothing. Returns whether it was a child.
    pub fn detach_child(&mut self, child_id: &str) -> bool {
        let Some(index) = self.position_of(child_id) else {
            return false;
        };
        self.children.remove(index);

        if self.selected.as_deref() == Some(child_id) {
            self.selected = self
                .children
                .get(index)
                .or_else(|| self.children.first())
                .cloned();
        }
        true
    }

    /// Insert `child_id` in front and select it
    pub fn push_front_selected(&mut self, child_id: &str) {
        self.children.insert(0, child_id.to_string());
        self.selected = Some(child_id.to_string());
    }
}

/// Join continuation text onto existing content with a single space
pub fn join_continuation(base: &str, addition: &str) -> String {
    if base.is_empty() || base.ends_with(char::is_whitespace) {
        format!("{base}{addition}")
    } else {
        format!("{base} {addition}")
    }
}

/// The last `n` characters of `text`
pub fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - n)
        .map_or(0, |(index, _)| index);
    text.get(start..).unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(children: &[&str], selected: Option<&str>) -> MessageNode {
        MessageNode {
            id: "#p".into(),
            children: children.iter().map(ToString::to_string).collect(),
            selected: selected.map(String::from),
            ..MessageNode::default()
        }
    }

    #[test]
    fn test_detach_selected_moves_to_same_position() {
        let mut node = parent(&["a", "b", "c"], Some("b"));
        assert!(node.detach_child("b"));
        assert_eq!(node.children, vec!["a", "c"]);
        assert_eq!(node.selected.as_deref(), Some("c"));
    }

    #[test]
    fn test_detach_last_selected_falls_back_to_first() {
        let mut node = parent(&["a", "b", "c"], Some("c"));
        node.detach_child("c");
        assert_eq!(node.selected.as_deref(), Some("a"));
    }

    #[test]
    fn test_detach_only_child_clears_selection() {
        let mut node = parent(&["a"], Some("a"));
        node.detach_child("a");
        assert!(node.children.is_empty());
        assert!(node.selected.is_none());
    }

    #[test]
    fn test_detach_unselected_keeps_selection() {
        let mut node = parent(&["a", "b", "c"], Some("a"));
        node.detach_child("c");
        assert_eq!(node.selected.as_deref(), Some("a"));
        assert!(!node.detach_child("zzz"));
    }

    #[test]
    fn test_record_round_trip() {
        let node = MessageNode {
            id: "#n1".into(),
            role: Role::Assistant,
            content: Some("hi there".into()),
            children: vec!["#c1".into(), "#c2".into()],
            selected: Some("#c2".into()),
            weight: 7,
            meta: NodeMeta {
                model: Some("gpt-4o".into()),
                error: Some("OpenAI: 500 - unknown".into()),
            },
        };
        let json = serde_json::to_string(&node).unwrap();
        let back: MessageNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_sparse_record_decodes() {
        let node: MessageNode = serde_json::from_str(r##"{"id":"#x","role":"assistant"}"##).unwrap();
        assert_eq!(node.role, Role::Assistant);
        assert!(node.content.is_none());
        assert!(node.children.is_empty());
        assert_eq!(node.weight, 0);
    }

    #[test]
    fn test_join_continuation() {
        assert_eq!(join_continuation("", "abc"), "abc");
        assert_eq!(join_continuation("Hello", "world"), "Hello world");
        assert_eq!(join_continuation("Hello\n", "world"), "Hello\nworld");
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdefg", 5), "cdefg");
        assert_eq!(tail_chars("abc", 5), "abc");
        assert_eq!(tail_chars("héllo wörld", 5), "wörld");
    }

    #[test]
    fn test_ids_unique() {
        let a = new_node_id();
        let b = new_node_id();
        assert_ne!(a, b);
        assert!(a.starts_with('#'));
    }
}
