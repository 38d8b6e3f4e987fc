use serde::{Deserialize, Serialize};

use crate::model::UserId;

/// One member of a genealogy tree. Produced by the graph builder, consumed by
/// the layout code.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeNode {
    pub id: UserId,
    pub display_name: String,
    /// Distance from the root; the root is level 0.
    pub level: u32,
    /// Has at least one active investment.
    pub is_active: bool,
    /// Ordered by registration time.
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn leaf(id: UserId, display_name: impl Into<String>, level: u32, is_active: bool) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            level,
            is_active,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Deepest level present in the tree.
    pub fn depth(&self) -> u32 {
        self.children
            .iter()
            .map(TreeNode::depth)
            .max()
            .unwrap_or(self.level)
    }

    /// Pre-order walk over every node, root included.
    pub fn walk(&self) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn size(&self) -> usize {
        self.walk().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn walk_is_pre_order() {
        let mut root = TreeNode::leaf(Uuid::new_v4(), "root", 0, true);
        let mut a = TreeNode::leaf(Uuid::new_v4(), "a", 1, false);
        a.children.push(TreeNode::leaf(Uuid::new_v4(), "a1", 2, true));
        root.children.push(a);
        root.children.push(TreeNode::leaf(Uuid::new_v4(), "b", 1, false));

        let names: Vec<&str> = root.walk().iter().map(|n| n.display_name.as_str()).collect();
        assert_eq!(names, vec!["root", "a", "a1", "b"]);
        assert_eq!(root.depth(), 2);
        assert_eq!(root.size(), 4);
    }

    #[test]
    fn serializes_as_plain_record() {
        let node = TreeNode::leaf(Uuid::nil(), "solo", 0, false);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["level"], 0);
        assert_eq!(json["is_active"], false);
        assert_eq!(json["children"].as_array().unwrap().len(), 0);
    }
}
