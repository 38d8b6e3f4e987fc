use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use genealogy_core::TreeNode;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelStats {
    pub members: usize,
    pub active: usize,
}

/// Downline totals for a built tree. The root itself is not counted.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamStats {
    pub total_members: usize,
    pub active_members: usize,
    pub levels: BTreeMap<u32, LevelStats>,
}

impl TeamStats {
    pub fn from_tree(root: &TreeNode) -> Self {
        let mut stats = TeamStats::default();
        for node in root.walk().into_iter().skip(1) {
            let level = stats.levels.entry(node.level - root.level).or_default();
            level.members += 1;
            stats.total_members += 1;
            if node.is_active {
                level.active += 1;
                stats.active_members += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn counts_members_per_level_excluding_root() {
        let mut root = TreeNode::leaf(Uuid::new_v4(), "root", 0, true);
        let mut left = TreeNode::leaf(Uuid::new_v4(), "left", 1, true);
        left.children.push(TreeNode::leaf(Uuid::new_v4(), "ll", 2, false));
        left.children.push(TreeNode::leaf(Uuid::new_v4(), "lr", 2, true));
        root.children.push(left);
        root.children.push(TreeNode::leaf(Uuid::new_v4(), "right", 1, false));

        let stats = TeamStats::from_tree(&root);
        assert_eq!(stats.total_members, 4);
        assert_eq!(stats.active_members, 2);
        assert_eq!(stats.levels[&1], LevelStats { members: 2, active: 1 });
        assert_eq!(stats.levels[&2], LevelStats { members: 2, active: 1 });
    }

    #[test]
    fn lone_root_has_empty_team() {
        let root = TreeNode::leaf(Uuid::new_v4(), "solo", 0, true);
        assert_eq!(TeamStats::from_tree(&root), TeamStats::default());
    }
}
