use std::fmt::Write;

use genealogy_core::TreeNode;

/// Shown in place of a tree that could not be built.
pub const EMPTY_STATE: &str = "No referrals to show yet.";

/// Indented box-drawing view of `tree`, one member per line. Active members
/// are marked with `*`.
pub fn render_text(tree: &TreeNode) -> String {
    let mut out = String::new();
    line(&mut out, "", tree);
    draw_children(&mut out, "", tree);
    out
}

fn draw_children(out: &mut String, prefix: &str, node: &TreeNode) {
    let count = node.children.len();
    for (idx, child) in node.children.iter().enumerate() {
        let last = idx + 1 == count;
        let branch = if last { "└── " } else { "├── " };
        line(out, &format!("{prefix}{branch}"), child);
        let nested = if last { "    " } else { "│   " };
        draw_children(out, &format!("{prefix}{nested}"), child);
    }
}

fn line(out: &mut String, prefix: &str, node: &TreeNode) {
    let marker = if node.is_active { " *" } else { "" };
    // writing into a String cannot fail
    let _ = writeln!(out, "{prefix}{} (L{}){marker}", node.display_name, node.level);
}
