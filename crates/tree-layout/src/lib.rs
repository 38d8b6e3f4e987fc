//! Layout for genealogy trees.
//!
//! [`layout`] places every [`TreeNode`] in a `width × height` viewport with
//! the root at the top. Leaves take evenly spaced columns in depth-first
//! order, each parent sits centred over its first and last child, and rows
//! are evenly spaced by level. [`render_text`] draws the same tree for a
//! terminal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use genealogy_core::{TreeNode, UserId};

mod text;

pub use text::{render_text, EMPTY_STATE};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlacedNode {
    pub id: UserId,
    pub display_name: String,
    pub level: u32,
    pub is_active: bool,
    pub position: Point,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub parent: UserId,
    pub child: UserId,
    pub from: Point,
    pub to: Point,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TreeLayout {
    pub width: f64,
    pub height: f64,
    /// Pre-order, root first.
    pub nodes: Vec<PlacedNode>,
    pub edges: Vec<Edge>,
}

/// Lay `tree` out in the viewport. Negative or non-finite sizes are treated
/// as zero.
pub fn layout(tree: &TreeNode, width: f64, height: f64) -> TreeLayout {
    let width = sanitize(width);
    let height = sanitize(height);

    let mut slots = Vec::with_capacity(tree.size());
    let mut next_leaf = 0.0_f64;
    assign_slots(tree, &mut next_leaf, &mut slots);

    let columns = next_leaf.max(1.0);
    // a level above the root clamps to the root row
    let row_of = |node: &TreeNode| node.level.saturating_sub(tree.level);
    let deepest = tree.walk().into_iter().map(row_of).max().unwrap_or(0);
    let rows = f64::from(deepest) + 1.0;

    let nodes: Vec<PlacedNode> = slots
        .into_iter()
        .map(|(node, slot)| PlacedNode {
            id: node.id,
            display_name: node.display_name.clone(),
            level: node.level,
            is_active: node.is_active,
            position: Point {
                x: (slot + 0.5) * width / columns,
                y: (f64::from(row_of(node)) + 0.5) * height / rows,
            },
        })
        .collect();

    let positions: BTreeMap<UserId, Point> = nodes.iter().map(|n| (n.id, n.position)).collect();
    let mut edges = Vec::new();
    for parent in tree.walk() {
        for child in &parent.children {
            if let (Some(from), Some(to)) = (positions.get(&parent.id), positions.get(&child.id)) {
                edges.push(Edge {
                    parent: parent.id,
                    child: child.id,
                    from: *from,
                    to: *to,
                });
            }
        }
    }

    TreeLayout {
        width,
        height,
        nodes,
        edges,
    }
}

fn sanitize(size: f64) -> f64 {
    if size.is_finite() && size > 0.0 {
        size
    } else {
        0.0
    }
}

/// Returns the column of `node`; leaves consume one column each.
fn assign_slots<'t>(
    node: &'t TreeNode,
    next_leaf: &mut f64,
    out: &mut Vec<(&'t TreeNode, f64)>,
) -> f64 {
    let index = out.len();
    out.push((node, 0.0));
    let slot = match node.children.as_slice() {
        [] => {
            let slot = *next_leaf;
            *next_leaf += 1.0;
            slot
        }
        [first, rest @ ..] => {
            let first_slot = assign_slots(first, next_leaf, out);
            let mut last_slot = first_slot;
            for child in rest {
                last_slot = assign_slots(child, next_leaf, out);
            }
            (first_slot + last_slot) / 2.0
        }
    };
    out[index].1 = slot;
    slot
}
