use crate::page::{FrameId, FrameTree};

/// Index path locating a frame relative to the top document: one entry
/// per hop, each the frame's position in its parent's child-frame list,
/// top-most hop first. Empty for the top frame. Walking stops at the
/// first cross-origin parent, returning the partial chain gathered so
/// far, the way a blocked parent-frame access would.
pub fn frame_chain(tree: &FrameTree, frame: FrameId) -> Vec<usize> {
    let mut chain = Vec::new();
    let mut cur = frame;
    while let Some(parent) = tree.parent(cur) {
        if tree.origin(parent) != tree.origin(cur) {
            break;
        }
        match tree.children(parent).iter().position(|&f| f == cur) {
            Some(idx) => chain.push(idx),
            None => break,
        }
        cur = parent;
    }
    chain.reverse();
    chain
}
