//! Virtual Nodes and Reconciliation
//!
//! This module turns descriptions of UI trees into host mutations.
//!
//! # Concepts
//!
//! ## VNodes
//!
//! A [`VNode`] is a lightweight, shared description of one node: an
//! element, text, comment, fragment, static markup, component instance,
//! teleport or suspense boundary. Render functions build a fresh tree of
//! vnodes on every run.
//!
//! ## Patch Flags and Blocks
//!
//! Vnodes built by a template compiler carry [`PatchFlags`] naming exactly
//! which parts may change (text, class, specific props). A block vnode
//! additionally carries the flat list of its dynamic descendants, collected
//! by a [`BlockBuilder`], so an update only visits nodes that can change.
//! Hand-written trees (built with [`h`]) have no flags and are diffed in
//! full.
//!
//! ## Reconciliation
//!
//! [`Renderer`] patches the previous tree against the new one and drives a
//! [`HostOps`] implementation. Keyed child lists are reordered with the
//! minimal number of moves, using a longest increasing subsequence of the
//! nodes that can stay in place.
//!
//! # Implementation Notes
//!
//! Everything here is single-threaded. Vnodes and instances are reference
//! counted with interior mutability for the mount-time state the reconciler
//! fills in.

mod block;
mod components;
mod flags;
mod host;
mod renderer;
mod sequence;
mod suspense;
mod teleport;
mod test_host;
mod vnode;

pub use block::BlockBuilder;
pub use flags::{PatchFlags, ShapeFlags};
pub use host::{HostNode, HostOps};
pub use renderer::{MoveType, Renderer};
pub use sequence::longest_increasing_subsequence;
pub use suspense::SuspenseBoundary;
pub use test_host::{HostOp, NodeKind, OpCounts, TestHost};
pub use vnode::{
    clone_vnode, comment, create_vnode, fragment, h, is_event_key, is_same_vnode_type,
    merge_props, normalize_class, normalize_style, static_content, suspense, suspense_with,
    teleport, text, ChildList, Children, Directive, DirectiveBinding, DirectiveHook,
    DirectiveHookKind, LeaveHook, NodeRef, Props, SlotFn, Slots, TransitionHook,
    TransitionHooks, VNode, VNodeType,
};

pub(crate) use vnode::handler_list;
