//! Turning selected filesystem content into SIP previews.
//!
//! A [`Rule`] walks its selected paths with a [`TreeWalker`], groups what it
//! finds with a [`Grouping`] strategy and attaches descriptive metadata
//! through a [`MetadataSource`]. Paths claimed by one rule are recorded in a
//! shared [`PathRegistry`], so that no two rules ever hold the same content.

pub mod error;
mod filter;
mod registry;
mod resolve;
mod rule;
mod scheduler;
mod sip;
mod strategy;
mod tree;
mod walk;

pub use crate::filter::{ContentFilter, FilterSet, normalize};
pub use crate::registry::{PathRegistry, PathState};
pub use crate::resolve::{MetadataResolver, MetadataSource};
pub use crate::rule::{RemoveEvent, Rule, RuleConfig, RuleEvent, RuleId};
pub use crate::scheduler::{RuleScheduler, RunState};
pub use crate::sip::{SipId, SipKind, SipPreview, SipRepresentation};
pub use crate::strategy::{Grouping, Strategy, StrategyContext};
pub use crate::tree::TreeNode;
pub use crate::walk::{TreeWalker, Visitor, WalkSummary};
