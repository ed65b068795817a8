//! Patch descriptors and the per-method aggregate.
//!
//! A [`Patch`] is an immutable record of one registered patch: who owns it,
//! what it runs (a method id or an instruction-stream transform), its
//! category, its numeric priority, and its explicit before/after ordering
//! constraints. A caller wishing to change ordering re-registers.
//!
//! [`PatchInfo`] aggregates every patch registered against one original
//! method, across all categories, and assigns registration indices from a
//! single monotone counter so ties sort by true registration order.

use seam_bytecode::InstructionStream;
use seam_core::MethodId;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// A pure instruction-stream transform: instructions in, instructions out.
pub type TranspilerFn = Arc<dyn Fn(InstructionStream) -> InstructionStream + Send + Sync>;

/// Identity of a patch's owning declaration, referenced by before/after
/// constraints of other patches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatchOwner(Arc<str>);

impl PatchOwner {
    /// Create an owner identity.
    #[inline]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        PatchOwner(name.into())
    }

    /// The owner name.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatchOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Patch categories. Only `Transpiler` rewrites the instruction stream;
/// the others are woven around the (transpiled) original by the
/// synthesizer. All categories share one sort contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchCategory {
    /// Runs before the original; may skip it by returning `Bool(false)`.
    Prefix,
    /// Runs after the original; may replace the result.
    Postfix,
    /// Transforms the original's instruction stream before generation.
    Transpiler,
    /// Runs on both the normal and the raise exit path.
    Finalizer,
}

impl PatchCategory {
    /// Default priority direction policy for this category.
    ///
    /// Higher priority runs earlier for prefixes, transpilers, and
    /// finalizers; later for postfixes. The sorter takes the direction as a
    /// parameter, so callers can override the policy.
    #[inline]
    pub fn sort_direction(self) -> crate::sorter::SortDirection {
        match self {
            PatchCategory::Postfix => crate::sorter::SortDirection::LowerFirst,
            _ => crate::sorter::SortDirection::HigherFirst,
        }
    }
}

/// Numeric patch priority. Higher values sort earlier (or later, per the
/// category's direction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Priority(pub i32);

impl Priority {
    /// Runs last among its peers.
    pub const LAST: Priority = Priority(0);
    /// Lower than normal.
    pub const LOW: Priority = Priority(200);
    /// The default.
    pub const NORMAL: Priority = Priority(400);
    /// Higher than normal.
    pub const HIGH: Priority = Priority(600);
    /// Runs first among its peers.
    pub const FIRST: Priority = Priority(800);
}

impl Default for Priority {
    #[inline]
    fn default() -> Self {
        Priority::NORMAL
    }
}

/// What a patch executes.
#[derive(Clone)]
pub enum PatchCallable {
    /// A registered method (prefix/postfix/finalizer bodies).
    Method(MethodId),
    /// A pure instruction-stream transform (transpilers).
    Transform(TranspilerFn),
}

impl fmt::Debug for PatchCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchCallable::Method(id) => write!(f, "Method({})", id),
            PatchCallable::Transform(_) => write!(f, "Transform(..)"),
        }
    }
}

/// An immutable record of one registered patch.
#[derive(Debug, Clone)]
pub struct Patch {
    /// Owning declaration identity.
    pub owner: PatchOwner,
    /// What this patch executes.
    pub callable: PatchCallable,
    /// Category within the weave.
    pub category: PatchCategory,
    /// Numeric priority.
    pub priority: Priority,
    /// Owners this patch must run before.
    pub before: SmallVec<[PatchOwner; 2]>,
    /// Owners this patch must run after.
    pub after: SmallVec<[PatchOwner; 2]>,
    /// Enables extra, non-functional diagnostics only.
    pub debug: bool,
    /// Registration order within the aggregate; assigned by
    /// [`PatchInfo::add`].
    pub index: u32,
}

impl Patch {
    fn new(owner: PatchOwner, callable: PatchCallable, category: PatchCategory) -> Self {
        Self {
            owner,
            callable,
            category,
            priority: Priority::NORMAL,
            before: SmallVec::new(),
            after: SmallVec::new(),
            debug: false,
            index: 0,
        }
    }

    /// A transpiler patch wrapping an instruction-stream transform.
    pub fn transpiler(
        owner: PatchOwner,
        transform: impl Fn(InstructionStream) -> InstructionStream + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            owner,
            PatchCallable::Transform(Arc::new(transform)),
            PatchCategory::Transpiler,
        )
    }

    /// A prefix patch backed by a registered method.
    pub fn prefix(owner: PatchOwner, method: MethodId) -> Self {
        Self::new(owner, PatchCallable::Method(method), PatchCategory::Prefix)
    }

    /// A postfix patch backed by a registered method.
    pub fn postfix(owner: PatchOwner, method: MethodId) -> Self {
        Self::new(owner, PatchCallable::Method(method), PatchCategory::Postfix)
    }

    /// A finalizer patch backed by a registered method.
    pub fn finalizer(owner: PatchOwner, method: MethodId) -> Self {
        Self::new(
            owner,
            PatchCallable::Method(method),
            PatchCategory::Finalizer,
        )
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Declare that this patch must run before `owner`.
    pub fn with_before(mut self, owner: PatchOwner) -> Self {
        self.before.push(owner);
        self
    }

    /// Declare that this patch must run after `owner`.
    pub fn with_after(mut self, owner: PatchOwner) -> Self {
        self.after.push(owner);
        self
    }

    /// Enable debug diagnostics for this patch.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Every patch registered against one original method, across categories.
///
/// Read (never mutated) by the sorter and the synthesizer; the ledger hands
/// out immutable snapshots so nothing can change mid-synthesis.
#[derive(Debug, Clone, Default)]
pub struct PatchInfo {
    prefixes: Vec<Patch>,
    postfixes: Vec<Patch>,
    transpilers: Vec<Patch>,
    finalizers: Vec<Patch>,
    next_index: u32,
}

impl PatchInfo {
    /// An empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a patch, assigning its registration index.
    pub fn add(&mut self, mut patch: Patch) {
        patch.index = self.next_index;
        self.next_index += 1;
        match patch.category {
            PatchCategory::Prefix => self.prefixes.push(patch),
            PatchCategory::Postfix => self.postfixes.push(patch),
            PatchCategory::Transpiler => self.transpilers.push(patch),
            PatchCategory::Finalizer => self.finalizers.push(patch),
        }
    }

    /// Remove every patch registered under `owner`.
    pub fn remove_owner(&mut self, owner: &PatchOwner) {
        self.prefixes.retain(|p| &p.owner != owner);
        self.postfixes.retain(|p| &p.owner != owner);
        self.transpilers.retain(|p| &p.owner != owner);
        self.finalizers.retain(|p| &p.owner != owner);
    }

    /// Registered prefixes, in registration order.
    #[inline]
    pub fn prefixes(&self) -> &[Patch] {
        &self.prefixes
    }

    /// Registered postfixes, in registration order.
    #[inline]
    pub fn postfixes(&self) -> &[Patch] {
        &self.postfixes
    }

    /// Registered transpilers, in registration order.
    #[inline]
    pub fn transpilers(&self) -> &[Patch] {
        &self.transpilers
    }

    /// Registered finalizers, in registration order.
    #[inline]
    pub fn finalizers(&self) -> &[Patch] {
        &self.finalizers
    }

    /// Total number of registered patches.
    pub fn total(&self) -> usize {
        self.prefixes.len() + self.postfixes.len() + self.transpilers.len() + self.finalizers.len()
    }

    /// Whether no patches are registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
