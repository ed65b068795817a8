//! The process-wide method table.
//!
//! Every routine the engine can call or patch lives here: originals,
//! patch methods, and synthesized replacements. Each entry owns an entry
//! slot — the id the runtime actually dispatches through. Detouring a
//! method re-points its slot at a replacement; the base body is never
//! mutated, so re-synthesis always starts from the pristine original.
//!
//! Thread-safe via internal locking; statistics via relaxed atomics.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use seam_bytecode::MethodBody;
use seam_core::MethodId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One registered method.
#[derive(Debug)]
pub struct MethodEntry {
    /// The method's stable id.
    id: MethodId,
    /// Name, used in diagnostics.
    name: Arc<str>,
    /// Parameter count.
    arg_count: u16,
    /// The base body. `None` for stubs (intrinsic analog): such methods
    /// cannot be decoded and cannot serve as a live patch target.
    body: Option<Arc<MethodBody>>,
    /// Entry slot: the id calls actually dispatch to. Initially `id`.
    target: RwLock<MethodId>,
    /// Pinned entries refuse redirection.
    pinned: AtomicBool,
    /// Number of times the entry slot was (re-)installed.
    install_count: AtomicU64,
}

impl MethodEntry {
    /// The method's id.
    #[inline]
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// The method's name.
    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Parameter count.
    #[inline]
    pub fn arg_count(&self) -> u16 {
        self.arg_count
    }

    /// The base body, bypassing any installed detour.
    #[inline]
    pub fn body(&self) -> Option<Arc<MethodBody>> {
        self.body.clone()
    }

    /// Whether this entry has no decodable body.
    #[inline]
    pub fn is_stub(&self) -> bool {
        self.body.is_none()
    }

    /// Current entry-slot target.
    #[inline]
    pub fn target(&self) -> MethodId {
        *self.target.read()
    }

    /// Whether this entry refuses redirection.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    /// How many times the entry slot was installed.
    #[inline]
    pub fn install_count(&self) -> u64 {
        self.install_count.load(Ordering::Relaxed)
    }
}

/// Statistics for the method table.
#[derive(Debug, Default, Clone)]
pub struct TableStats {
    /// Registered methods.
    pub methods: u64,
    /// Entry-slot installs across all methods, including re-targets.
    pub installs: u64,
    /// Entry resolutions performed for calls.
    pub resolutions: u64,
}

/// Registry of all callable methods and their entry slots.
#[derive(Debug, Default)]
pub struct MethodTable {
    entries: RwLock<FxHashMap<MethodId, Arc<MethodEntry>>>,
    next_id: AtomicU64,
    installs: AtomicU64,
    resolutions: AtomicU64,
}

impl MethodTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: Arc<str>, arg_count: u16, body: Option<Arc<MethodBody>>) -> MethodId {
        let id = MethodId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(MethodEntry {
            id,
            name,
            arg_count,
            body,
            target: RwLock::new(id),
            pinned: AtomicBool::new(false),
            install_count: AtomicU64::new(0),
        });
        self.entries.write().insert(id, entry);
        id
    }

    /// Register a method with a concrete body.
    pub fn register(&self, body: MethodBody) -> MethodId {
        let name = body.name.clone();
        let arg_count = body.arg_count;
        self.insert(name, arg_count, Some(Arc::new(body)))
    }

    /// Register a stub: a callable identity without a decodable body.
    pub fn register_stub(&self, name: impl Into<Arc<str>>, arg_count: u16) -> MethodId {
        self.insert(name.into(), arg_count, None)
    }

    /// Mark a method as non-detourable. Returns `false` if unknown.
    pub fn pin(&self, id: MethodId) -> bool {
        match self.lookup(id) {
            Some(entry) => {
                entry.pinned.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Look up an entry by id.
    pub fn lookup(&self, id: MethodId) -> Option<Arc<MethodEntry>> {
        self.entries.read().get(&id).cloned()
    }

    /// The base body of a method, bypassing any detour.
    pub fn body_of(&self, id: MethodId) -> Option<Arc<MethodBody>> {
        self.lookup(id).and_then(|e| e.body())
    }

    /// Resolve the body a call to `id` executes right now.
    ///
    /// Follows the entry slot exactly one hop: a slot points either at its
    /// own method or directly at the current replacement. Re-targeting
    /// replaces the previous redirection, so chains cannot form.
    pub fn resolve(&self, id: MethodId) -> Option<Arc<MethodBody>> {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        let entry = self.lookup(id)?;
        let target = entry.target();
        if target == id {
            entry.body()
        } else {
            self.lookup(target).and_then(|e| e.body())
        }
    }

    /// Re-point `id`'s entry slot at `target`.
    ///
    /// Validation belongs to the detour installer; this is the raw slot
    /// write.
    pub(crate) fn retarget(&self, id: MethodId, target: MethodId) -> bool {
        match self.lookup(id) {
            Some(entry) => {
                *entry.target.write() = target;
                entry.install_count.fetch_add(1, Ordering::Relaxed);
                self.installs.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the statistics counters.
    pub fn stats(&self) -> TableStats {
        TableStats {
            methods: self.len() as u64,
            installs: self.installs.load(Ordering::Relaxed),
            resolutions: self.resolutions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seam_bytecode::{BodyBuilder, MethodBody};
    use seam_core::Value;

    fn const_body(name: &str, value: i64) -> MethodBody {
        let mut b = BodyBuilder::new(name, 0);
        let r = b.alloc_register();
        b.emit_load_const(r, Value::Int(value));
        b.emit_return(r);
        b.finish()
    }

    #[test]
    fn test_register_and_lookup() {
        let table = MethodTable::new();
        let id = table.register(const_body("one", 1));
        let entry = table.lookup(id).unwrap();
        assert_eq!(entry.id(), id);
        assert_eq!(&**entry.name(), "one");
        assert_eq!(entry.target(), id);
        assert!(!entry.is_stub());
        assert!(table.lookup(MethodId::new(999)).is_none());
    }

    #[test]
    fn test_stub_has_no_body() {
        let table = MethodTable::new();
        let id = table.register_stub("intrinsic", 2);
        let entry = table.lookup(id).unwrap();
        assert!(entry.is_stub());
        assert_eq!(entry.arg_count(), 2);
        assert!(table.body_of(id).is_none());
    }

    #[test]
    fn test_resolve_follows_one_hop() {
        let table = MethodTable::new();
        let a = table.register(const_body("a", 1));
        let b = table.register(const_body("b", 2));
        let c = table.register(const_body("c", 3));

        assert!(table.retarget(a, b));
        // A second redirection behind the first must not chain.
        assert!(table.retarget(b, c));

        let via_a = table.resolve(a).unwrap();
        assert_eq!(&*via_a.name, "b");
    }

    #[test]
    fn test_retarget_replaces_previous() {
        let table = MethodTable::new();
        let a = table.register(const_body("a", 1));
        let b = table.register(const_body("b", 2));
        let c = table.register(const_body("c", 3));

        table.retarget(a, b);
        table.retarget(a, c);
        assert_eq!(&*table.resolve(a).unwrap().name, "c");
        assert_eq!(table.lookup(a).unwrap().install_count(), 2);
    }

    #[test]
    fn test_base_body_survives_detour() {
        let table = MethodTable::new();
        let a = table.register(const_body("a", 1));
        let b = table.register(const_body("b", 2));
        table.retarget(a, b);
        assert_eq!(&*table.body_of(a).unwrap().name, "a");
    }

    #[test]
    fn test_stats() {
        let table = MethodTable::new();
        let a = table.register(const_body("a", 1));
        let b = table.register(const_body("b", 2));
        table.retarget(a, b);
        table.resolve(a);
        let stats = table.stats();
        assert_eq!(stats.methods, 2);
        assert_eq!(stats.installs, 1);
        assert_eq!(stats.resolutions, 1);
    }
}
