use std::hash::BuildHasherDefault;
use std::mem;
use std::ptr;

use hashbrown::HashMap;
use rustc_hash::FxHasher;

use crate::object::{ObjectKind, ObjectString};
use crate::value::Value;

/// The live heap must exceed this many bytes before the first collection.
pub const HEAP_INIT: usize = 1024 * 1024;
/// After a collection, the threshold grows to this multiple of the live
/// heap.
pub const HEAP_GROW_FACTOR: usize = 2;

/// A mark-and-sweep collector owning every heap object.
///
/// Strings are interned: allocating the same contents twice returns the same
/// handle. Handles stay valid for as long as the object is reachable from a
/// root at every collection point; the `Vm` supplies the roots by marking
/// them before calling [`Gc::trace`] and [`Gc::sweep`].
pub struct Gc {
    /// Interned strings, keyed by their contents. The key owns the bytes
    /// that the object's `value` borrows.
    strings: HashMap<String, *mut ObjectString, BuildHasherDefault<FxHasher>>,
    /// Intrusive list of every heap object, newest first.
    objects: *mut ObjectString,
    /// Marked objects whose references still need tracing.
    gray_objects: Vec<*mut ObjectString>,
    bytes_allocated: usize,
    next_gc: usize,
}

impl Gc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the interned string for `str`, allocating it on first use.
    /// Never collects; callers gate allocation on [`Gc::should_collect`].
    pub fn intern(&mut self, str: impl AsRef<str> + Into<String>) -> *mut ObjectString {
        if let Some(&object) = self.strings.get(str.as_ref()) {
            return object;
        }

        let string = str.into();
        // The key's heap buffer does not move when the String does, so the
        // object can borrow it for as long as the entry lives.
        let value = unsafe { mem::transmute::<&str, &'static str>(string.as_str()) };
        let mut object = ObjectString::new(value);
        object.next = self.objects;
        let object = Box::into_raw(Box::new(object));

        self.objects = object;
        self.bytes_allocated += unsafe { (*object).size() };
        self.strings.insert(string, object);
        object
    }

    /// True when the next allocation should be preceded by a collection.
    pub fn should_collect(&self) -> bool {
        if cfg!(feature = "gc-off") {
            return false;
        }
        cfg!(feature = "gc-stress") || self.bytes_allocated > self.next_gc
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn mark(&mut self, value: Value) {
        if let Value::String(object) = value {
            self.mark_object(object);
        }
    }

    /// Marking is idempotent: an already-marked object is not revisited.
    pub fn mark_object(&mut self, object: *mut ObjectString) {
        if object.is_null() || unsafe { (*object).is_marked } {
            return;
        }
        unsafe { (*object).is_marked = true };
        self.gray_objects.push(object);
    }

    /// Drains the gray worklist. Strings hold no references, so nothing new
    /// is marked; richer object kinds push their children here instead of
    /// recursing.
    pub fn trace(&mut self) {
        while let Some(object) = self.gray_objects.pop() {
            match unsafe { (*object).kind } {
                ObjectKind::String => {}
            }
        }
    }

    /// Frees every unmarked object, clears the marks on the survivors, and
    /// retunes the collection threshold.
    pub fn sweep(&mut self) {
        let mut link: *mut *mut ObjectString = &mut self.objects;
        loop {
            let object = unsafe { *link };
            if object.is_null() {
                break;
            }
            if unsafe { (*object).is_marked } {
                unsafe { (*object).is_marked = false };
                link = unsafe { &mut (*object).next };
            } else {
                unsafe { *link = (*object).next };
                self.free(object);
            }
        }

        self.next_gc = (self.bytes_allocated * HEAP_GROW_FACTOR).max(HEAP_INIT);
    }

    fn free(&mut self, object: *mut ObjectString) {
        self.bytes_allocated -= unsafe { (*object).size() };
        // Removing the intern entry keeps the table consistent with the
        // object list. The key is dropped only after the header that
        // borrows its bytes.
        let entry = self.strings.remove_entry(unsafe { (*object).value });
        debug_assert!(entry.is_some(), "swept a string missing from the intern table");
        unsafe { drop(Box::from_raw(object)) };
        drop(entry);
    }
}

impl Default for Gc {
    fn default() -> Self {
        Gc {
            strings: HashMap::with_capacity_and_hasher(256, BuildHasherDefault::default()),
            objects: ptr::null_mut(),
            gray_objects: Vec::new(),
            bytes_allocated: 0,
            next_gc: HEAP_INIT,
        }
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        // Headers borrow the map's keys; free them first, then let the map
        // drop the backing strings.
        let mut object = self.objects;
        while !object.is_null() {
            let next = unsafe { (*object).next };
            unsafe { drop(Box::from_raw(object)) };
            object = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Gc, HEAP_INIT};

    #[test]
    fn interning_shares_handles() {
        let mut gc = Gc::new();
        let a = gc.intern("foo");
        let b = gc.intern("bar");
        let c = gc.intern(String::from("foo"));
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn interning_a_duplicate_allocates_nothing() {
        let mut gc = Gc::new();
        gc.intern("foo");
        let allocated = gc.bytes_allocated();
        gc.intern("foo");
        assert_eq!(gc.bytes_allocated(), allocated);
    }

    #[test]
    fn sweep_frees_unmarked_objects() {
        let mut gc = Gc::new();
        let keep = gc.intern("keep");
        gc.intern("drop-1");
        gc.intern("drop-2");

        gc.mark_object(keep);
        gc.trace();
        gc.sweep();

        assert_eq!(gc.bytes_allocated(), unsafe { (*keep).size() });
        // The survivor's mark is cleared for the next cycle.
        assert!(!unsafe { (*keep).is_marked });
        // The intern table stayed consistent: re-interning the survivor
        // returns the same handle.
        assert_eq!(gc.intern("keep"), keep);
    }

    #[test]
    fn sweep_with_no_roots_frees_everything() {
        let mut gc = Gc::new();
        gc.intern("a");
        gc.intern("b");
        gc.trace();
        gc.sweep();
        assert_eq!(gc.bytes_allocated(), 0);
        assert_eq!(gc.next_gc, HEAP_INIT);
    }

    #[test]
    fn collecting_twice_is_idempotent() {
        let mut gc = Gc::new();
        let object = gc.intern("stable");

        gc.mark_object(object);
        gc.trace();
        gc.sweep();
        let allocated = gc.bytes_allocated();

        gc.mark_object(object);
        gc.trace();
        gc.sweep();
        assert_eq!(gc.bytes_allocated(), allocated);
    }

    #[test]
    fn threshold_never_drops_below_the_initial_heap() {
        let mut gc = Gc::new();
        gc.intern("x");
        gc.trace();
        gc.sweep();
        assert!(gc.next_gc >= HEAP_INIT);
    }
}
