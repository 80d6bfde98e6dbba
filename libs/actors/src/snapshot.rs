//! Immutable-or-copy values
//!
//! Messages are moved into the runtime, so a sender never keeps a handle to
//! the value a worker is processing. [`Snapshot`] covers the places where
//! one value is handed out more than once: results read from a
//! [`Future`](crate::Future) and payloads of repeating timers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

/// A value the runtime can share or copy when it crosses a worker boundary.
pub trait Snapshot: Send + 'static {
    /// True when the value can be given to several readers without copying.
    fn is_immutable(&self) -> bool;

    /// An independent value: the same shared value when immutable, otherwise
    /// a deep copy.
    fn snapshot(&self) -> Self
    where
        Self: Sized;
}

/// Hand out `value`, sharing when immutable and copying otherwise.
pub fn safe<T: Snapshot>(value: &T) -> T {
    value.snapshot()
}

macro_rules! impl_immutable {
    ($($t:ty),* $(,)?) => {
        $(
            impl Snapshot for $t {
                #[inline]
                fn is_immutable(&self) -> bool {
                    true
                }

                #[inline]
                fn snapshot(&self) -> Self {
                    *self
                }
            }
        )*
    };
}

impl_immutable!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    &'static str,
    std::time::Duration,
    std::time::Instant,
);

/// Shared only when the contents are immutable; otherwise the contents are
/// copied into a fresh `Arc`. Interior-mutable contents such as
/// `Arc<Mutex<_>>` do not implement [`Snapshot`] at all:
///
/// ```compile_fail
/// use actor_runtime::Future;
/// use parking_lot::Mutex;
/// use std::sync::Arc;
///
/// let future: Future<Arc<Mutex<Vec<u8>>>> = Future::new();
/// future.complete(Arc::new(Mutex::new(vec![1])));
/// let _ = future.get(None);
/// ```
impl<T: Snapshot + Sync> Snapshot for Arc<T> {
    fn is_immutable(&self) -> bool {
        (**self).is_immutable()
    }

    fn snapshot(&self) -> Self {
        if self.is_immutable() {
            Arc::clone(self)
        } else {
            Arc::new((**self).snapshot())
        }
    }
}

impl Snapshot for String {
    fn is_immutable(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Self {
        self.clone()
    }
}

impl<T: Snapshot> Snapshot for Option<T> {
    fn is_immutable(&self) -> bool {
        self.as_ref().map_or(true, Snapshot::is_immutable)
    }

    fn snapshot(&self) -> Self {
        self.as_ref().map(Snapshot::snapshot)
    }
}

impl<T: Snapshot> Snapshot for Vec<T> {
    fn is_immutable(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Self {
        self.iter().map(Snapshot::snapshot).collect()
    }
}

impl<T: Snapshot> Snapshot for VecDeque<T> {
    fn is_immutable(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Self {
        self.iter().map(Snapshot::snapshot).collect()
    }
}

impl<K, V> Snapshot for HashMap<K, V>
where
    K: Snapshot + Eq + Hash,
    V: Snapshot,
{
    fn is_immutable(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Self {
        self.iter().map(|(k, v)| (k.snapshot(), v.snapshot())).collect()
    }
}

impl<K, V> Snapshot for BTreeMap<K, V>
where
    K: Snapshot + Ord,
    V: Snapshot,
{
    fn is_immutable(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Self {
        self.iter().map(|(k, v)| (k.snapshot(), v.snapshot())).collect()
    }
}

impl<A: Snapshot, B: Snapshot> Snapshot for (A, B) {
    fn is_immutable(&self) -> bool {
        self.0.is_immutable() && self.1.is_immutable()
    }

    fn snapshot(&self) -> Self {
        (self.0.snapshot(), self.1.snapshot())
    }
}

impl<A: Snapshot, B: Snapshot, C: Snapshot> Snapshot for (A, B, C) {
    fn is_immutable(&self) -> bool {
        self.0.is_immutable() && self.1.is_immutable() && self.2.is_immutable()
    }

    fn snapshot(&self) -> Self {
        (self.0.snapshot(), self.1.snapshot(), self.2.snapshot())
    }
}
