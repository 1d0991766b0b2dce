//! Thread-local binding of the active progress stack.
//!
//! Each thread has its own "currently active" [`ProgressStack`]; nothing
//! here is shared across threads by design. Only a tracker's cancel flag
//! and read-only snapshot calls are meant to cross threads.
//!
//! [`active`] never returns "no stack": a thread that was never bound gets
//! a lazily created empty stack, which keeps caller code free of null
//! checks. [`bind`] temporarily substitutes a different stack (for
//! example a throwaway one via [`bind_quiet`], to suppress flicker from a
//! noisy sub-routine) and the returned guard restores the previous
//! binding on drop. Balance is enforced by the guard: there is no manual
//! pop to mismatch.

use crate::stack::ProgressStack;
use log::trace;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static ACTIVE_STACK: RefCell<Option<Arc<ProgressStack>>> = const { RefCell::new(None) };
}

/// The calling thread's active stack, lazily created and bound if none.
pub fn active() -> Arc<ProgressStack> {
    ACTIVE_STACK.with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_ref() {
            Some(stack) => Arc::clone(stack),
            None => {
                let stack = Arc::new(ProgressStack::new());
                trace!("lazily binding fresh progress stack to thread");
                *slot = Some(Arc::clone(&stack));
                stack
            }
        }
    })
}

/// Temporarily rebind the calling thread to `stack`.
///
/// The previous binding (possibly none) is restored when the returned
/// guard drops. Guards nest; they restore in reverse order as scopes
/// unwind.
#[must_use = "the override lasts only while the guard is alive"]
pub fn bind(stack: Arc<ProgressStack>) -> BindingGuard {
    let previous = ACTIVE_STACK.with(|cell| cell.borrow_mut().replace(stack));
    trace!("override-bound progress stack to thread");
    BindingGuard {
        previous,
        _thread_confined: PhantomData,
    }
}

/// Rebind the calling thread to a fresh, empty throwaway stack.
///
/// Nested progress reported while the guard is alive lands on the
/// throwaway stack and is never observed.
#[must_use = "the override lasts only while the guard is alive"]
pub fn bind_quiet() -> BindingGuard {
    bind(Arc::new(ProgressStack::new()))
}

/// Restores the previous thread binding on drop.
///
/// `!Send`: the guard must drop on the thread that created it.
pub struct BindingGuard {
    previous: Option<Arc<ProgressStack>>,
    _thread_confined: PhantomData<*mut ()>,
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_STACK.with(|cell| {
            *cell.borrow_mut() = previous;
        });
        trace!("restored previous progress stack binding");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_lazily_creates_and_sticks() {
        std::thread::spawn(|| {
            let first = active();
            let second = active();
            assert!(Arc::ptr_eq(&first, &second));
            assert!(first.is_empty());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_bind_overrides_and_restores() {
        std::thread::spawn(|| {
            let original = active();
            let substitute = Arc::new(ProgressStack::new());
            {
                let _guard = bind(Arc::clone(&substitute));
                assert!(Arc::ptr_eq(&active(), &substitute));
            }
            assert!(Arc::ptr_eq(&active(), &original));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_bind_nests_and_unwinds_in_order() {
        std::thread::spawn(|| {
            let original = active();
            let first = Arc::new(ProgressStack::new());
            let second = Arc::new(ProgressStack::new());

            let outer = bind(Arc::clone(&first));
            {
                let _inner = bind(Arc::clone(&second));
                assert!(Arc::ptr_eq(&active(), &second));
            }
            assert!(Arc::ptr_eq(&active(), &first));
            drop(outer);
            assert!(Arc::ptr_eq(&active(), &original));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_bind_quiet_swallows_nested_progress() {
        std::thread::spawn(|| {
            let real = active();
            {
                let _guard = bind_quiet();
                active().begin(["noisy sub-routine"]).unwrap();
                assert_eq!(active().depth(), 1);
            }
            // Nothing leaked onto the real stack.
            assert!(real.is_empty());
            assert!(Arc::ptr_eq(&active(), &real));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_bindings_are_per_thread() {
        std::thread::spawn(|| {
            let here = active();
            here.begin(["Main work"]).unwrap();

            std::thread::spawn(|| {
                // A different thread gets its own lazily created stack.
                assert!(active().is_empty());
            })
            .join()
            .unwrap();

            assert_eq!(here.depth(), 1);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_guard_restores_during_unwind() {
        std::thread::spawn(|| {
            let original = active();
            let result = std::panic::catch_unwind(|| {
                let _guard = bind_quiet();
                panic!("sub-routine failed");
            });
            assert!(result.is_err());
            assert!(Arc::ptr_eq(&active(), &original));
        })
        .join()
        .unwrap();
    }
}
