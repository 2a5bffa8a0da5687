// SPDX-License-Identifier: Apache-2.0

use super::Cross;

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

/// Per-thread call context: the crossing primitive the calling thread is bound to.
///
/// Calls that need a thread context, e.g. [`futex`](super::futex), fail with
/// [`ESRCH`](libc::ESRCH) on a thread that was never bound.
pub struct Thread {
    cross: Arc<dyn Cross>,
}

impl Thread {
    /// Binds the calling thread to `cross` until the returned guard is dropped.
    ///
    /// Bindings nest: dropping the guard restores the previous context.
    pub fn bind(cross: Arc<dyn Cross>) -> Bound {
        let thread = Arc::new(Thread { cross });
        let previous = CURRENT.with(|current| current.borrow_mut().replace(thread));
        Bound {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Returns the context of the calling thread, if it is bound.
    #[inline]
    pub fn current() -> Option<Arc<Thread>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    #[inline]
    pub fn cross(&self) -> &dyn Cross {
        self.cross.as_ref()
    }
}

/// Guard of a [`Thread::bind`] binding.
#[must_use = "the thread is unbound when the guard is dropped"]
pub struct Bound {
    previous: Option<Arc<Thread>>,
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for Bound {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::Direction;
    use crate::item::Envelope;
    use crate::Result;

    struct Fixed(usize);

    impl Cross for Fixed {
        fn cross(&self, _: Direction, envelope: &mut Envelope) -> Result<()> {
            envelope.payload.complete(Ok(self.0));
            Ok(())
        }
    }

    fn current_ret() -> Option<usize> {
        let thread = Thread::current()?;
        let mut envelope = Envelope::default();
        thread.cross().cross(Direction::Ocall, &mut envelope).ok()?;
        envelope.payload.result().ok()
    }

    #[test]
    fn nested_bindings() {
        assert_eq!(current_ret(), None);
        {
            let _outer = Thread::bind(Arc::new(Fixed(1)));
            assert_eq!(current_ret(), Some(1));
            {
                let _inner = Thread::bind(Arc::new(Fixed(2)));
                assert_eq!(current_ret(), Some(2));
            }
            assert_eq!(current_ret(), Some(1));
        }
        assert_eq!(current_ret(), None);
    }

    #[test]
    fn bindings_are_per_thread() {
        let _bound = Thread::bind(Arc::new(Fixed(1)));
        std::thread::spawn(|| assert!(Thread::current().is_none()))
            .join()
            .unwrap();
        assert_eq!(current_ret(), Some(1));
    }
}
