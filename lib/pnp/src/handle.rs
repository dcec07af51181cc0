//! Reference-counted device handles.
//!
//! - [Handle<T>] is a counted reference backed by [alloc::sync::Arc]. Cloning a handle takes a
//!   reference, dropping it releases one. Moving a handle is how ownership of a reference passes
//!   from one owner (a queued request, for instance) to another (the tree enumerator).
//! - [HandleRef<T>] is a weak back-reference, used for parent pointers so that a child does not
//!   keep its parent alive.
use alloc::sync::{Arc, Weak};
use core::ops::Deref;

#[derive(Debug)]
/// Strong counted handle backed by [Arc<T>].
pub struct Handle<T> {
    inner: Arc<T>,
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> From<T> for Handle<T> {
    fn from(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Handle<T> {
    /// Create a weak [HandleRef<T>] to the same object. It does not count as a reference.
    pub fn create_ref(&self) -> HandleRef<T> {
        HandleRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of strong references currently held, this one included.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the referenced object; stable for its lifetime, used in logs and stop codes.
    pub fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

#[derive(Debug)]
/// Weak (non-owning) handle backed by [Weak<T>].
pub struct HandleRef<T> {
    inner: Weak<T>,
}

impl<T> Clone for HandleRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> HandleRef<T> {
    /// Attempt to take a strong reference. Returns `None` once every [Handle<T>] is gone.
    pub fn get_handle(&self) -> Option<Handle<T>> {
        Weak::upgrade(&self.inner).map(|inner| Handle { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_and_drop_move_the_count() {
        let a = Handle::from(5u32);
        assert_eq!(a.reference_count(), 1);
        let b = a.clone();
        assert_eq!(a.reference_count(), 2);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.address(), b.address());
        drop(b);
        assert_eq!(a.reference_count(), 1);
    }

    #[test]
    fn weak_ref_does_not_keep_object_alive() {
        let a = Handle::from(5u32);
        let weak = a.create_ref();
        assert_eq!(*weak.get_handle().unwrap(), 5);
        drop(a);
        assert!(weak.get_handle().is_none());
    }
}
