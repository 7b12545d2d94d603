//! Shared cells for values remembered at a tree position.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Value remembered by a tree position and shared with its effects.
///
/// Clones share one value. The position's hook list holds the strong
/// reference; effects and delayed tasks that must not extend the position's
/// lifetime hold a [`WeakOwned`] instead.
pub struct Owned<T> {
    cell: Rc<RefCell<T>>,
}

/// Non-owning handle to an [`Owned`] value.
pub struct WeakOwned<T> {
    cell: Weak<RefCell<T>>,
}

impl<T> Owned<T> {
    pub fn new(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(value)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.borrow())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.cell.borrow_mut())
    }

    /// Like [`update`](Self::update), but returns `None` instead of
    /// panicking when the value is already borrowed further up the stack.
    pub fn try_update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut value = self.cell.try_borrow_mut().ok()?;
        Some(f(&mut value))
    }

    /// Stores `value` and hands back the previous one.
    pub fn replace(&self, value: T) -> T {
        self.cell.replace(value)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    pub fn downgrade(&self) -> WeakOwned<T> {
        WeakOwned {
            cell: Rc::downgrade(&self.cell),
        }
    }
}

impl<T: Clone> Owned<T> {
    pub fn get(&self) -> T {
        self.cell.borrow().clone()
    }
}

impl<T> WeakOwned<T> {
    pub fn upgrade(&self) -> Option<Owned<T>> {
        self.cell.upgrade().map(|cell| Owned { cell })
    }
}

impl<T> Clone for Owned<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> Clone for WeakOwned<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Weak::clone(&self.cell),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.try_borrow() {
            Ok(value) => f.debug_tuple("Owned").field(&*value).finish(),
            Err(_) => f.write_str("Owned(<borrowed>)"),
        }
    }
}
