//! This module provides [`Page`], the 4 KiB unit of guest-addressable memory, along with its
//! [`PageFlags`] attribute bits, the shared zero-page, the guard page, and the optional
//! per-page trap (MMIO-style) callback.

use bitflags::bitflags;
use std::rc::Rc;

/// The size, in bytes, of one [`Page`].
pub const PAGE_SIZE: usize = 4096;
/// `log2(PAGE_SIZE)`; an address shifted right by this amount yields a page index.
pub const PAGE_SHIFT: u32 = 12;

bitflags! {
    /// Attribute bits tracked per [`Page`].
    pub struct PageFlags: u32 {
        /// The page may be read.
        const READ       = 1 << 0;
        /// The page may be written.
        const WRITE      = 1 << 1;
        /// The page may be executed.
        const EXECUTE    = 1 << 2;
        /// The page's backing storage is shared; a write must first materialize a private
        /// copy (copy-on-write).
        const COW        = 1 << 3;
        /// The page's backing storage is owned by something other than [`Memory`](crate::Memory)
        /// (e.g. a non-owning mapping installed by the embedder).
        const NON_OWNING = 1 << 4;
    }
}

pub(crate) type PageData = Rc<[u8; PAGE_SIZE]>;

/// Describes the access that triggered a page's trap callback.
#[derive(Debug)]
pub enum TrapAccess {
    /// A read of `width` bytes at `offset` within the page.
    Read {
        /// Byte offset within the page.
        offset: u32,
        /// Access width in bytes (1, 2, 4, 8, or 16).
        width: u8,
    },
    /// A write of `width` bytes at `offset` within the page, carrying `value`.
    Write {
        /// Byte offset within the page.
        offset: u32,
        /// Access width in bytes (1, 2, 4, 8, or 16).
        width: u8,
        /// The value the guest is attempting to write.
        value: u128,
    },
}

/// A trap callback installed on a [`Page`]. Returning `Some(value)` substitutes `value` for
/// the result of a read, or for the value actually written; returning `None` falls back to
/// the page's ordinary backing-store behavior.
pub type TrapFn = Box<dyn FnMut(TrapAccess) -> Option<u128>>;

/// A 4 KiB frame of guest memory.
///
/// A page with no backing data must have all three access bits clear, or be the shared
/// zero-page; a writable page is never the shared zero-page; when [`PageFlags::COW`] is set,
/// a write fault must materialize a private copy before mutating.
pub struct Page {
    data: PageData,
    pub(crate) flags: PageFlags,
    trap: Option<TrapFn>,
}

impl Clone for Page {
    fn clone(&self) -> Self {
        Page {
            data: self.data.clone(),
            flags: self.flags,
            trap: None,
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("flags", &self.flags)
            .field("has_trap", &self.trap.is_some())
            .finish()
    }
}

thread_local! {
    static ZERO_PAGE: PageData = Rc::new([0u8; PAGE_SIZE]);
}

impl Page {
    /// Creates a new writable page, zero-initialized and privately owned.
    pub fn new_zeroed() -> Self {
        Page {
            data: Rc::new([0u8; PAGE_SIZE]),
            flags: PageFlags::READ | PageFlags::WRITE,
            trap: None,
        }
    }

    /// Creates a page from the given bytes, with the given flags.
    pub fn from_bytes(bytes: [u8; PAGE_SIZE], flags: PageFlags) -> Self {
        Page {
            data: Rc::new(bytes),
            flags,
            trap: None,
        }
    }

    /// Returns a read-only copy-on-write page backed by the process-wide shared zero page.
    /// Never writable directly; a write fault must call [`Page::cow_resolve`] first.
    pub fn cow_zero_page(extra_flags: PageFlags) -> Self {
        let data = ZERO_PAGE.with(|z| z.clone());
        Page {
            data,
            flags: (PageFlags::READ | PageFlags::COW | extra_flags) & !PageFlags::WRITE,
            trap: None,
        }
    }

    /// Returns the immutable guard page: unmapped memory that traps every access.
    pub fn guard_page() -> Self {
        Page {
            data: ZERO_PAGE.with(|z| z.clone()),
            flags: PageFlags::empty(),
            trap: None,
        }
    }

    /// Whether this page is (or still is) the shared zero-page backing.
    pub fn is_zero_page(&self) -> bool {
        ZERO_PAGE.with(|z| Rc::ptr_eq(z, &self.data))
    }

    /// If this page is marked copy-on-write, materializes a private copy of its backing
    /// storage in place and clears the COW bit, setting it writable. No-op otherwise.
    pub fn cow_resolve(&mut self) {
        if self.flags.contains(PageFlags::COW) {
            self.data = Rc::new(*self.data);
            self.flags.remove(PageFlags::COW);
            self.flags.insert(PageFlags::WRITE);
        }
    }

    /// Installs a trap callback, invoked before every read or write to this page.
    pub fn set_trap(&mut self, trap: TrapFn) {
        self.trap = Some(trap);
    }

    /// Removes any installed trap callback.
    pub fn clear_trap(&mut self) {
        self.trap = None;
    }

    /// Whether a trap callback is installed.
    pub fn has_trap(&self) -> bool {
        self.trap.is_some()
    }

    /// Invokes the trap callback, if any, for the given access.
    pub(crate) fn trap(&mut self, access: TrapAccess) -> Option<u128> {
        self.trap.as_mut().and_then(|f| f(access))
    }

    /// Returns the page's raw backing bytes.
    pub fn bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Returns a mutable view of the page's backing bytes.
    ///
    /// # Panics
    ///
    /// Panics if the page is currently shared (copy-on-write or the zero-page) and has not
    /// been resolved via [`Page::cow_resolve`] first.
    pub fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        Rc::get_mut(&mut self.data).expect("page must be resolved (non-shared) before mutation")
    }

    /// Reads a little-endian, aligned-or-not value of type `T` at `offset`.
    pub fn aligned_read<T: FromLeBytes>(&self, offset: u32) -> T {
        T::from_le_bytes_at(&self.data[..], offset as usize)
    }

    /// Writes a little-endian value of type `T` at `offset`. Requires the page to already be
    /// writable and resolved (see [`Page::bytes_mut`]).
    pub fn aligned_write<T: ToLeBytes>(&mut self, offset: u32, value: T) {
        value.to_le_bytes_at(self.bytes_mut(), offset as usize);
    }
}

/// Helper trait implemented for the integer widths the memory subsystem moves (1/2/4/8/16
/// bytes), used by [`Page::aligned_read`].
pub trait FromLeBytes {
    /// Reads `Self` from `buf` at byte offset `offset`, little-endian.
    fn from_le_bytes_at(buf: &[u8], offset: usize) -> Self;
}

/// Helper trait implemented for the integer widths the memory subsystem moves, used by
/// [`Page::aligned_write`].
pub trait ToLeBytes {
    /// Writes `self` into `buf` at byte offset `offset`, little-endian.
    fn to_le_bytes_at(&self, buf: &mut [u8], offset: usize);
}

macro_rules! impl_le_bytes {
    ($($t:ty),*) => {
        $(
            impl FromLeBytes for $t {
                fn from_le_bytes_at(buf: &[u8], offset: usize) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&buf[offset..offset + std::mem::size_of::<$t>()]);
                    <$t>::from_le_bytes(raw)
                }
            }

            impl ToLeBytes for $t {
                fn to_le_bytes_at(&self, buf: &mut [u8], offset: usize) {
                    let raw = self.to_le_bytes();
                    buf[offset..offset + std::mem::size_of::<$t>()].copy_from_slice(&raw);
                }
            }
        )*
    };
}

impl_le_bytes!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_page_is_shared_until_resolved() {
        let a = Page::cow_zero_page(PageFlags::empty());
        let b = Page::cow_zero_page(PageFlags::empty());
        assert!(a.is_zero_page());
        assert!(b.is_zero_page());

        let mut a = a;
        a.cow_resolve();
        assert!(!a.is_zero_page());
        assert!(b.is_zero_page());
        assert!(a.flags.contains(PageFlags::WRITE));
        assert!(!a.flags.contains(PageFlags::COW));
    }

    #[test]
    fn aligned_read_write_round_trips() {
        let mut page = Page::new_zeroed();
        page.aligned_write::<u32>(16, 0xdead_beef);
        assert_eq!(page.aligned_read::<u32>(16), 0xdead_beef);
    }

    #[test]
    fn guard_page_denies_everything() {
        let page = Page::guard_page();
        assert!(page.flags.is_empty());
    }
}
