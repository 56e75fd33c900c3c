//! Pointer-sized atomic helpers used by the completion item and the
//! express-reads stack. Re-exports `core::sync::atomic::Ordering` directly
//! rather than inventing a parallel enum (spec.md §5).

pub use std::sync::atomic::Ordering;

/// Encode `target` as a byte offset relative to `base`, as spec.md §3/§9
/// requires for `wow` (and, historically, for the original's list linkage).
/// `target == base` encodes to zero, which is the reserved "points to
/// itself" / null sentinel no real worker or waiter pointer can ever equal.
#[inline]
pub fn encode_offset(base: *const (), target: *const ()) -> isize {
    (target as isize).wrapping_sub(base as isize)
}

/// Inverse of [`encode_offset`].
///
/// # Safety
/// The caller must ensure the offset was produced by a matching
/// [`encode_offset`] call against the same `base`, and that the resulting
/// pointer is only dereferenced while the pointee is known to be alive.
#[inline]
pub unsafe fn decode_offset(base: *const (), offset: isize) -> *const () {
    (base as isize).wrapping_add(offset) as *const ()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn self_offset_round_trips_to_zero() {
        let x: u8 = 0;
        let base = &x as *const u8 as *const ();
        assert_eq!(encode_offset(base, base), 0);
        let decoded = unsafe { decode_offset(base, 0) };
        assert_eq!(decoded, base);
    }

    #[test]
    fn offset_round_trips_through_a_real_pointer() {
        let arr = [0u8; 8];
        let base = &arr[0] as *const u8 as *const ();
        let target = &arr[5] as *const u8 as *const ();
        let off = encode_offset(base, target);
        assert_eq!(off, 5);
        let decoded = unsafe { decode_offset(base, off) };
        assert_eq!(decoded, target);
    }
}
