//! Change tracking for persistent parse results.
//!
//! Structures that survive across access units are updated in place with
//! [`assign`], which raises a flag only when the stored value changes.

use bitflags::Flags;

/// Stores `value` into `dst`, inserting `flag` into `flags` if they differ.
#[inline]
pub fn assign<F: Flags, T: PartialEq>(flags: &mut F, flag: F, dst: &mut T, value: T) -> bool {
    if *dst == value {
        return false;
    }

    *dst = value;
    flags.insert(flag);

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    bitflags::bitflags! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        struct TestFlags: u8 {
            const A = 1;
            const B = 2;
        }
    }

    #[test]
    fn flags_only_on_change() {
        let mut flags = TestFlags::empty();
        let mut value = 3u8;

        assert!(!assign(&mut flags, TestFlags::A, &mut value, 3));
        assert!(flags.is_empty());

        assert!(assign(&mut flags, TestFlags::B, &mut value, 4));
        assert_eq!(flags, TestFlags::B);
        assert_eq!(value, 4);

        let mut list = vec![1, 2];
        assign(&mut flags, TestFlags::A, &mut list, vec![1, 2]);
        assert_eq!(flags, TestFlags::B);
    }
}
