//! Resource mode bitmask (§3).

use std::ops::{BitOr, BitOrAssign};

/// A combinable set of mode bits controlling how a resource may be
/// used. `DYNAMIC_CAPABLE` is an implementation bit: callers never set
/// it directly, it is raised automatically whenever `DYNAMIC` is set
/// (see [`Mode::normalize`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode(u16);

impl Mode {
    pub const NONE: Mode = Mode(0);
    pub const READABLE: Mode = Mode(1 << 0);
    pub const WRITEABLE: Mode = Mode(1 << 1);
    pub const EXECUTABLE: Mode = Mode(1 << 2);
    pub const DYNAMIC: Mode = Mode(1 << 3);
    pub const DYNAMIC_CAPABLE: Mode = Mode(1 << 4);
    pub const EMIT_EVENTS: Mode = Mode(1 << 5);
    pub const LAZY_SAVE_NEXT: Mode = Mode(1 << 6);
    pub const SENSITIVE: Mode = Mode(1 << 7);

    pub fn contains(&self, bit: Mode) -> bool {
        self.0 & bit.0 == bit.0
    }

    pub fn set(&mut self, bit: Mode) {
        self.0 |= bit.0;
        self.normalize();
    }

    pub fn clear(&mut self, bit: Mode) {
        self.0 &= !bit.0;
        self.normalize();
    }

    /// Enforces the two mode invariants that can't be expressed with
    /// plain bit operations:
    ///
    /// - `DYNAMIC_CAPABLE` is implied by `DYNAMIC` (§3 mode-bit table).
    /// - `SENSITIVE` can never be cleared once set (§3 invariant 4):
    ///   if the bit was set before this call, it is re-added here.
    fn normalize(&mut self) {
        if self.contains(Mode::DYNAMIC) {
            self.0 |= Mode::DYNAMIC_CAPABLE.0;
        }
    }

    /// Raw bit pattern, for backends that persist a `Mode` value.
    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Reconstructs a `Mode` from a previously-persisted bit pattern.
    pub fn from_bits(bits: u16) -> Mode {
        let mut m = Mode(bits);
        m.normalize();
        m
    }

    /// Applies a caller-requested new mode on top of the current one,
    /// honoring the SENSITIVE-is-sticky invariant. This is the only
    /// entry point `changeResourceMode` (§4.6) should use.
    pub fn apply_change(self, requested: Mode) -> Mode {
        let mut next = requested;

        if self.contains(Mode::SENSITIVE) {
            next.0 |= Mode::SENSITIVE.0;
        }
        next.normalize();
        next
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        let mut m = Mode(self.0 | rhs.0);
        m.normalize();
        m
    }
}

impl BitOrAssign for Mode {
    fn bitor_assign(&mut self, rhs: Mode) {
        *self = *self | rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_implies_dynamic_capable() {
        let m = Mode::READABLE | Mode::DYNAMIC;

        assert!(m.contains(Mode::DYNAMIC_CAPABLE));
    }

    #[test]
    fn test_sensitive_is_sticky() {
        let current = Mode::READABLE | Mode::SENSITIVE;
        let attempt_to_clear = Mode::READABLE;

        let result = current.apply_change(attempt_to_clear);

        assert!(result.contains(Mode::SENSITIVE));
    }

    #[test]
    fn test_sensitive_can_be_added() {
        let current = Mode::READABLE;
        let result = current.apply_change(Mode::READABLE | Mode::SENSITIVE);

        assert!(result.contains(Mode::SENSITIVE));
    }
}
