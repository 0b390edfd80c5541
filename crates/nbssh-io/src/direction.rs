//! Direction masks reported by a non-blocking engine.

bitflags::bitflags! {
    /// The socket directions an engine is waiting on.
    ///
    /// Bit 0 means the engine wants to read, bit 1 that it wants to write.
    /// The empty mask means nothing is pending.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Directions: u8 {
        /// The engine is blocked reading from the socket.
        const READ = 0b01;
        /// The engine is blocked writing to the socket.
        const WRITE = 0b10;
        /// Blocked in both directions.
        const BOTH = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Directions {
    /// Build a mask from raw engine bits, ignoring unknown bits.
    #[must_use]
    pub const fn from_raw(bits: u8) -> Self {
        Self::from_bits_truncate(bits)
    }

    /// Whether the read bit is set.
    #[must_use]
    pub const fn wants_read(self) -> bool {
        self.contains(Self::READ)
    }

    /// Whether the write bit is set.
    #[must_use]
    pub const fn wants_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}

/// Something that can report which directions it is blocked on.
///
/// Implemented by protocol sessions; the retry loop queries it after every
/// "would block" result.
pub trait BlockDirections {
    /// The directions the engine is currently waiting on.
    fn block_directions(&self) -> Directions;
}

impl<T: BlockDirections + ?Sized> BlockDirections for &T {
    fn block_directions(&self) -> Directions {
        (**self).block_directions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_bits() {
        assert_eq!(Directions::from_raw(0), Directions::empty());
        assert_eq!(Directions::from_raw(1), Directions::READ);
        assert_eq!(Directions::from_raw(2), Directions::WRITE);
        assert_eq!(Directions::from_raw(3), Directions::BOTH);
        // Unknown high bits are dropped
        assert_eq!(Directions::from_raw(0b101), Directions::READ);
    }

    #[test]
    fn predicates() {
        assert!(Directions::BOTH.wants_read());
        assert!(Directions::BOTH.wants_write());
        assert!(!Directions::WRITE.wants_read());
        assert!(Directions::default().is_empty());
    }
}
