//! The liveness-check bitmask. The bit values are the committed wire
//! configuration and must not be renumbered.

use bitflags::bitflags;

bitflags! {
    /// Selects when a [`SteadyConnection`](crate::steady::SteadyConnection)
    /// health-checks itself with the driver's `ping`.
    ///
    /// Bits combine freely: `ON_CHECKOUT | ON_EXECUTE` pings both when a
    /// connection leaves the pool and before every tough-method call.
    #[derive(Default)]
    pub struct PingMask: u8 {
        /// Ping when a connection is taken from the pool.
        const ON_CHECKOUT = 0b001;
        /// Ping when a cursor is created.
        const ON_CURSOR    = 0b010;
        /// Ping before an `execute*`/`call*` operation.
        const ON_EXECUTE   = 0b100;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_bits() {
        let mask = PingMask::ON_CHECKOUT | PingMask::ON_EXECUTE;
        assert!(mask.contains(PingMask::ON_CHECKOUT));
        assert!(mask.contains(PingMask::ON_EXECUTE));
        assert!(!mask.contains(PingMask::ON_CURSOR));
        assert_eq!(mask.bits(), 0b101);
    }

    #[test]
    fn truncates_unknown_bits() {
        let mask = PingMask::from_bits_truncate(0xff);
        assert_eq!(mask.bits(), 0b111);
    }

    #[test]
    fn empty_contains_nothing() {
        assert!(PingMask::empty().is_empty());
        assert!(!PingMask::empty().contains(PingMask::ON_CHECKOUT));
    }
}
