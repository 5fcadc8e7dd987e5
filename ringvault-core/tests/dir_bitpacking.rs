//! Invariant #1: every `Dir` field survives a marshal/unmarshal round trip,
//! and the empty sentinel never collides with a legitimate zero offset.

use proptest::prelude::*;
use ringvault_core::constants::DIR_MAX_DATA_SIZE;
use ringvault_core::dir::Dir;

proptest! {
    #[test]
    fn offset_round_trips_through_marshal(offset in 0u64..(1u64 << 40)) {
        let mut d = Dir::new();
        d.set_offset(Some(offset));
        let back = Dir::unmarshal(&d.marshal());
        prop_assert_eq!(back.offset(), Some(offset));
    }

    #[test]
    fn tag_round_trips_through_marshal(tag in 0u16..0x1000) {
        let mut d = Dir::new();
        d.set_offset(Some(1));
        d.set_tag(tag);
        let back = Dir::unmarshal(&d.marshal());
        prop_assert_eq!(back.tag(), tag);
    }

    #[test]
    fn flag_bits_round_trip_independently(phase in any::<bool>(), head in any::<bool>(), pinned in any::<bool>(), token in any::<bool>()) {
        let mut d = Dir::new();
        d.set_offset(Some(1));
        d.set_phase(phase);
        d.set_head(head);
        d.set_pinned(pinned);
        d.set_token(token);
        let back = Dir::unmarshal(&d.marshal());
        prop_assert_eq!(back.phase(), phase);
        prop_assert_eq!(back.head(), head);
        prop_assert_eq!(back.pinned(), pinned);
        prop_assert_eq!(back.token(), token);
    }

    #[test]
    fn approx_size_never_underestimates(bytes in 1u64..(20_000_000u64)) {
        let mut d = Dir::new();
        d.set_approx_size(bytes);
        prop_assert!(d.approx_size() >= bytes.min(DIR_MAX_DATA_SIZE));
    }
}

#[test]
fn marshal_is_exactly_ten_bytes() {
    let d = Dir::new();
    assert_eq!(d.marshal().len(), 10);
}
