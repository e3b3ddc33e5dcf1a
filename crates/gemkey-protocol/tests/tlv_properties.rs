//! Randomized properties of the TLV codec.

use gemkey_protocol::*;
use proptest::prelude::*;

fn value() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=MAX_VALUE_LEN)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_encode_decode_roundtrips(tag in any::<u8>(), value in value()) {
        let wire = encode(tag, &value).unwrap();
        prop_assert_eq!(wire.len(), TLV_HEADER_SIZE + value.len());
        prop_assert_eq!(wire[0], tag);
        prop_assert_eq!(wire[1] as usize, value.len());

        let (record, consumed) = decode(&wire).unwrap();
        prop_assert_eq!(consumed, wire.len());
        prop_assert_eq!(record.tag, tag);
        prop_assert_eq!(record.value, value);
    }

    // Decoding consumes exactly one record and leaves the rest
    #[test]
    fn prop_decode_stops_at_record_boundary(
        first in (any::<u8>(), value()),
        second in (any::<u8>(), value()),
    ) {
        let mut wire = encode(first.0, &first.1).unwrap().to_vec();
        wire.extend_from_slice(&encode(second.0, &second.1).unwrap());

        let (record, consumed) = decode(&wire).unwrap();
        prop_assert_eq!(record, TlvRecord::new(first.0, first.1).unwrap());

        let (record, rest) = decode(&wire[consumed..]).unwrap();
        prop_assert_eq!(record, TlvRecord::new(second.0, second.1).unwrap());
        prop_assert_eq!(consumed + rest, wire.len());
    }

    #[test]
    fn prop_truncated_record_is_incomplete(tag in any::<u8>(), value in value(), cut in any::<prop::sample::Index>()) {
        let wire = encode(tag, &value).unwrap();
        let keep = 1 + cut.index(wire.len() - 1);

        let result = decode(&wire[..keep]);
        prop_assert!(
            matches!(result, Err(ProtocolError::IncompleteRecord { .. })),
            "prefix of {} bytes decoded as {:?}", keep, result
        );
    }

    #[test]
    fn prop_oversized_value_is_rejected(tag in any::<u8>(), extra in 1usize..64) {
        let value = vec![0u8; MAX_VALUE_LEN + extra];
        prop_assert!(
            matches!(
                encode(tag, &value),
                Err(ProtocolError::Encoding { len, max: MAX_VALUE_LEN }) if len == value.len()
            ),
            "encoded {} bytes", value.len()
        );
        prop_assert!(TlvRecord::new(tag, value).is_err());
    }

    // The async reader agrees with the in-memory decoder
    #[test]
    fn prop_read_record_matches_decode(tag in any::<u8>(), value in value()) {
        let wire = encode(tag, &value).unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();

        let mut reader: &[u8] = &wire;
        let record = runtime.block_on(read_record(&mut reader)).unwrap();
        prop_assert_eq!(record, decode(&wire).unwrap().0);
        prop_assert!(reader.is_empty());
    }
}
