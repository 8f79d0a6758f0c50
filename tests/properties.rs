use cardvault::codec::{RecordCodec, SealedRecords};
use cardvault::crypto::StaticKey;
use cardvault::header::{HEADER_SIZE, MAX_PAYLOAD};
use cardvault::transport::{CardSession, MemoryCard, DEFAULT_KEY_A};
use cardvault::RecordType;
use proptest::prelude::*;

fn any_plain_type() -> impl Strategy<Value = RecordType> {
    any::<u8>().prop_filter("encrypted records need aligned lengths", |t| *t != 0x02).prop_map(RecordType)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn record_roundtrip(record_type in any_plain_type(), payload in prop::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD)) {
        let mut card = MemoryCard::default();
        let codec = RecordCodec::new();
        let mut s = CardSession::open(&mut card, DEFAULT_KEY_A).unwrap();

        codec.write(&mut s, record_type, &payload).unwrap();
        let (read_type, back) = codec.read_to_vec(&mut s).unwrap();
        prop_assert_eq!(read_type, record_type);
        prop_assert_eq!(back, payload);
    }

    #[test]
    fn shorter_write_zeroes_the_tail(
        long in prop::collection::vec(1u8.., 0..=MAX_PAYLOAD),
        short in prop::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD),
    ) {
        let mut card = MemoryCard::default();
        let codec = RecordCodec::new();
        {
            let mut s = CardSession::open(&mut card, DEFAULT_KEY_A).unwrap();
            codec.write(&mut s, RecordType::PLAINTEXT, &long).unwrap();
            codec.write(&mut s, RecordType::PLAINTEXT, &short).unwrap();
        }
        let area = card.user_area();
        let end = HEADER_SIZE + short.len();
        prop_assert_eq!(&area[HEADER_SIZE..end], &short[..]);
        prop_assert!(area[end..].iter().all(|&b| b == 0));
    }

    #[test]
    fn sealed_roundtrip(secret in prop::collection::vec(1u8.., 0..=735)) {
        let mut card = MemoryCard::default();
        let records = SealedRecords::new(RecordCodec::new(), StaticKey::default());
        let mut s = CardSession::open(&mut card, DEFAULT_KEY_A).unwrap();

        records.write_encrypted(&mut s, &secret).unwrap();
        let payload = records.read(&mut s).unwrap();
        prop_assert_eq!(payload.record_type, RecordType::ENCRYPTED);
        prop_assert_eq!(payload.as_bytes(), &secret[..]);
    }
}
