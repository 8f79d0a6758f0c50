use cardvault::codec::{RecordCodec, SealedRecords};
use cardvault::config::{CardConfig, CipherKeySource};
use cardvault::crypto::{self, StaticKey, DEFAULT_CIPHER_KEY};
use cardvault::geometry::{manufacturer_block, PiccType, ATQA_CLASSIC_1K};
use cardvault::header::{HeaderFault, MAX_PAYLOAD};
use cardvault::layout::{CAPACITY_BYTES, USER_BLOCKS};
use cardvault::recovery::{self, CardHealth, HeaderVerdict};
use cardvault::transport::{CardSession, MemoryCard, PiccError, DEFAULT_KEY_A};
use cardvault::vault::{PasswordCard, Protection};
use cardvault::{CardError, RecordType};
use tempfile::NamedTempFile;

fn session(card: &mut MemoryCard) -> CardSession<&mut MemoryCard> {
    CardSession::open(card, DEFAULT_KEY_A).unwrap()
}

fn header_block(record_type: u8, len: u16) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[0] = record_type;
    block[1..3].copy_from_slice(&len.to_le_bytes());
    block
}

#[test]
fn test_plaintext_roundtrip() {
    let mut card = MemoryCard::default();
    let codec = RecordCodec::new();
    let mut s = session(&mut card);

    let payload = b"correct horse battery staple";
    codec.write(&mut s, RecordType::PLAINTEXT, payload).unwrap();

    let mut buf = [0u8; 64];
    let info = codec.read(&mut s, &mut buf).unwrap();
    assert_eq!(info.record_type, RecordType::PLAINTEXT);
    assert_eq!(info.len, payload.len());
    assert_eq!(&buf[..info.len], payload);
}

#[test]
fn test_header_layout_on_card() {
    let mut card = MemoryCard::default();
    let payload: Vec<u8> = (1..=20).collect();
    RecordCodec::new().write(&mut session(&mut card), RecordType(0x42), &payload).unwrap();

    // type | len LE | first 13 payload bytes
    let first = card.block(1);
    assert_eq!(&first[..3], &[0x42, 20, 0]);
    assert_eq!(&first[3..], &payload[..13]);
    let second = card.block(2);
    assert_eq!(&second[..7], &payload[13..]);
    assert_eq!(&second[7..], &[0u8; 9]);
}

#[test]
fn test_rewrite_is_idempotent() {
    let mut card = MemoryCard::default();
    let codec = RecordCodec::new();

    codec.write(&mut session(&mut card), RecordType::PLAINTEXT, b"same bytes").unwrap();
    let first = card.to_image();
    codec.write(&mut session(&mut card), RecordType::PLAINTEXT, b"same bytes").unwrap();
    assert_eq!(card.to_image(), first);
}

#[test]
fn test_shorter_record_leaves_no_residue() {
    let mut card = MemoryCard::default();
    let codec = RecordCodec::new();

    codec.write(&mut session(&mut card), RecordType::PLAINTEXT, &[0xAB; 700]).unwrap();
    codec.write(&mut session(&mut card), RecordType::PLAINTEXT, b"tiny").unwrap();

    let area = card.user_area();
    assert_eq!(&area[..7], &[0x01, 4, 0, b't', b'i', b'n', b'y']);
    assert!(area[7..].iter().all(|&b| b == 0));
}

#[test]
fn test_capacity_boundary() {
    let mut card = MemoryCard::default();
    let codec = RecordCodec::new();
    let mut s = session(&mut card);

    let full = vec![0x5A; MAX_PAYLOAD];
    codec.write(&mut s, RecordType::PLAINTEXT, &full).unwrap();
    let (record_type, back) = codec.read_to_vec(&mut s).unwrap();
    assert_eq!(record_type, RecordType::PLAINTEXT);
    assert_eq!(back, full);

    let writes_before = s.card().write_count();
    let err = codec.write(&mut s, RecordType::PLAINTEXT, &vec![0x5A; MAX_PAYLOAD + 1]).unwrap_err();
    assert!(matches!(err, CardError::PayloadTooLarge { len: 750, max: 749 }));
    assert_eq!(s.card().write_count(), writes_before);
}

#[test]
fn test_corrupt_length_is_invalid_header() {
    let mut card = MemoryCard::default();
    card.set_block(1, header_block(0x01, 753));

    let mut s = session(&mut card);
    let mut buf = vec![0u8; CAPACITY_BYTES];
    let err = RecordCodec::new().read(&mut s, &mut buf).unwrap_err();
    assert!(matches!(err, CardError::InvalidHeader(HeaderFault::LengthExceedsCapacity(753))));
    assert!(err.is_recoverable());
    // The failed read tore the crypto session down.
    assert_eq!(s.card().authenticated_sector(), None);
}

#[test]
fn test_misaligned_ciphertext_is_invalid_header() {
    let mut card = MemoryCard::default();
    card.set_block(1, header_block(0x02, 17));

    let mut s = session(&mut card);
    let err = SealedRecords::new(RecordCodec::new(), StaticKey::default())
        .read(&mut s)
        .unwrap_err();
    assert!(matches!(err, CardError::InvalidHeader(HeaderFault::MisalignedCiphertext(17))));
    // Rejected from the header block alone.
    assert_eq!(s.card().read_count(), 1);
}

#[test]
fn test_buffer_too_small() {
    let mut card = MemoryCard::default();
    let codec = RecordCodec::new();
    let mut s = session(&mut card);
    codec.write(&mut s, RecordType::PLAINTEXT, &[7u8; 40]).unwrap();

    let mut buf = [0u8; 39];
    let err = codec.read(&mut s, &mut buf).unwrap_err();
    assert!(matches!(err, CardError::BufferTooSmall { needed: 40, available: 39 }));
}

#[test]
fn test_encrypted_password_scenario() {
    let mut card = MemoryCard::default();
    let records = SealedRecords::new(RecordCodec::new(), StaticKey::default());
    let mut s = session(&mut card);

    records.write_encrypted(&mut s, b"Pwd_AB3x9Z").unwrap();
    let payload = records.read(&mut s).unwrap();
    assert_eq!(payload.record_type, RecordType::ENCRYPTED);
    assert_eq!(payload.as_str(), Some("Pwd_AB3x9Z"));
    drop(s);

    let first = card.block(1);
    assert_eq!(&first[..3], &[0x02, 16, 0]);
    let expected = crypto::seal(&DEFAULT_CIPHER_KEY, b"Pwd_AB3x9Z").unwrap();
    assert_eq!(card.user_area()[3..19], expected[..]);
    assert_ne!(&card.user_area()[3..13], b"Pwd_AB3x9Z");
}

#[test]
fn test_encrypted_capacity() {
    let mut card = MemoryCard::default();
    let records = SealedRecords::new(RecordCodec::new(), StaticKey::default());
    let mut s = session(&mut card);

    // 735 bytes + terminator fill 46 cipher blocks.
    let longest = vec![b'x'; 735];
    records.write_encrypted(&mut s, &longest).unwrap();
    assert_eq!(records.read(&mut s).unwrap().as_bytes(), &longest[..]);

    let err = records.write_encrypted(&mut s, &[b'x'; 736]).unwrap_err();
    assert!(matches!(err, CardError::PayloadTooLarge { len: 752, .. }));
}

#[test]
fn test_wrong_cipher_key_does_not_return_plaintext() {
    let mut card = MemoryCard::default();
    let mut s = session(&mut card);
    SealedRecords::new(RecordCodec::new(), StaticKey::default())
        .write_encrypted(&mut s, b"Pwd_AB3x9Z")
        .unwrap();

    let other = SealedRecords::new(RecordCodec::new(), StaticKey::new([0x11; 16]));
    match other.read(&mut s) {
        Ok(payload) => assert_ne!(payload.as_bytes(), b"Pwd_AB3x9Z"),
        Err(e) => panic!("decryption with another key should still yield bytes: {e}"),
    }
}

#[test]
fn test_empty_record_reads_only_header_block() {
    let mut card = MemoryCard::default();
    let codec = RecordCodec::new();
    let mut s = session(&mut card);
    codec.write(&mut s, RecordType::NONE, &[]).unwrap();

    let reads_before = s.card().read_count();
    let mut buf = [0u8; 0];
    let info = codec.read(&mut s, &mut buf).unwrap();
    assert_eq!(info.len, 0);
    assert_eq!(info.record_type, RecordType::NONE);
    assert_eq!(s.card().read_count() - reads_before, 1);
}

#[test]
fn test_write_failure_at_third_block() {
    let mut card = MemoryCard::default();
    card.faults_mut().fail_write_at = Some(USER_BLOCKS[2]);

    let mut s = session(&mut card);
    let err = RecordCodec::new()
        .write(&mut s, RecordType::PLAINTEXT, &[0x33; 40])
        .unwrap_err();
    assert!(matches!(err, CardError::Io { block: 4, source: PiccError::Nak(_) }));
    assert_eq!(err.failed_block(), Some(4));
    assert_eq!(s.card().authenticated_sector(), None);
    drop(s);

    // Blocks before the failure stay written; nothing after it was touched.
    assert_eq!(&card.block(1)[..3], &[0x01, 40, 0]);
    assert_eq!(card.block(2), &[0x33; 16]);
    assert_eq!(card.block(5), &[0u8; 16]);
}

#[test]
fn test_read_failure_reports_block() {
    let mut card = MemoryCard::default();
    RecordCodec::new().write(&mut session(&mut card), RecordType::PLAINTEXT, &[1u8; 100]).unwrap();
    card.faults_mut().fail_read_at = Some(6);

    let mut s = session(&mut card);
    let err = RecordCodec::new().read_to_vec(&mut s).unwrap_err();
    assert!(matches!(err, CardError::Io { block: 6, source: PiccError::Timeout }));
}

#[test]
fn test_auth_failure_is_distinct_from_io() {
    let mut card = MemoryCard::default();
    card.faults_mut().reject_auth_sector = Some(2);

    let mut s = session(&mut card);
    let err = RecordCodec::new()
        .write(&mut s, RecordType::PLAINTEXT, &[9u8; 200])
        .unwrap_err();
    assert!(matches!(err, CardError::Auth { sector: 2, block: 8, source: PiccError::AuthRejected }));
}

#[test]
fn test_wrong_key_a() {
    let mut card = MemoryCard::default();
    let mut s = CardSession::open(&mut card, [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]).unwrap();
    let err = RecordCodec::new().read_to_vec(&mut s).unwrap_err();
    assert!(matches!(err, CardError::Auth { sector: 0, block: 1, .. }));
}

#[test]
fn test_one_handshake_per_sector() {
    let mut card = MemoryCard::default();
    let mut s = session(&mut card);
    RecordCodec::new().write(&mut s, RecordType::PLAINTEXT, b"abc").unwrap();

    // 47 user blocks over 16 sectors.
    assert_eq!(s.handshakes(), 16);
    assert_eq!(s.card().auth_count(), 16);
    assert_eq!(s.card().write_count(), 47);
}

#[test]
fn test_reserved_blocks_never_written() {
    let mut card = MemoryCard::default();
    let mut s = session(&mut card);
    for addr in [0u8, 3, 7, 63, 64, 200] {
        let err = s.write_block(addr, &[0xFF; 16]).unwrap_err();
        assert!(matches!(err, CardError::InvalidAddress(a) if a == addr));
    }
    assert_eq!(s.card().auth_count(), 0);
    assert_eq!(s.card().write_count(), 0);
}

#[test]
fn test_unsupported_card_is_refused() {
    let mut card = MemoryCard::default();
    card.set_block(0, manufacturer_block([1, 2, 3, 4], 0x18, [0x02, 0x00]));

    let err = CardSession::open(&mut card, DEFAULT_KEY_A).err().unwrap();
    assert!(matches!(
        err,
        CardError::UnsupportedCard { picc_type: PiccType::MifareClassic4K, sak: 0x18 }
    ));
    assert!(!card.is_selected());
    assert_eq!(card.auth_count(), 0);
}

#[test]
fn test_no_card_in_field() {
    let mut card = MemoryCard::blank([9, 9, 9, 9]);
    card.remove();
    let err = CardSession::open(&mut card, DEFAULT_KEY_A).err().unwrap();
    assert!(matches!(err, CardError::Select(PiccError::NoCard)));

    card.insert();
    let s = CardSession::open(&mut card, DEFAULT_KEY_A).unwrap();
    assert_eq!(s.info().uid, vec![9, 9, 9, 9]);
    assert_eq!(s.info().atqa, ATQA_CLASSIC_1K);
}

#[test]
fn test_staged_commit_detects_interrupted_write() {
    let mut card = MemoryCard::default();
    let staged = RecordCodec::staged();

    {
        let mut s = session(&mut card);
        staged.write(&mut s, RecordType::PLAINTEXT, b"old secret").unwrap();
        assert_eq!(s.handshakes(), 17);
    }
    assert_eq!(card.block(1)[0], 0x01);

    card.faults_mut().fail_write_at = Some(20);
    assert!(staged.write(&mut session(&mut card), RecordType::PLAINTEXT, b"new secret").is_err());
    card.clear_faults();
    assert_eq!(card.block(1)[0], 0x81);

    let err = staged.read_to_vec(&mut session(&mut card)).unwrap_err();
    assert!(matches!(err, CardError::InterruptedWrite(RecordType::PLAINTEXT)));
    assert!(err.is_recoverable());

    // Without staging the byte is just another type code.
    let (record_type, _) = RecordCodec::new().read_to_vec(&mut session(&mut card)).unwrap();
    assert_eq!(record_type, RecordType(0x81));
}

#[test]
fn test_staged_commit_refuses_flagged_types() {
    let mut card = MemoryCard::default();
    let err = RecordCodec::staged()
        .write(&mut session(&mut card), RecordType(0x90), b"x")
        .unwrap_err();
    assert!(matches!(err, CardError::ReservedType(RecordType(0x90))));

    RecordCodec::new().write(&mut session(&mut card), RecordType(0x90), b"x").unwrap();
    assert_eq!(card.block(1)[0], 0x90);
}

#[test]
fn test_dump_user_area() {
    let mut card = MemoryCard::default();
    let mut s = session(&mut card);
    RecordCodec::new().write(&mut s, RecordType::PLAINTEXT, b"dump me").unwrap();

    let area = recovery::dump_user_area(&mut s).unwrap();
    assert_eq!(area.len(), CAPACITY_BYTES);
    assert_eq!(&area[3..10], b"dump me");
    drop(s);
    assert_eq!(area, card.user_area());
}

#[test]
fn test_inspect_clean_and_residue() {
    let mut card = MemoryCard::default();
    RecordCodec::new().write(&mut session(&mut card), RecordType::PLAINTEXT, &[1u8; 30]).unwrap();

    let report = recovery::inspect(&mut session(&mut card), false);
    assert_eq!(report.health, CardHealth::Clean);
    assert_eq!(report.header, HeaderVerdict::Valid { record_type: RecordType::PLAINTEXT, stored_len: 30 });
    assert_eq!(report.footprint_blocks, 3);
    assert_eq!(report.uid, "DEADBEEF");

    card.set_block(40, [0xEE; 16]);
    let report = recovery::inspect(&mut session(&mut card), false);
    assert_eq!(report.health, CardHealth::Residue);
    assert_eq!(report.residue_blocks, vec![40]);
}

#[test]
fn test_inspect_resumes_after_unreadable_block() {
    let mut card = MemoryCard::default();
    RecordCodec::new().write(&mut session(&mut card), RecordType::PLAINTEXT, &[2u8; 60]).unwrap();
    card.faults_mut().fail_read_at = Some(5);

    let report = recovery::inspect(&mut session(&mut card), false);
    assert_eq!(report.unreadable_blocks, vec![5]);
    assert_eq!(report.health, CardHealth::Unreadable);
    assert_eq!(report.header, HeaderVerdict::Valid { record_type: RecordType::PLAINTEXT, stored_len: 60 });
}

#[test]
fn test_io_failure_forces_new_handshake() {
    let mut card = MemoryCard::default();
    card.faults_mut().fail_read_at = Some(5);

    let mut s = session(&mut card);
    assert!(s.read_block(4).is_ok());
    assert!(matches!(s.read_block(5), Err(CardError::Io { block: 5, .. })));
    assert!(s.read_block(6).is_ok());
    assert_eq!(s.handshakes(), 2);
}

#[test]
fn test_inspect_corrupt_and_unreadable() {
    let mut card = MemoryCard::default();
    card.set_block(1, header_block(0x01, 900));
    let report = recovery::inspect(&mut session(&mut card), false);
    assert_eq!(report.health, CardHealth::Corrupt);
    assert!(matches!(report.header, HeaderVerdict::Invalid { stored_len: 900, .. }));

    card.faults_mut().fail_read_at = Some(1);
    let report = recovery::inspect(&mut session(&mut card), false);
    assert_eq!(report.health, CardHealth::Unreadable);
    assert_eq!(report.header, HeaderVerdict::Unreadable);
    assert_eq!(report.unreadable_blocks, vec![1]);

    let json = report.to_json().unwrap();
    assert!(json.contains("\"health\": \"unreadable\""));
}

#[test]
fn test_password_card_lifecycle() {
    let mut card = MemoryCard::default();
    let config = CardConfig::default();

    let mut vault = PasswordCard::open(&mut card, &config).unwrap();
    assert_eq!(vault.info().uid_hex(), "DEADBEEF");

    vault.store_password(b"hunter2", Protection::Encrypted).unwrap();
    assert_eq!(vault.load_password().unwrap().unwrap().as_str(), Some("hunter2"));

    vault.store_password(b"visible", Protection::Plain).unwrap();
    let payload = vault.load_password().unwrap().unwrap();
    assert_eq!(payload.record_type, RecordType::PLAINTEXT);
    assert_eq!(payload.as_bytes(), b"visible");

    vault.erase().unwrap();
    assert!(vault.load_password().unwrap().is_none());
    assert_eq!(vault.inspect().health, CardHealth::Clean);

    let card = vault.finish();
    assert!(!card.is_selected());
    assert_eq!(card.authenticated_sector(), None);
}

#[test]
fn test_store_record_encrypts_encrypted_type() {
    let mut card = MemoryCard::default();
    let mut vault = PasswordCard::open(&mut card, &CardConfig::default()).unwrap();
    vault.store_record(RecordType::ENCRYPTED, b"0123456789abcdef").unwrap();
    assert_eq!(vault.load_password().unwrap().unwrap().as_str(), Some("0123456789abcdef"));
    vault.finish();

    // 16 bytes + terminator pad to two cipher blocks.
    assert_eq!(&card.block(1)[..3], &[0x02, 32, 0]);
    assert_ne!(&card.block(1)[3..], b"0123456789abc");
}

#[test]
fn test_password_card_rejects_embedded_zero() {
    let mut card = MemoryCard::default();
    let mut vault = PasswordCard::open(&mut card, &CardConfig::default()).unwrap();
    let err = vault.store_password(b"a\0b", Protection::Encrypted).unwrap_err();
    assert!(matches!(err, CardError::Crypto(crypto::CryptoError::EmbeddedTerminator(1))));
    vault.finish();
    assert_eq!(card.write_count(), 0);
}

#[test]
fn test_passphrase_config_roundtrip() {
    let config = CardConfig {
        cipher: CipherKeySource::Passphrase { passphrase: "open sesame".into(), salt: "cardvault".into() },
        ..CardConfig::default()
    };
    let mut card = MemoryCard::default();
    {
        let mut vault = PasswordCard::open(&mut card, &config).unwrap();
        vault.store_password(b"Pwd_AB3x9Z", Protection::Encrypted).unwrap();
        vault.finish();
    }

    // The default static key cannot read it back.
    let mut vault = PasswordCard::open(&mut card, &CardConfig::default()).unwrap();
    let wrong = vault.load_password().unwrap().map(|p| p.as_bytes().to_vec());
    assert_ne!(wrong.as_deref(), Some(&b"Pwd_AB3x9Z"[..]));
    vault.finish();

    let mut vault = PasswordCard::open(&mut card, &config).unwrap();
    assert_eq!(vault.load_password().unwrap().unwrap().as_str(), Some("Pwd_AB3x9Z"));
}

#[test]
fn test_card_image_persistence() {
    let temp_file = NamedTempFile::new().unwrap();
    let image_path = temp_file.path().to_path_buf();

    {
        let mut card = MemoryCard::blank([0x01, 0x23, 0x45, 0x67]);
        let mut vault = PasswordCard::open(&mut card, &CardConfig::default()).unwrap();
        vault.store_password(b"persisted", Protection::Encrypted).unwrap();
        vault.finish();
        card.save(&image_path).unwrap();
    }

    assert_eq!(std::fs::metadata(&image_path).unwrap().len(), 1024);

    {
        let mut card = MemoryCard::load(&image_path).unwrap();
        let mut vault = PasswordCard::open(&mut card, &CardConfig::default()).unwrap();
        assert_eq!(vault.info().uid_hex(), "01234567");
        assert_eq!(vault.load_password().unwrap().unwrap().as_str(), Some("persisted"));
    }
}

#[test]
fn test_config_file() {
    let temp_file = NamedTempFile::new().unwrap();
    std::fs::write(
        temp_file.path(),
        r#"{ "key_a": "a0a1a2a3a4a5", "staged_commit": true, "read_delay_ms": 1 }"#,
    )
    .unwrap();

    let config = CardConfig::load(temp_file.path()).unwrap();
    assert_eq!(config.key_a, [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
    assert!(config.codec().is_staged());

    // Cards still on the factory key refuse the configured one.
    let mut card = MemoryCard::default();
    let mut vault = PasswordCard::open(&mut card, &config).unwrap();
    assert!(matches!(vault.load_password(), Err(CardError::Auth { .. })));
    vault.finish();

    for sector in 0..16 {
        card.set_key_a(sector, &config.key_a);
    }
    let mut vault = PasswordCard::open(&mut card, &config).unwrap();
    vault.store_password(b"rekeyed", Protection::Plain).unwrap();
    assert_eq!(vault.load_password().unwrap().unwrap().as_str(), Some("rekeyed"));
}
