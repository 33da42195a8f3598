//! Registry lookup and round-trip tests for block ciphers, stream ciphers,
//! digests, MACs, and the PBKDF2/HKDF key-derivation paths.

use cex_primitives::{
    block_cipher, digest, kdf, mac, prng, stream_cipher, BlockCipherKind, DigestKind, KeyMaterial, MacKind, PrngKind,
    StreamCipherKind,
};

fn aes_description(key_bits: u16) -> cex_primitives::CipherDescription {
    cex_primitives::CipherDescription {
        engine: 0,
        key_bits,
        iv_bits: 128,
        mode: cex_primitives::CipherMode::Ctr,
        padding: cex_primitives::PaddingMode::None,
        block_bits: 128,
        rounds: 0,
        kdf_digest: DigestKind::Sha256,
        mac_digest_size: 32,
        mac_digest: DigestKind::Sha256,
    }
}

#[test]
fn aes256_encrypt_decrypt_round_trips() {
    let desc = aes_description(256);
    let key = KeyMaterial::new(vec![0x11u8; 32], vec![0x22u8; 16], Vec::new(), &desc).unwrap();

    let mut enc = block_cipher(BlockCipherKind::Aes256).unwrap();
    enc.init(true, &key).unwrap();
    let plaintext = [0x5au8; 16];
    let mut ciphertext = [0u8; 16];
    enc.transform_block(&plaintext, &mut ciphertext).unwrap();
    assert_ne!(ciphertext, plaintext);

    let mut dec = block_cipher(BlockCipherKind::Aes256).unwrap();
    dec.init(false, &key).unwrap();
    let mut recovered = [0u8; 16];
    dec.transform_block(&ciphertext, &mut recovered).unwrap();
    assert_eq!(recovered, plaintext);
}

#[test]
fn unsupported_block_cipher_kind_is_unsupported() {
    assert!(block_cipher(BlockCipherKind::Serpent).is_err());
    assert!(block_cipher(BlockCipherKind::Twofish).is_err());
}

#[test]
fn chacha20_stream_cipher_round_trips() {
    let desc = cex_primitives::CipherDescription {
        key_bits: 256,
        iv_bits: 96,
        ..aes_description(256)
    };
    let key = KeyMaterial::new(vec![0x33u8; 32], vec![0x01u8; 12], Vec::new(), &desc).unwrap();

    let mut enc = stream_cipher(StreamCipherKind::Chacha20).unwrap();
    enc.init(&key).unwrap();
    let plaintext = b"the quick brown fox jumps over the lazy dog";
    let mut ciphertext = vec![0u8; plaintext.len()];
    enc.transform(plaintext, &mut ciphertext).unwrap();

    let mut dec = stream_cipher(StreamCipherKind::Chacha20).unwrap();
    dec.init(&key).unwrap();
    let mut recovered = vec![0u8; plaintext.len()];
    dec.transform(&ciphertext, &mut recovered).unwrap();
    assert_eq!(&recovered, plaintext);
}

#[test]
fn digest_reset_matches_fresh_instance() {
    let mut d = digest(DigestKind::Sha256);
    d.update(b"hello");
    let mut out_a = vec![0u8; d.digest_size()];
    d.finalize(&mut out_a).unwrap();

    d.reset();
    d.update(b"hello");
    let mut out_b = vec![0u8; d.digest_size()];
    d.finalize(&mut out_b).unwrap();

    assert_eq!(out_a, out_b);
}

#[test]
fn sha3_digests_differ_from_sha2_for_same_input() {
    let mut sha2 = digest(DigestKind::Sha256);
    sha2.update(b"cex");
    let mut sha2_out = vec![0u8; sha2.digest_size()];
    sha2.finalize(&mut sha2_out).unwrap();

    let mut sha3 = digest(DigestKind::Sha3_256);
    sha3.update(b"cex");
    let mut sha3_out = vec![0u8; sha3.digest_size()];
    sha3.finalize(&mut sha3_out).unwrap();

    assert_ne!(sha2_out, sha3_out);
}

#[test]
fn hmac_mac_rejects_wrong_length_output_buffer() {
    let mut m = mac(MacKind::HmacSha256, b"a test mac key").unwrap();
    m.update(b"message body");
    let mut too_short = vec![0u8; 4];
    assert!(m.finalize(&mut too_short).is_err());
}

#[test]
fn hmac_mac_is_deterministic_for_same_key_and_message() {
    let mut m1 = mac(MacKind::HmacSha512, b"shared key").unwrap();
    m1.update(b"payload");
    let mut out1 = vec![0u8; m1.digest_size()];
    m1.finalize(&mut out1).unwrap();

    let mut m2 = mac(MacKind::HmacSha512, b"shared key").unwrap();
    m2.update(b"payload");
    let mut out2 = vec![0u8; m2.digest_size()];
    m2.finalize(&mut out2).unwrap();

    assert_eq!(out1, out2);
}

#[test]
fn chacha_prng_is_reproducible_from_a_fixed_seed() {
    let seed = [7u8; 32];
    let mut a = prng(PrngKind::ChaCha, Some(seed));
    let mut b = prng(PrngKind::ChaCha, Some(seed));

    let mut out_a = [0u8; 64];
    let mut out_b = [0u8; 64];
    a.fill(&mut out_a);
    b.fill(&mut out_b);
    assert_eq!(out_a, out_b);
}

#[test]
fn os_prng_produces_varying_output() {
    let mut r = prng(PrngKind::OsRng, None);
    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    r.fill(&mut a);
    r.fill(&mut b);
    assert_ne!(a, b);
}

/// Spec §8 P4: PBKDF2-HMAC-SHA256 test vector from RFC 6070 adapted to
/// SHA-256 ("password"/"salt", 1 iteration, 32-byte output).
#[test]
fn pbkdf2_matches_known_answer_vector() {
    let dk = kdf::pbkdf2(DigestKind::Sha256, b"password", b"salt", 1, 32).unwrap();
    let expected = hex::decode("120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b").unwrap();
    assert_eq!(dk, expected);
}

/// Spec §8 S5: raising the iteration count to 4096 must match the published
/// vector exactly, not merely differ from the iterations=1 output.
#[test]
fn pbkdf2_iteration_count_changes_output() {
    let dk = kdf::pbkdf2(DigestKind::Sha256, b"password", b"salt", 4096, 32).unwrap();
    let expected = hex::decode("c5e478d59288c841aa530db6845c4c8d962893a001ce4e11a4963873aa98134a").unwrap();
    assert_eq!(dk, expected);
}

#[test]
fn cipher_description_wire_round_trips() {
    let desc = aes_description(256);
    let bytes = desc.to_bytes();
    assert_eq!(bytes.len(), cex_primitives::WIRE_LEN);
    let decoded = cex_primitives::CipherDescription::from_bytes(&bytes).unwrap();
    assert_eq!(desc, decoded);
}

#[test]
fn key_generator_produces_correctly_sized_material() {
    let mut seed_rng = prng(PrngKind::ChaCha, Some([9u8; 32]));
    let mut kg = cex_primitives::KeyGenerator::new(seed_rng.as_mut(), DigestKind::Sha256);
    let desc = aes_description(256);
    let km = kg.generate(&desc, b"session info").unwrap();
    assert_eq!(km.key().len(), 32);
    assert_eq!(km.iv().len(), 16);
}
