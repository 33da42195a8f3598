//! Hybrid X25519 + ML-KEM-768 provider: encapsulation/decapsulation
//! self-consistency and wire-size invariants.

use cex_primitives::{pke_provider, PkeKind, PkePublicKey, PkeSecretKey};

#[test]
fn wire_sizes_match_spec_constants() {
    assert_eq!(cex_primitives::pke::PKE_PUBLIC_KEY_BYTES, 32 + 1184);
    assert_eq!(cex_primitives::pke::PKE_SECRET_KEY_BYTES, 32 + 2400);
    assert_eq!(cex_primitives::pke::PKE_CIPHERTEXT_BYTES, 32 + 1088);
    assert_eq!(cex_primitives::pke::PKE_SHARED_SECRET_BYTES, 64);
}

#[test]
fn encapsulate_decapsulate_agree() {
    let provider = pke_provider(PkeKind::HybridX25519MlKem768).unwrap();
    let (pk, sk) = provider.keygen();

    let (ss_sender, ct) = provider.encapsulate(&pk).unwrap();
    let ss_receiver = provider.decapsulate(&sk, &ct).unwrap();

    assert_eq!(ss_sender, ss_receiver);
    assert_eq!(ss_sender.len(), cex_primitives::pke::PKE_SHARED_SECRET_BYTES);
    assert_eq!(ct.len(), cex_primitives::pke::PKE_CIPHERTEXT_BYTES);
}

#[test]
fn public_and_secret_keys_round_trip_through_bytes() {
    let provider = pke_provider(PkeKind::HybridX25519MlKem768).unwrap();
    let (pk, sk) = provider.keygen();

    let pk2 = PkePublicKey::from_bytes(&pk.to_bytes()).unwrap();
    let sk2 = PkeSecretKey::from_bytes(&sk.to_bytes()).unwrap();

    let (ss_a, ct) = provider.encapsulate(&pk2).unwrap();
    let ss_b = provider.decapsulate(&sk2, &ct).unwrap();
    assert_eq!(ss_a, ss_b);
}

#[test]
fn tampered_ciphertext_does_not_panic_and_yields_a_mismatched_secret() {
    let provider = pke_provider(PkeKind::HybridX25519MlKem768).unwrap();
    let (pk, sk) = provider.keygen();
    let (ss_sender, mut ct) = provider.encapsulate(&pk).unwrap();
    ct[0] ^= 0xff;

    let ss_receiver = provider.decapsulate(&sk, &ct).unwrap();
    assert_ne!(ss_sender, ss_receiver);
}

#[test]
fn wrong_length_ciphertext_is_rejected() {
    let provider = pke_provider(PkeKind::HybridX25519MlKem768).unwrap();
    let (_, sk) = provider.keygen();
    assert!(provider.decapsulate(&sk, b"too short").is_err());
}

#[test]
fn write_into_matches_to_bytes_and_rejects_wrong_size() {
    let provider = pke_provider(PkeKind::HybridX25519MlKem768).unwrap();
    let (pk, sk) = provider.keygen();

    let mut pk_buf = [0u8; cex_primitives::pke::PKE_PUBLIC_KEY_BYTES];
    pk.write_into(&mut pk_buf).unwrap();
    assert_eq!(pk_buf, pk.to_bytes());
    assert!(pk.write_into(&mut [0u8; 4]).is_err());

    let mut sk_buf = [0u8; cex_primitives::pke::PKE_SECRET_KEY_BYTES];
    sk.write_into(&mut sk_buf).unwrap();
    assert_eq!(sk_buf, sk.to_bytes());
    assert!(sk.write_into(&mut [0u8; 4]).is_err());
}
