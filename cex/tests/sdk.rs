use cex::sdk::{aes256_ctr_description, CipherEngine, KeyVault};

#[test]
fn cipher_engine_round_trips() {
    let engine = CipherEngine::new(aes256_ctr_description()).unwrap();
    let key = engine.generate_key(b"test").unwrap();

    let plaintext = b"the quick brown fox jumps over the lazy dog";
    let ciphertext = engine.encrypt(&key, plaintext).unwrap();
    assert_ne!(ciphertext, plaintext);

    let recovered = engine.decrypt(&key, &ciphertext).unwrap();
    assert_eq!(recovered, plaintext);
}

#[test]
fn key_vault_creates_independent_subkeys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("package.bin");

    let vault = KeyVault::create(&path, aes256_ctr_description(), 3).unwrap();
    let first = vault.read_at(0).unwrap();
    let second = vault.read_at(1).unwrap();
    assert!(first.material != second.material);

    let reopened = KeyVault::open(&path);
    let first_again = reopened.read_at(0).unwrap();
    assert!(first.material == first_again.material);
}

#[tokio::test]
async fn establish_session_round_trips_a_message() {
    use cex::sdk::{demo_parameters, establish_session};
    use cex_protocol::{DtmIdentity, Role};

    let (client, server) = tokio::io::duplex(16 * 1024);
    let params = demo_parameters();
    let domain_secret = b"sdk-test-domain-secret-32-bytes!".to_vec();

    let client_identity = DtmIdentity {
        identity: b"client".to_vec(),
        pke_id: cex_primitives::PkeKind::HybridX25519MlKem768,
        session: params.auth_session,
        option_flag: 0,
    };
    let server_identity = DtmIdentity {
        identity: b"server".to_vec(),
        pke_id: cex_primitives::PkeKind::HybridX25519MlKem768,
        session: params.auth_session,
        option_flag: 0,
    };

    let params_c = params.clone();
    let domain_c = domain_secret.clone();
    let client_task = tokio::spawn(async move { establish_session(client, Role::Initiator, client_identity, &params_c, &domain_c).await });
    let params_s = params.clone();
    let server_task = tokio::spawn(async move { establish_session(server, Role::Responder, server_identity, &params_s, &domain_secret).await });

    let (client_result, server_result) = tokio::join!(client_task, server_task);
    let (_, client_primary) = client_result.unwrap().unwrap();
    let (_, server_primary) = server_result.unwrap().unwrap();

    let message = b"sdk facade end to end";
    let ct = client_primary.forward.seal(message).unwrap();
    let pt = server_primary.ret.open(&ct).unwrap();
    assert_eq!(pt, message);
}
