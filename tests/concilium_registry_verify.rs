#![forbid(unsafe_code)]

use concilium_node::{
    core::security::keystore::Keystore,
    core::types::ValidatorId,
    networking::concilium_registry::{load_and_verify_concilium_registry_now, ConciliumRegistryPolicy},
};
use std::fs;

#[test]
fn concilium_registry_loads_and_verifies() {
    // Create a temporary keystore to act as the registry signer.
    let dir = tempfile::tempdir().expect("tempdir");
    let ks = Keystore::open(dir.path().to_str().unwrap()).expect("keystore open");
    let pk = ks.public_key();

    let witness = ValidatorId(vec![4u8; 32]);
    let network = "concilium/consensus/v1";

    let issued_at_ms: u64 = 1768336425892;
    let expires_at_ms: u64 = 1768336485892;

    // Canonical bytes as specified in networking::concilium_registry.
    let msg = format!(
        "v1\nnetwork={}\nissued_at_ms={}\nexpires_at_ms={}\nwitnesses\n{}\n",
        network,
        issued_at_ms,
        expires_at_ms,
        hex::encode(&witness.0)
    );
    let sig = ks.sign(msg.as_bytes()).expect("sign");

    let toml = format!(
        "version = 1\nnetwork = \"{}\"\nissued_at_ms = {}\nexpires_at_ms = {}\nwitnesses = [\"{}\"]\n\nsignature_hex = \"{}\"\n",
        network,
        issued_at_ms,
        expires_at_ms,
        hex::encode(&witness.0),
        hex::encode(sig.0)
    );

    let path = dir.path().join("concilium_registry.toml");
    fs::write(&path, toml).expect("write");

    let mut pol = ConciliumRegistryPolicy::default_with_now(issued_at_ms + 1);
    pol.expected_network = Some(network);
    pol.require_freshness_fields = true;

    let allow = load_and_verify_concilium_registry_now(path.to_str().unwrap(), &hex::encode(pk), &pol)
        .expect("load and verify");
    assert_eq!(allow, vec![witness]);
}
