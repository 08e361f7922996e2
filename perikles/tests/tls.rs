use std::time::Duration;

use perikles::tls;
use rcgen::CertifiedKey;

fn self_signed_pair() -> (Vec<u8>, Vec<u8>) {
    let CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["perikles.odysseia.svc".to_string()]).unwrap();
    (cert.pem().into_bytes(), key_pair.serialize_pem().into_bytes())
}

#[test]
fn load_server_config_accepts_a_valid_cert_and_key() {
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("tls.crt");
    let key_path = dir.path().join("tls.key");
    let (cert, key) = self_signed_pair();
    std::fs::write(&cert_path, cert).unwrap();
    std::fs::write(&key_path, key).unwrap();

    let (config, _resolver) = tls::load_server_config(&cert_path, &key_path, Duration::from_secs(3600))
        .expect("valid cert/key should load");

    assert_eq!(config.alpn_protocols, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
}

#[test]
fn load_server_config_fails_when_key_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("tls.crt");
    let key_path = dir.path().join("tls.key");
    let (cert, _) = self_signed_pair();
    std::fs::write(&cert_path, cert).unwrap();

    let result = tls::load_server_config(&cert_path, &key_path, Duration::from_secs(3600));
    assert!(result.is_err());
}
