use sensorbridge::provision::{provision, policy_document, MemoryBackend, ProvisionRequest};
use sensorbridge::CloudConfig;
use std::path::PathBuf;

fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "sensorbridge-provision-{}-{}",
        label,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn request_for(dir: &PathBuf) -> ProvisionRequest {
    ProvisionRequest {
        device_name: "plant-sensor-01".to_string(),
        topic: "sensors/demo".to_string(),
        out_dir: dir.join("certs"),
        descriptor_path: dir.join("cloud-config.json"),
    }
}

#[test]
fn test_provision_writes_all_artifacts() {
    let dir = scratch_dir("artifacts");
    let mut backend = MemoryBackend::new("example-ats.iot.eu-west-1.amazonaws.com");
    let request = request_for(&dir);

    let outcome = provision(&mut backend, &request).unwrap();
    assert!(outcome.identity.created);
    assert!(outcome.policy.created);
    assert_eq!(outcome.policy.name, "plant-sensor-01-policy");

    // Credential PEMs on disk
    assert!(dir.join("certs/plant-sensor-01-cert.pem").exists());
    assert!(dir.join("certs/plant-sensor-01-private.key").exists());
    assert!(dir.join("certs/root-ca.pem").exists());

    // The descriptor round-trips through the startup loader
    let config = CloudConfig::load(&dir.join("cloud-config.json")).unwrap();
    assert_eq!(config.endpoint, "example-ats.iot.eu-west-1.amazonaws.com");
    assert_eq!(config.client_id, "plant-sensor-01");
    assert_eq!(config.topic, "sensors/demo");

    // Certificate got both attachments (policy and identity)
    assert_eq!(backend.attachments().len(), 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_provision_rerun_reuses_identity_and_policy() {
    let dir = scratch_dir("rerun");
    let mut backend = MemoryBackend::new("example-ats.iot.eu-west-1.amazonaws.com");
    let request = request_for(&dir);

    let first = provision(&mut backend, &request).unwrap();
    let second = provision(&mut backend, &request).unwrap();

    assert!(first.identity.created);
    assert!(!second.identity.created);
    assert_eq!(first.identity.arn, second.identity.arn);

    assert!(first.policy.created);
    assert!(!second.policy.created);
    assert_eq!(first.policy.arn, second.policy.arn);

    // Fresh credentials each run; the descriptor keeps pointing at the files
    let config = CloudConfig::load(&dir.join("cloud-config.json")).unwrap();
    let cert = std::fs::read_to_string(&config.cert_path).unwrap();
    assert!(cert.contains("MEMORY-CERT-2"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_policy_document_scopes_topic() {
    let document = policy_document("sensors/demo");
    let rendered = document.to_string();
    assert!(rendered.contains("arn:aws:iot:*:*:topic/sensors/demo"));
    assert!(rendered.contains("iot:Publish"));
    assert!(rendered.contains("iot:Connect"));
}
