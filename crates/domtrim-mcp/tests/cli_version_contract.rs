#[test]
fn domtrim_version_contract() {
    let bin = assert_cmd::cargo::cargo_bin!("domtrim");
    let out = std::process::Command::new(bin)
        .args(["version"])
        .env_remove("DOMTRIM_ENV_FILE")
        .output()
        .expect("run domtrim version");

    assert!(out.status.success(), "domtrim version failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse version json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("version"));
    assert_eq!(v["name"].as_str(), Some("domtrim"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
}

#[test]
fn domtrim_version_text_output() {
    use assert_cmd::prelude::*;
    use predicates::prelude::*;

    std::process::Command::new(assert_cmd::cargo::cargo_bin!("domtrim"))
        .args(["version", "--output", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("domtrim "));
}
