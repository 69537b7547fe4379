use std::path::PathBuf;
use std::process::{Command, Output};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn schemac(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_schemac"))
        .args(args)
        .output()
        .expect("failed to run schemac")
}

#[test]
fn test_compile_text() {
    let file = fixture("interfaces.json");
    let out = schemac(&["compile", file.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("module interfaces@2024-01-15\n"));
    assert!(stdout.contains("  identity ethernet (base interfaces:interface-type)\n"));
    assert!(stdout.contains("  feature jumbo: disabled\n"));
    assert!(stdout.contains("leaf type : identityref = interfaces:ethernet\n"));
    assert!(stdout.contains("leaf mtu : mtu-type = 1500\n"));
    assert!(stdout.contains("leaf ip:mtu-copy : leafref -> uint16\n"));
    assert!(!stdout.contains("jumbo-mtu"));
}

#[test]
fn test_compile_with_features_json() {
    let file = fixture("interfaces.json");
    let out = schemac(&[
        "compile",
        "--output",
        "json",
        "--features",
        "interfaces:jumbo",
        file.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let docs: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let interfaces = &docs[0];
    assert_eq!(interfaces["module"], "interfaces");
    assert_eq!(interfaces["features"]["jumbo"], "enabled");
    let list = &interfaces["nodes"][0]["children"][0];
    assert_eq!(list["path"], "/interfaces:interfaces/interface");
    let names: Vec<&str> = list["children"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["name", "type", "mtu", "jumbo-mtu", "ip:mtu-copy"]);
    assert_eq!(list["children"][4]["leafref-target"], "/interfaces:interfaces/interface/mtu");
}

#[test]
fn test_check_reports_compile_error() {
    let file = fixture("broken.json");
    let out = schemac(&["check", file.to_str().unwrap()]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Failed to compile module \"broken\""));
    assert!(stderr.contains("Invalid default - value \"300\" does not fit the type"));
}

#[test]
fn test_check_ok() {
    let file = fixture("interfaces.json");
    let out = schemac(&["check", "--module", "ip", file.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("OK: 2 module(s) compiled"));
}

#[test]
fn test_unknown_feature_module() {
    let file = fixture("interfaces.json");
    let out = schemac(&["check", "--features", "nope:*", file.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Module \"nope\" is not loaded"));
}
