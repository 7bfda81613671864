//! Shared test helpers for fpmerge integration tests.
//!
//! Every registry lives in its own temp directory. Driver documents carry
//! extra keys so tests can check the engine leaves them alone.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use fpmerge::model::registry::{CategoryEntry, Registry};
use fpmerge::model::types::Category;
use serde_json::{Value, json};
use tempfile::TempDir;

pub const DOC: &str = "driver.compose.json";

pub fn cat(s: &str) -> Category {
    Category::new(s).unwrap()
}

/// Build an in-memory registry from `(category, manufacturers, models)`.
pub fn registry(entries: &[(&str, &[&str], &[&str])]) -> Registry {
    entries
        .iter()
        .map(|(c, m, p)| (cat(c), CategoryEntry::from_strings(m.iter(), p.iter())))
        .collect()
}

/// Create a registry directory with one driver document per category.
pub fn registry_dir(entries: &[(&str, &[&str], &[&str])]) -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    for (category, mfrs, models) in entries {
        write_driver(dir.path(), category, mfrs, models);
    }
    dir
}

/// Write a Homey-style driver document.
pub fn write_driver(root: &Path, category: &str, mfrs: &[&str], models: &[&str]) {
    let doc = json!({
        "id": category,
        "name": { "en": format!("Driver {category}") },
        "class": "sensor",
        "capabilities": ["onoff"],
        "zigbee": {
            "manufacturerName": mfrs,
            "productId": models,
            "endpoints": { "1": { "clusters": [0, 6] } }
        }
    });
    let dir = root.join(category);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(DOC),
        serde_json::to_string_pretty(&doc).unwrap() + "\n",
    )
    .unwrap();
}

pub fn read_driver(root: &Path, category: &str) -> Value {
    let text = fs::read_to_string(root.join(category).join(DOC)).unwrap();
    serde_json::from_str(&text).unwrap()
}

pub fn manufacturers(root: &Path, category: &str) -> Vec<String> {
    read_driver(root, category)["zigbee"]["manufacturerName"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_owned())
        .collect()
}

/// Snapshot every driver document's bytes, keyed by category.
pub fn snapshot(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out: Vec<(String, Vec<u8>)> = fs::read_dir(root)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().join(DOC).is_file())
        .map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            (name, fs::read(e.path().join(DOC)).unwrap())
        })
        .collect();
    out.sort();
    out
}

/// Write a findings file into `dir` and return its path.
pub fn write_findings(dir: &Path, findings: &Value) -> PathBuf {
    let path = dir.join("findings.json");
    fs::write(&path, serde_json::to_string_pretty(findings).unwrap()).unwrap();
    path
}

/// Run fpmerge with the given args in the given directory.
pub fn fpmerge_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fpmerge"))
        .args(args)
        .current_dir(dir)
        .env_remove("FPMERGE_CONFIG")
        .env_remove("FPMERGE_LOG")
        .output()
        .expect("failed to execute fpmerge")
}

/// Run fpmerge and assert it succeeds. Returns stdout.
pub fn fpmerge_ok(dir: &Path, args: &[&str]) -> String {
    let out = fpmerge_in(dir, args);
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        out.status.success(),
        "fpmerge {} failed:\nstdout: {stdout}\nstderr: {stderr}",
        args.join(" "),
    );
    stdout.to_string()
}

/// Run fpmerge and assert it fails. Returns (stdout, stderr).
pub fn fpmerge_fails(dir: &Path, args: &[&str]) -> (String, String) {
    let out = fpmerge_in(dir, args);
    assert!(
        !out.status.success(),
        "Expected fpmerge {} to fail, but it succeeded.\nstdout: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stdout),
    );
    (
        String::from_utf8_lossy(&out.stdout).to_string(),
        String::from_utf8_lossy(&out.stderr).to_string(),
    )
}
