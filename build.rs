// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=DEPTHCAP_VERSION");

    // Packagers may pin the version string explicitly
    let version = match std::env::var("DEPTHCAP_VERSION") {
        Ok(v) => v,
        Err(_) => {
            let pkg = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".into());
            match commit_hash() {
                Some(hash) => format!("{}-{}", pkg, hash),
                None => pkg,
            }
        }
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

fn commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
