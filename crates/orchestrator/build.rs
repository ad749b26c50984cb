use std::{env, fs, path::PathBuf, process::Command};

use chrono::{DateTime, SecondsFormat, Utc};

fn main() -> anyhow::Result<()> {
    println!("cargo:rerun-if-env-changed=GIT_SHA");
    println!("cargo:rerun-if-env-changed=GIT_DIRTY");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../.git/HEAD");

    let version = env::var("CARGO_PKG_VERSION")?;
    let git_sha = env::var("GIT_SHA")
        .ok()
        .filter(|sha| !sha.trim().is_empty())
        .or_else(|| git(&["rev-parse", "--short", "HEAD"]))
        .unwrap_or_else(|| "unknown".to_string());
    let dirty = match env::var("GIT_DIRTY") {
        Ok(raw) => raw.trim() == "true" || raw.trim() == "1",
        Err(_) => git(&["status", "--porcelain"]).is_some_and(|out| !out.is_empty()),
    };
    let built_at = build_timestamp();
    let label = if git_sha == "unknown" {
        git_sha.clone()
    } else if dirty {
        format!("{git_sha}-dirty")
    } else {
        git_sha.clone()
    };

    let out = PathBuf::from(env::var("OUT_DIR")?).join("version.rs");
    fs::write(
        out,
        format!(
            "pub const VERSION: &str = {version:?};\n\
             pub const GIT_SHA: &str = {git_sha:?};\n\
             pub const GIT_DIRTY: bool = {dirty};\n\
             pub const BUILD_TIMESTAMP: &str = {built_at:?};\n\
             pub const GIT_LABEL: &str = {label:?};\n\
             pub const FULL_VERSION: &str = \"{version} ({label}, built {built_at})\";\n"
        ),
    )?;
    Ok(())
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Honors `SOURCE_DATE_EPOCH` for reproducible builds.
fn build_timestamp() -> String {
    let epoch = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    epoch
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}
