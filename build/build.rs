use std::env;
use std::path::Path;
use std::process::Command;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

fn main() {
    let label = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let built = build_time();
    let version = match git_sha() {
        Some(sha) => format!("{label} (git {sha}, built {built})"),
        None => format!("{label} (built {built})"),
    };
    println!("cargo:rustc-env=TERMPOLL_VERSION={version}");

    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}

/// Short commit hash, suffixed with `-dirty` for uncommitted changes.
fn git_sha() -> Option<String> {
    if let Ok(sha) = env::var("GITHUB_SHA")
        && !sha.trim().is_empty()
    {
        return Some(sha.trim().chars().take(7).collect());
    }
    if !Path::new(".git").exists() {
        return None;
    }
    let sha = git(&["rev-parse", "--short", "HEAD"])?;
    let dirty = git(&["status", "--porcelain"]).is_some();
    Some(if dirty { format!("{sha}-dirty") } else { sha })
}

/// RFC 3339 build time; honours `SOURCE_DATE_EPOCH` for reproducible builds.
fn build_time() -> String {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .and_then(|epoch| OffsetDateTime::from_unix_timestamp(epoch).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
