/// Package version plus the commit and build time stamped by the build
/// script, e.g. `0.1.0 (git 1a2b3c4, built 2026-01-01T00:00:00Z)`.
pub const VERSION: &str = env!("TERMPOLL_VERSION");
