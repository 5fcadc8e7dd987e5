//! Placeholder crate root so the workspace manifest can also host the
//! root-level `tests/integration.rs` binary-driving test. No runtime code
//! lives here; everything real is in `ringvault-core`/`ringvault-cli`.
