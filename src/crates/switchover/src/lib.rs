//! # Switchover - Blue-green Postgres cutover
//!
//! Moves client traffic for one logical database from a live Postgres server
//! (blue) to its logically-replicated copy (green) behind PgBouncer, keeping
//! the window in which clients are paused as short as possible.
//!
//! ## Flow
//!
//! 1. **Precheck** - routing, server versions, row minimums, audit-row
//!    equivalence, replication lag, sequence state and the remote pooler
//!    config are all verified read-only
//! 2. **Confirm** - the operator approves the run
//! 3. **Pause** - PgBouncer suspends the database
//! 4. **Converge** - replication drains while green sequences are advanced
//! 5. **Switch** - the active pooler config is relinked to green and reloaded
//! 6. **Resume** - traffic flows again and the proxy is verified to reach green
//!
//! Any failure between the pause and the switch resumes traffic exactly once
//! and reports the original error.
//!
//! ## Dry Run
//!
//! Dry-run is the default. Every read-only step runs against the live
//! endpoints; PAUSE/RESUME, `setval` and the remote relink are logged and
//! simulated instead of executed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchover::config::load_config;
//! use switchover::orchestrator::run_cutover;
//! use switchover::prompt::TerminalPrompt;
//!
//! # async fn example() -> switchover::Result<()> {
//! let config = load_config(None).await?;
//! let outcome = run_cutover(&config, true, &TerminalPrompt::new(), true).await?;
//! println!("success: {}", outcome.is_success());
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod config;
pub mod db;
pub mod events;
pub mod models;
pub mod session;

// Cutover components
pub mod equivalence;
pub mod pooler;
pub mod precheck;
pub mod remote;
pub mod remote_config;
pub mod replication;
pub mod sequences;
pub mod versions;

// Orchestration
pub mod diagnostics;
pub mod health;
pub mod orchestrator;
pub mod prompt;
pub mod report;
pub mod resources;

// Test doubles for the endpoint traits
pub mod testing;

// Error types and utilities
mod error;

// Re-export key types for convenience
pub use config::SwitchoverConfig;
pub use models::Side;
pub use orchestrator::{run_cutover, CutoverComponents, CutoverOrchestrator};
pub use session::{CutoverOutcome, CutoverPhase, CutoverSession, ResourceMinimums};

// Error types
pub use error::{Result, SwitchoverError};
