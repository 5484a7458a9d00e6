// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Edgeweave
//!
//! A declarative plan/apply engine for load-balancing, CDN and DNS resources.
//!
//! ## Overview
//!
//! Edgeweave reads a set of resource declarations and converges a provider
//! onto them:
//!
//! - Declarations reference each other's outputs with `${type.name.output}`
//! - References become an explicit dependency graph, checked for cycles
//! - A plan lists the create, update, delete and no-op actions in
//!   dependency order
//! - Apply runs independent branches in parallel; a failure blocks only the
//!   resources that depend on it
//!
//! ## Architecture
//!
//! 1. **Declarations**: `edgeweave.yaml`
//! 2. **State**: what was last applied, stored locally or in S3 behind a lock
//! 3. **Reconciler**: diffs declarations against state, plans, applies and
//!    commits
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`graph`]: Reference extraction and the dependency graph
//! - [`scheduler`]: Topological ordering and apply-time readiness
//! - [`planner`]: Diff computation, plans and the parallel executor
//! - [`provider`]: Provider trait, HTTP client and in-memory simulator
//! - [`state`]: State storage backends (local, S3) and locked sessions
//! - [`reconciler`]: Plan, apply and destroy runs
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: shop-edge
//!   environment: prod
//!
//! resources:
//!   - type: backend_service
//!     name: api
//!     attributes:
//!       backends:
//!         - group: projects/shop/regions/europe-west1/networkEndpointGroups/api
//!   - type: url_map
//!     name: web
//!     attributes:
//!       default_service: ${backend_service.api.self_link}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod scheduler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{EdgeweaveError, Result};
pub use graph::ResourceGraph;
pub use planner::{ApplyReport, DiffEngine, Plan, PlanExecutor};
pub use provider::{HttpProvider, InMemoryProvider, Provider};
pub use reconciler::{ReconciliationResult, Reconciler};
pub use state::{LocalStateStore, S3StateStore, StackState, StateSession, StateStore};
