//! PostgreSQL backend for dbsnap.
//!
//! Provides [`PgExecutor`], a [`SqlExecutor`](dbsnap_core::SqlExecutor)
//! over a blocking [`postgres::Client`]. Everything else (dumping,
//! replay, fixture resolution, the production swap) lives in
//! `dbsnap-core` and works through this executor.
//!
//! # Quick start
//!
//! ```no_run
//! use dbsnap_core::{SessionConfig, TestSession};
//! use dbsnap_postgres::PgExecutor;
//!
//! let config = SessionConfig::from_url("postgres://app@localhost/app_test").with_env_overrides();
//! let executor = PgExecutor::from_config(&config).unwrap();
//! let mut session = TestSession::begin(executor, &config).unwrap();
//!
//! session.capture("initial").unwrap();
//! // ... run a test ...
//! session.restore("initial").unwrap();
//!
//! session.end().unwrap();
//! ```

mod executor;

pub use executor::PgExecutor;
