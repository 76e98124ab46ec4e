//! # Sitesync Core
//!
//! Core library for sitesync, the job that walks the remote website catalog
//! and hands every website to the background task queue.
//!
//! ## Overview
//!
//! A sync pass looks like this:
//!
//! - **Keys**: an ephemeral RSA key pair is generated for the pass
//! - **Catalog**: pages of website records are fetched with the public key
//!   attached, so each record's credential comes back encrypted to us
//! - **Workers**: a bounded pool decrypts credentials and dispatches jobs
//! - **Dispatch**: jobs land on a Celery-compatible Redis queue
//!
//! Page and record failures are logged and skipped. Only setup failures
//! (key generation, session, broker connection) abort a pass.
//!
//! ## Architecture
//!
//! - [`keys`]: key generation and credential decryption
//! - [`catalog`]: HTTP catalog client and page model
//! - [`dispatch`]: task queue sink and message envelope
//! - [`worker`]: bounded record pool with drain barrier
//! - [`orchestrator`]: the paging state machine tying it together
//!
//! ## Examples
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use sitesync_core::{
//!     catalog::HttpCatalogClient,
//!     config::{BrokerSettings, CatalogSettings, SyncConfig},
//!     dispatch::RedisCelerySink,
//!     keys::RsaKeyProvider,
//!     orchestrator::SyncOrchestrator,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn sync_once(
//!     catalog: CatalogSettings,
//!     broker: BrokerSettings,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::default();
//!     let client = HttpCatalogClient::connect(&catalog, config.fetch_timeout()).await?;
//!     let sink = RedisCelerySink::connect(&broker).await?;
//!
//!     let orchestrator = SyncOrchestrator::new(
//!         config.clone(),
//!         Arc::new(RsaKeyProvider::new(config.rsa_key_bits)),
//!         Arc::new(client),
//!         Arc::new(sink),
//!     )?;
//!     let report = orchestrator.run(CancellationToken::new()).await?;
//!     println!("dispatched {} websites", report.records.dispatched);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Remote website catalog access
pub mod catalog;

/// Sync tuning and connection settings
pub mod config;

/// Task queue hand-off
pub mod dispatch;

/// Error types for run-level failures
pub mod error;

/// Ephemeral RSA key material
pub mod keys;

/// Paging state machine driving a sync pass
pub mod orchestrator;

/// Bounded record worker pool
pub mod worker;

pub use error::{Result, SyncError};
pub use orchestrator::{RunReport, RunState, SyncOrchestrator};
pub use worker::WorkerTally;
