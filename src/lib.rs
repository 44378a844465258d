//! # Compiler Log Index
//!
//! Keeps a browsable source index fresh from "compiler log" artifacts
//! published by local builds, Azure DevOps pipelines, and GitHub Actions
//! workflows.
//!
//! The engine polls every configured source on an interval, stores each new
//! artifact once per version, regenerates the index with an external
//! generator when anything changed, and swaps the result in while readers
//! keep serving the previous one.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Sources    │──▶│ Coordinator  │──▶│ ContentStore │
//! │ FS/Pipe/Wf   │   │ keys + lock  │   │ <root>/...   │
//! └──────────────┘   └──────┬───────┘   └──────────────┘
//!                           │ snapshot
//!                           ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │  Generator   │──▶│  Publisher   │◀── HTTP readers
//!                    │ (external)   │   │  ArcSwap     │
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cindex sources                # list sources and stored version keys
//! cindex poll                   # run one round and exit
//! cindex serve                  # poll forever + status server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | On-disk content store |
//! | [`visited`] | Bounded set of inspected CI runs |
//! | [`archive`] | Zip entry extraction |
//! | [`ci`] | CI provider client contract |
//! | [`client_pipelines`] | Azure DevOps pipelines client |
//! | [`client_workflows`] | GitHub Actions client |
//! | [`connector_fs`] | Filesystem source |
//! | [`connector_pipeline`] | Pipeline-artifact source |
//! | [`connector_workflow`] | Workflow-artifact source |
//! | [`sources`] | Source dispatch and status |
//! | [`coordinator`] | Ingestion coordinator |
//! | [`generator`] | External index generator |
//! | [`publish`] | Current-index publication |
//! | [`poll`] | Poll loop |
//! | [`server`] | HTTP status server |

pub mod archive;
pub mod ci;
pub mod client_pipelines;
pub mod client_workflows;
pub mod config;
pub mod connector_fs;
pub mod connector_pipeline;
pub mod connector_workflow;
pub mod coordinator;
pub mod generator;
pub mod models;
pub mod poll;
pub mod publish;
pub mod server;
pub mod sources;
pub mod store;
pub mod visited;
