//! # Dialog Harness
//!
//! Back end for a language-learning front-end built around practice
//! "dialogs". The dialog catalogue is an XLSX workbook in object storage;
//! this crate fetches it, parses it under a positional schema, groups rows
//! by `qid`, and keeps the result cached until a persisted checkpoint is
//! older than 24 hours. Per-user learning state lives in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌────────────────┐
//! │ Object store │──▶│   Ingest    │──▶│  DatasetCache  │
//! │    (xlsx)    │   │ parse+index │   │ watch snapshot │
//! └──────────────┘   └─────────────┘   └───────┬────────┘
//!                                              │
//!                            ┌─────────────────┴──┐
//!                            ▼                    ▼
//! ┌──────────────┐      ┌──────────┐        ┌──────────┐
//! │  UserStore   │◀─────│   HTTP   │        │   CLI    │
//! │   (SQLite)   │      │  (axum)  │        │  (dlg)   │
//! └──────────────┘      └────┬─────┘        └──────────┘
//!                            ▼
//!                     inference relay
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dlg init                 # create the user-state database
//! dlg load                 # fetch and index the dataset if stale
//! dlg dialogs              # list qid groups
//! dlg show Q1              # rows of one group
//! dlg serve                # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | tracing subscriber setup |
//! | [`models`] | Rows, index, dataset snapshots |
//! | [`workbook`] | Minimal XLSX reader |
//! | [`schema`] | Positional column layouts |
//! | [`ingest`] | Bytes → rows → qid index |
//! | [`staleness`] | Clock and 24h refresh rule |
//! | [`checkpoint`] | Persisted last-refresh timestamp |
//! | [`fetch`] | Object-storage fetcher |
//! | [`cache`] | Single-flight dataset cache |
//! | [`inference`] | Relay client with retry and backoff |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`userdata`] | Favorites, notes, progress, practice logs, settings, polls |
//! | [`server`] | HTTP API |

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod fetch;
pub mod inference;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod schema;
pub mod server;
pub mod staleness;
pub mod userdata;
pub mod workbook;
