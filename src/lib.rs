//! # facematch
//!
//! Batch-match faces in game-time photographs against a set of reference
//! portraits with Amazon Rekognition, and write the matches to a
//! spreadsheet.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────────────┐   ┌──────────┐
//! │  S3 bucket   │──▶│          Pipeline            │──▶│  Report  │
//! │ base/ game/  │   │ provision→populate→match     │   │ xlsx/csv │
//! └──────────────┘   └──────────────┬───────────────┘   └──────────┘
//!                                   ▼
//!                          ┌─────────────────┐
//!                          │   Rekognition   │
//!                          │   collection    │
//!                          └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! facematch list base                  # check what will be indexed
//! facematch run                        # provision, index, match, report
//! facematch run --threshold 85 --output out/results.csv
//! facematch collection delete          # drop the collection
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`aws`] | Credentials, endpoints, SigV4 signing |
//! | [`object_store`] | S3 object listing |
//! | [`face_index`] | Rekognition face collections |
//! | [`pipeline`] | Stage orchestration |
//! | [`report`] | Report accumulation and output |

pub mod aws;
pub mod config;
pub mod face_index;
pub mod models;
pub mod object_store;
pub mod pipeline;
pub mod report;
