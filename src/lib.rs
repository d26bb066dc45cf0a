//! # Galaxy Ingest
//!
//! A document ingestion and knowledge-mapping pipeline.
//!
//! Heterogeneous files land in a blob store, get transcribed to Markdown
//! and classified by a generative model, and are then mapped onto typed
//! analytical frameworks (SWOT, Persona, ...) as consolidated knowledge
//! instances. Every document ends in NEEDS_REVIEW for human confirmation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────────────────┐   ┌───────────────┐
//! │ Blob     │──▶│ Ingestion Orchestrator       │──▶│ SQLite        │
//! │ Store    │   │ upload→transcribe→classify   │   │ documents     │
//! │ (S3)     │   │ →embed→persist               │   │ tags          │
//! └──────────┘   └──────────────┬──────────────┘   └───────┬───────┘
//!                               │ NEEDS_REVIEW              │
//!                               ▼                           ▼
//!                ┌─────────────────────────────┐   ┌───────────────┐
//!                │ Framework Mapper             │──▶│ knowledge_    │
//!                │ select→extract→judge         │   │ instances     │
//!                └─────────────────────────────┘   └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! galaxy init                        # create database
//! galaxy register ./plan.pdf         # store bytes, create PENDING row
//! galaxy run                         # ingest everything pending + map
//! galaxy status <id>                 # inspect state and tags
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and document state machine |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Typed record store (lease, optimistic updates) |
//! | [`blob`] | S3-compatible blob storage |
//! | [`model`] | Generative model adapter |
//! | [`retry`] | Exponential backoff over transient model errors |
//! | [`prompts`] | Agent prompt templates |
//! | [`schema`] | Parsing of model JSON outputs |
//! | [`ingest`] | Ingestion orchestrator |
//! | [`mapper`] | Framework mapper |
//! | [`judge`] | Consolidation judge |
//! | [`runner`] | Concurrent batch runner |

pub mod blob;
pub mod config;
pub mod db;
pub mod ingest;
pub mod judge;
pub mod mapper;
pub mod migrate;
pub mod model;
pub mod models;
pub mod prompts;
pub mod retry;
pub mod runner;
pub mod schema;
pub mod store;
