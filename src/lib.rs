//! # docqa
//!
//! A retrieval-augmented question answering service for remote documents.
//!
//! Given a document URL and a list of questions, docqa downloads the
//! document, extracts and chunks its text, embeds the chunks into a remote
//! vector index, retrieves the most relevant chunks per question, and asks a
//! hosted language model to answer strictly from that retrieved context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌───────────┐
//! │ Document │──▶│  Ingest pipeline  │──▶│  Pinecone │
//! │   URL    │   │ fetch/chunk/embed │   │   index   │
//! └──────────┘   └──────────────────┘   └─────┬─────┘
//!                                             │ top-k
//!                 ┌──────────┐          ┌─────▼─────┐
//!                 │  SQLite  │◀─────────│  Answer    │──▶ Gemini
//!                 │ cache/log│          │ generation │
//!                 └──────────┘          └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`ingest`] | Document download, hashing, extraction |
//! | [`extract`] | Per-format text extraction |
//! | [`chunk`] | Recursive character chunking |
//! | [`embedding`] | Embedding client (Gemini) |
//! | [`index`] | Vector index client (Pinecone) |
//! | [`answer`] | Prompting, generation, confidence heuristics |
//! | [`pipeline`] | Request orchestration |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod stats;
