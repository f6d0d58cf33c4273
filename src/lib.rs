//! # mafood
//!
//! Backend for a Massachusetts restaurant dashboard: restaurant lookup by
//! ZIP code, question answering over state food regulations, a business
//! assistant that can call tools, and a curated small-business news feed.
//!
//! Offline pipelines keep the data behind those answers fresh: regulation
//! PDFs are scraped from mass.gov, turned into text, embedded and stored in
//! a hosted vector index; a grid sweep of the state builds the restaurant
//! dataset.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │  scraper  │──▶│ extract  │──▶│  embed   │──▶│ vector index │
//! │ (browser) │   │ PDF→JSON │   │ mean vec │   │  (Pinecone)  │
//! └─────┬─────┘   └────┬─────┘   └──────────┘   └──────┬───────┘
//!       └── object storage (S3) ──┘                    │
//!                                                      ▼
//! ┌──────────┐   ┌──────────────────────────────────────────────┐
//! │  places  │──▶│ HTTP API: auth · restaurants · ask · agent · │
//! │  (grid)  │   │           news                               │
//! └──────────┘   └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`auth`] | Users, bcrypt, JWT bearer tokens |
//! | [`maps`] | Geocoding and Places client |
//! | [`restaurants`] | Cached ZIP lookup |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat completion clients |
//! | [`vector_index`] | Hosted vector index client |
//! | [`regulations`] | Retrieval-augmented regulation answers |
//! | [`traits`] | Assistant tools and registry |
//! | [`agent`] | Function-calling assistant loop |
//! | [`news`] | News aggregation pipeline |
//! | [`storage`] | S3 object storage |
//! | [`scraper`] | Regulation scraping over WebDriver |
//! | [`extract`] | PDF text extraction |
//! | [`embed`] | Document embedding step |
//! | [`pipeline`] | Step orchestration |
//! | [`places`] | Statewide restaurant dataset |
//! | [`server`] | REST API |

pub mod agent;
pub mod auth;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embed;
pub mod embedding;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod maps;
pub mod migrate;
pub mod models;
pub mod news;
pub mod pipeline;
pub mod places;
pub mod regulations;
pub mod restaurants;
pub mod scraper;
pub mod server;
pub mod storage;
pub mod traits;
pub mod vector_index;
pub mod web;
pub mod webdriver;
