//! # hero-registry
//!
//! A roster of hero files (name, alias, quirk, licence number, rank) whose
//! ranked members always hold the dense ranking `1..=N`.
//!
//! ## Ranking
//!
//! Every rank change is expressed as at most two range updates against the
//! store, applied one after the other:
//!
//! ```text
//!   remove rank r            ranks r+1..=max      shift down
//!   unranked -> r            ranks r..=max        shift up
//!   r -> unranked            ranks r+1..=max      shift down
//!   r1 -> r2                 ranks r1+1..=max     shift down
//!                            then r2..=max'       shift up
//! ```
//!
//! The moving hero is excluded from both updates and written last. A change
//! that fails half-way reports the per-record moves and the hero write
//! still owed, which [`registry::HeroRegistry::resume_shift`] can apply
//! without touching records that already moved.
//!
//! ## Module Overview
//!
//! - [`models`] - `HeroRecord`, `Rank`, sentinels, paging and request types
//! - [`error`] - Registry and storage error types
//! - [`registry`] - The rank-consistent registry: add, remove, edit, get, page, audit
//! - [`store`] - `HeroStore` trait and the `RankShift` range update
//! - [`store::memory`] - In-memory store
//! - [`store::tantivy_store`] - Persistent store on a tantivy index
//! - [`config`] - Environment-based configuration
//! - [`state`] - Shared application state for the HTTP handlers
//! - [`api`] - Axum handlers for the hero JSON API

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod state;
pub mod store;
