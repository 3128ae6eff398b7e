//! Blogochain - an append-only proof-of-work ledger of text entries, streamed
//! live to websocket viewers
//!
//! # Architecture
//!
//! ## Ledger
//! - [`blockchain`] - Merkle commitment, block sealing, validation and the
//!   shared ledger engine
//!
//! ## Live Viewers
//! - [`protocol`] - Viewer wire messages
//! - [`hub`] - Broadcast hub owning the viewer registry
//! - [`commands`] - Ledger commands issued by viewers and HTTP callers
//! - [`session`] - Per-connection viewer session
//!
//! ## Serving
//! - [`api`] - HTTP routes, websocket upgrade and static files
//! - [`node`] - Startup wiring and tracing
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Ledger
// ============================================================================
pub mod blockchain;

// ============================================================================
// Live Viewers
// ============================================================================
pub mod commands;
pub mod hub;
pub mod protocol;
pub mod session;

// ============================================================================
// Serving
// ============================================================================
pub mod api;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
