//! `strider-console` – The HTTP Front Door
//!
//! A deliberately tiny HTTP server (default port `8080`): one GET endpoint
//! whose first path segment is a single command token. Each request is
//! forwarded to the session serve loop over the command channel and
//! answered with the literal body `ok` or `failed`. CORS headers permit
//! any origin, GET only; no other verbs or paths exist.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strider_console::ConsoleServer;
//! use tokio::sync::{mpsc, watch};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (commands, _rx) = mpsc::channel(16);
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     ConsoleServer::new(commands)
//!         .run(shutdown_rx)
//!         .await
//!         .expect("console server failed");
//! }
//! ```

pub mod server;

pub use server::{ConsoleServer, DEFAULT_PORT};
