//! turnsync: reconstruct an assistant turn from a live event stream and a
//! pull-based query API.
//!
//! The streaming reducer folds session events into a [`types::Payload`] as
//! they arrive; the poll finalizer reconciles against the server until the
//! turn settles. [`engine::run_turn`] runs both and returns one result.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnsync::api::{OpencodeClient, SessionQuery, SseEventSource};
//! use turnsync::config::load_config;
//! use turnsync::engine::{run_turn, TurnOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config(None)?;
//! let client = Arc::new(OpencodeClient::new(&config.server));
//! let mut events = SseEventSource::connect(Arc::clone(&client)).await?;
//! let query = SessionQuery::new(Arc::clone(&client), "ses_123");
//! let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
//! let options = TurnOptions::from_config(&config, "ses_123", 0);
//! let result = run_turn(&mut events, &query, options, &cancel_rx, None).await?;
//! println!("{}", result.payload.text);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod build_info;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod merge;
pub mod parts;
pub mod reducer;
pub mod signal;
#[cfg(test)]
pub mod testsupport;
pub mod textutil;
pub mod types;
