//! In-process flow observer
//!
//! Ingests raw monitor events from a dataplane feed, decodes them into flow
//! records, keeps a bounded history and serves historical and live queries
//! over it.
//!
//! ```rust,no_run
//! use flow_observer::configuration::ObserverOptions;
//! use flow_observer::parser::L3L4Parser;
//! use flow_observer::query::{ChannelSink, GetFlowsRequest};
//! use flow_observer::LocalObserverServer;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let options = ObserverOptions::builder().from_environment()?.build()?;
//! let server = LocalObserverServer::new(Arc::new(L3L4Parser::new()), options)?;
//! server.start()?;
//!
//! let (mut sink, mut responses) = ChannelSink::new(64);
//! let request = GetFlowsRequest { number: 20, ..Default::default() };
//! tokio::spawn(async move { server.get_flows(&request, &mut sink).await });
//! while let Some(response) = responses.recv().await {
//!     if let Some(flow) = response.flow() {
//!         println!("{}", flow);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod configuration;
pub mod errors;
pub mod event_processing;
pub mod events;
pub mod flow;
pub mod history;
pub mod hooks;
pub mod parser;
pub mod query;
pub mod server;

pub use errors::{ObserverError, Result};
pub use server::{LocalObserverServer, ServerState};
