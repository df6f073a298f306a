//! Shared library for the Athena query Lambda.
//!
//! Question interpretation, SQL synthesis, warehouse and generative clients,
//! and the orchestrator that turns a question into a map-ready answer.

pub mod allocation;
pub mod answer;
pub mod config;
pub mod error;
pub mod generative;
pub mod http;
pub mod intent;
pub mod intent_assist;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod secrets;
pub mod sql;
pub mod summary;
pub mod warehouse;

pub use config::Config;
pub use error::{Error, Result};
pub use generative::{GeminiClient, TextGenerator};
pub use intent::{Classification, Intent};
pub use models::{QueryRequest, ResponsePayload, ResultRecord, VisualizationMode};
pub use pipeline::Pipeline;
pub use secrets::{get_secret, get_warehouse_token};
pub use warehouse::{DatabricksClient, QueryExecutor};
