pub mod config;
pub mod demux;
pub mod errors;
pub mod github;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod store;
