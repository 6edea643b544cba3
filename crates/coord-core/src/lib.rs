//! Coordination-network detection engine: a durable, indexed message store,
//! a URL resolver, a tokenizer/fingerprinter, a parallel temporal join, and
//! a network exporter. See each module for its piece of the pipeline.

pub mod export;
pub mod join;
pub mod model;
pub mod resolver;
pub mod store;
pub mod tokenize;
