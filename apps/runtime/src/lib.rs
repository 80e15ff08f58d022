//! Swarm Runtime Library
//!
//! Runtime substrate for a swarm of autonomous agents: agent lifecycle and
//! ownership, topic-addressed messaging between agents, and a resilient
//! client for a remote chat completion endpoint.

pub mod agents;
pub mod bus;
pub mod domain;
pub mod events;
pub mod infrastructure;
pub mod llm;
