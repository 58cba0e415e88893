//! # Ombudsman Node
//!
//! A peer participating in Byzantine-fault-tolerant Oral Messages consensus
//! over a small shared database. Nodes discover each other by gossip,
//! reach agreement on one word at a time through recursive OM rounds, and
//! expose both a UDP wire protocol (for peer traffic) and a TCP line
//! protocol (for operator commands).
//!
//! Byzantine peers are modeled, not merely tolerated: any node can be
//! configured to lie -- substituting a different value than the one it
//! actually received -- at the moment it emits a forward or a report.

pub mod cli;
pub mod config;
pub mod consensus;
pub mod database;
pub mod gossip;
pub mod logging;
pub mod orchestrator;
pub mod peer;
pub mod session;
pub mod utilities;
pub mod wire;
