//! Network transparency for the `lernen` engine. A [`server::Server`] hosts
//! knowledgebases, learners and loggers behind opaque handles; a
//! [`client::RemoteFactory`] hands out proxies with the exact interface of
//! the local factory, so a learning loop does not care on which side of a
//! socket its engine runs.

pub mod wire;

pub mod server;

pub mod client;

pub use client::{Connection, RemoteFactory, RemoteKnowledgebase, RemoteLearner, RemoteLogger};
pub use server::Server;
