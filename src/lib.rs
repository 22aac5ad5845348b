pub mod backend;
pub mod config;
pub mod engine;
pub mod flow;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod payment;
pub mod reconcile;
pub mod sweeper;
