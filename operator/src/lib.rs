//! Controller keeping a `Deployment` in sync with each `Foo` custom resource.
//!
//! Cluster changes flow from the watcher-fed [`cache::Store`] through the
//! [`translator::EventTranslator`] into a deduplicating, rate-limited
//! [`queue::WorkQueue`]. Workers in [`controller::Controller`] pull keys and
//! hand them to the [`reconcile::Reconciler`], which guards teardown with a
//! finalizer on the `Foo`.

pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod deployment;
pub mod error;
pub mod event;
pub mod finalizer;
pub mod key;
pub mod metrics;
pub mod queue;
pub mod reconcile;
pub mod translator;

pub use error::Error;
