//! Controller runtime for kubegames
//!
//! The pieces every reconciler is assembled from:
//!
//! - [`Informer`]: watches one resource type, keeps a local cache and turns
//!   watch events into a stream of [`ResourceChange`]s
//! - [`WorkQueue`]: deduplicating, delayable key queue
//! - [`WorkerPool`]: fixed set of worker loops running a [`Reconciler`]
//!
//! The informer pumps changed keys into the queue; workers pull keys and
//! reconcile them, re-queueing failures after a fixed delay.

#![deny(missing_docs)]

pub mod informer;
pub mod key;
pub mod queue;
pub mod worker;

pub use informer::{ChangeKind, ChangeTracker, Informer, ResourceChange};
pub use key::ObjectKey;
pub use queue::WorkQueue;
pub use worker::{Reconciler, WorkerPool};
