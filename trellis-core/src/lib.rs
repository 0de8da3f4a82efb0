//! Trellis Core
//!
//! This crate provides the core runtime for the Trellis reactive UI framework.
//! It implements:
//!
//! - Reactive primitives (observable stores, signals, computed values, effects)
//! - A batching job scheduler
//! - Virtual nodes and a keyed reconciler that drives an abstract host
//! - Components with lifecycle hooks, suspense and teleport
//!
//! The crate never touches a real document. Rendering goes through the
//! [`render::HostOps`] trait; [`render::TestHost`] is an in-memory
//! implementation that records every operation it receives.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: dependency tracking, stores, signals, computed values, watchers
//! - `scheduler`: pre-flush, job and post-flush queues
//! - `render`: vnodes, patch flags, blocks and the reconciler
//! - `component`: component definitions, instances, apps and error routing
//! - `error`: the crate-wide [`Error`] type
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{h, App, Component, Signal, TestHost, Value};
//! use trellis_core::scheduler::flush_jobs;
//!
//! let count = Signal::new(Value::from(0));
//! let source = count.clone();
//! let counter = Component::new("Counter")
//!     .render(move |_| Ok(h("p", None, source.get().to_display_string())))
//!     .build();
//!
//! let host = TestHost::new();
//! let root = host.root();
//! let app = App::new(counter).mount(host, root)?;
//! assert_eq!(app.host().inner_html(root), "<p>0</p>");
//!
//! // Writes are batched until the queue is flushed.
//! count.set(Value::from(5));
//! flush_jobs()?;
//! assert_eq!(app.host().inner_html(root), "<p>5</p>");
//! ```

pub mod component;
pub mod error;
pub mod reactive;
pub mod render;
pub mod scheduler;

pub use component::{App, AppConfig, Component, ComponentInstance, SetupOutcome};
pub use error::{Error, ErrorSource, Result};
pub use reactive::{computed, effect, reactive, readonly, watch, Signal, Value};
pub use render::{h, HostNode, HostOps, Renderer, TestHost, VNode};
