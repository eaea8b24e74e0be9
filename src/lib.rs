// SPDX-License-Identifier: MIT
//! Avatar generation against the Pop Yourself character designer.
//!
//! The pipeline owns one controlled browser session per batch: it applies a
//! deterministic sequence of UI mutations (randomize, optional body/skin
//! selection, layer masking), waits for the network-driven rendering to
//! settle, parses the rendered DOM into a structured feature map with a
//! content-derived identity, and captures a clipped screenshot per avatar.
//!
//! Entry points: [`generate`] for the full launch-to-teardown run,
//! [`generate_with`] to supply your own [`RenderSession`], and
//! [`start_session`] / [`stop_session`] for callers holding one session
//! across batches.

pub mod avatar;
pub mod capture;
pub mod config;
pub mod features;
pub mod generator;
pub mod policy;
pub mod render;
pub mod selection;
pub mod session;

pub use avatar::{Avatar, ImageRef, Sex};
pub use config::GeneratorOptions;
pub use generator::{
    generate, generate_in_session, generate_with, start_session, stop_session, GenerationReport,
    RunOutcome,
};
pub use render::{RenderError, RenderSession};
pub use session::DesignerSession;
