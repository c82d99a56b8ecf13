// src/plugin/mod.rs
//! Converter plugin runtime
//!
//! Plugins turn a source format into the intermediate representation (IR)
//! and IR into a target format. They come in two flavours:
//!
//! - **Embedded**: compiled in, run in-process ([`embedded`])
//! - **External**: an executable plus `plugin.json` in a subdirectory of the
//!   operator's plugin directory, run as a subprocess ([`executor`])
//!
//! Both speak the JSON protocol in [`protocol`]. The [`PluginRegistry`]
//! applies the process-wide [`Posture`] and validates external entrypoints
//! before every run.

pub mod descriptor;
pub mod embedded;
pub mod executor;
pub mod protocol;
mod registry;

pub use descriptor::{Capabilities, PluginDescriptor, PluginSource};
pub use embedded::{EmbeddedPlugin, IrDocument};
pub use executor::{DEFAULT_PLUGIN_TIMEOUT, PluginExecutor};
pub use protocol::{DetectResult, EmitOutput, ExtractIrResult, IrOutput, Operation, Request, Response};
pub use registry::{PluginRegistry, Posture};
