//! Typed command modules.
//!
//! Every struct here implements `RemoteCommand` (run on the target host over
//! SSH) or `ToolArgs` (run locally). The struct fields are the only inputs;
//! the exact shell text is fixed by the implementation and covered by tests.

pub mod cloud;
pub mod oracle;
pub mod packages;
pub mod system;
