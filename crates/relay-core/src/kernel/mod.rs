// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Kernel & Bus: the root subsystem every other subsystem registers with.
//!
//! Four pieces of state live here, each in its own module:
//! [`ChannelManager`] (the channel ACL), [`ErrorManager`] (a bounded
//! observation ring), [`ResponseManager`] (pending-response/timeout
//! bookkeeping), and [`AccessControl`] (a bundle onto the identity & access
//! core). [`Kernel`] itself wires them together and implements the
//! privileged `sendProtected` pipeline.

mod access_control;
mod bus;
mod channels;
mod error_manager;
mod response_manager;

pub use access_control::AccessControl;
pub use bus::{Kernel, KernelError, DEFAULT_ERROR_CAPACITY};
pub use channels::ChannelManager;
pub use error_manager::{ErrorManager, RecordedError};
pub use response_manager::ResponseManager;
