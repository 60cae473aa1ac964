//! # CANOPY Core Runtime Services
//!
//! The services a scene tree consumes but does not own:
//!
//! - **Clocks** handed top-down from container to child at load time
//! - **Scheduler** queues: cross-thread enqueue, frame-thread drain
//! - **Services**: the scoped dependency-injection map
//! - **Bindables**: reactive values with an explicit unbind protocol
//! - **Cancellation** tokens for cooperative load abandonment
//! - **Disposal queue**: teardown on a background worker thread
//!
//! ## Threading Rules
//!
//! 1. **Enqueue anywhere, drain on the frame thread** - schedulers and the
//!    disposal queue are internally synchronized
//! 2. **Scopes are immutable** - a service scope never mutates after build
//! 3. **Cancellation is cooperative** - observed at checkpoints, never
//!    forced from the outside

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod bindable;
pub mod cancel;
pub mod dispose;
pub mod error;
pub mod scheduler;
pub mod services;
pub mod time;

pub use bindable::{unbind_members, AnyBindable, Bindable};
pub use cancel::CancellationToken;
pub use dispose::{Disposable, DisposalConfig, DisposalQueue, DisposalStats};
pub use error::{CoreError, CoreResult};
pub use scheduler::{Action, DrainGate, Scheduler};
pub use services::{Services, ServicesBuilder};
pub use time::{Clock, FrameClock, ManualClock, SharedClock};
