//! `aimotion-server` – Command & Trajectory Streaming Protocol
//!
//! Accepts one TCP client at a time (default port `6002`) and drives the
//! configured drone from its commands:
//!
//! 1. **Frames** – `CMDSTART_<id>_<command>[_<argument>]` is parsed by
//!    [`protocol`] into a [`ParsedCommand`].
//! 2. **Payloads** – `traj` is followed by a `{…}_EOF` document that may be
//!    split across any number of reads; [`Transmission`] reassembles it.
//! 3. **Dispatch** – [`Dispatcher`] turns a [`Command`] into drone calls and a
//!    reply string.
//! 4. **Install** – [`install_trajectory`] parks the drone on the hover
//!    trajectory, writes the new trajectory into the idle working slot and
//!    swaps to it.
//!
//! # Usage
//!
//! See [`TrajectoryServer`].

pub mod dispatch;
pub mod install;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transmission;

pub use dispatch::{Command, Dispatcher};
pub use install::{FlightSlots, install_trajectory};
pub use protocol::{CommandKind, ParseOutcome, ParsedCommand, parse_command};
pub use server::{BUSY_REPLY, DEFAULT_PORT, SessionSettings, TrajectoryServer};
pub use session::Session;
pub use transmission::{Step, Transmission};
