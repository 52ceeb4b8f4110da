//! `strider-link` – The Robot Seam
//!
//! Strider never speaks the vendor wire protocol directly. Everything the
//! session controller needs from the robot goes through the narrow service
//! traits in this crate; a bridge crate linking the vendor SDK implements
//! them on real hardware, and [`SimRobot`] implements them in-process for
//! headless tests, CI, and the demo binary.
//!
//! # Modules
//!
//! - [`services`] – the six service traits ([`LeaseService`],
//!   [`EstopService`], [`PowerService`], [`CommandChannel`],
//!   [`StateService`], [`ImageService`]) and the [`RobotServices`] bundle
//!   handed to the session controller.
//! - [`sim`] – [`SimRobot`]: a simulated robot that records every call so
//!   tests can assert on exactly what was commanded.

pub mod services;
pub mod sim;

pub use services::{
    CommandChannel, EstopService, ImageService, LeaseService, PowerService, RobotServices,
    StateService,
};
pub use sim::{SimRobot, SimStats, SubmittedCommand};
