#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// The actions that can be sent from a connecting subscriber,
/// as well as the responses.
pub mod actions;

/// A client for talking to the server over a websocket.
pub mod client;

/// The command line interface.
pub mod cli;

/// Configuration of the server.
pub mod config;

/// Turns raw device lines into readings and control events.
pub mod decoder;

/// The synthetic data source used while no device is connected.
pub mod demo;

/// Possible errors in this library.
pub mod error;

/// Events broadcast to every subscriber.
pub mod events;

/// What counts as dangerous.
pub mod hazard;

/// The lifecycle of the link to the device.
pub mod link;

/// Logging setup.
pub mod logging;

/// A pretend bench of devices, for tests and demos without hardware.
pub mod mock;

/// Finding candidate devices among the ports of the host.
pub mod ports;

/// The data that flows from the device.
pub mod reading;

/// Named, cancellable timers.
pub mod scheduler;

/// Code relating to setting up a server.
pub mod server;

/// Serial port handling.
pub mod serial;

/// Drives the link back towards a connected state after failures.
pub mod supervisor;

/// Opening links to devices.
pub mod transport;

pub(crate) mod peer;

pub(crate) mod websocket;
