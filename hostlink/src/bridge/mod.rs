//! Wire layer shared by the controller and the peripheral.
//!
//! # Architecture
//!
//! - **frame**: fixed 8-byte header (class, interface, length) and the
//!   `tokio_util` codec that splits a byte stream into frames
//! - **envelope**: tagged request/response/event payload encoding
//! - **protocol**: command codes and the typed payload fields

pub mod envelope;
pub mod frame;
pub mod protocol;
