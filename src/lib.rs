//! # m6e-rs - A Rust Crate for ThingMagic M5e/M6e Reader Communication
//!
//! The m6e-rs crate is a host-side driver for serial-attached ThingMagic
//! M5e/M6e-class UHF RFID reader modules. It speaks the framed binary
//! request/response protocol over RS-232 or USB-serial, configures the
//! radio, and runs tag inventory and tag memory operations across the Gen2
//! and ISO 18000-6B air protocols.
//!
//! ## Features
//!
//! - Connect with automatic baud-rate negotiation and bootloader handling
//! - Run timed inventories and iterate the resulting tag reads
//! - Simple, weighted multi-plan and multi-protocol read plans
//! - Tag memory operations: read, write, lock, kill, block-write and
//!   block-permalock, standalone or embedded into an inventory round
//! - A typed parameter registry with lazy firmware-capability probing
//! - A background reader with tag-read and exception listeners
//! - Firmware image loading
//!
//! ## Usage
//!
//! ```no_run
//! use m6e_rs::{NativeTransport, SerialReader};
//!
//! # async fn demo() -> Result<(), m6e_rs::ReaderError> {
//! let transport = NativeTransport::new("tmr:///dev/ttyUSB0", 115_200);
//! let mut reader = SerialReader::new(transport);
//! reader.connect().await?;
//!
//! let count = reader.read(500).await?;
//! println!("{count} tags");
//! while reader.has_more_tags().await? {
//!     let tag = reader.get_next_tag().await?;
//!     println!("{}", tag.tag.epc_hex());
//! }
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod error;
pub mod logging;
pub mod reader;
pub mod tag;
pub mod util;

pub use crate::error::{ReaderError, Result, StatusCode};
pub use crate::logging::{init_logger, log_info};

// Core reader types
pub use reader::background::{ListenerId, Reader};
pub use reader::params::{Param, ParamValue};
pub use reader::serial::{LockAction, SerialReader};
pub use reader::transport::{NativeTransport, SerialTransport};
pub use reader::transport_mock::MockTransport;
pub use reader::{
    AntennaMapEntry, PowerMode, Region, UserMode, UserProfileOption, VersionInfo,
};

// Tag data model
pub use tag::filter::TagFilter;
pub use tag::metadata::{MetadataFlag, TagReadData};
pub use tag::read_plan::{MultiReadPlan, ReadPlan, SimpleReadPlan};
pub use tag::tagop::TagOp;
pub use tag::{GpioPin, TagData, TagProtocol};

/// Connect to a reader module via serial port.
///
/// # Arguments
/// * `uri` - Serial port path or URI (e.g., "tmr:///dev/ttyUSB0" on Linux,
///   "tmr:///com4" on Windows)
///
/// # Returns
/// * `Ok(SerialReader)` - Connected reader handle
/// * `Err(ReaderError)` - Connection failed
pub async fn connect(uri: &str) -> Result<SerialReader<NativeTransport>> {
    let mut reader = SerialReader::new(NativeTransport::new(uri, 115_200));
    reader.connect().await?;
    Ok(reader)
}

/// Disconnect from a reader module.
pub async fn disconnect<T: SerialTransport>(reader: &mut SerialReader<T>) -> Result<()> {
    reader.destroy().await
}
