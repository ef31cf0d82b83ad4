//! The module containing various constants that may be modified by developers.

use crate::logger::UartComPort;

/// The logging level.
pub const LOGGING_LEVEL: log::LevelFilter = log::LevelFilter::Trace;

/// The COM port to be used for UART logging.
pub const UART_PORT: UartComPort = UartComPort::Com1;

/// The number of per-processor hook slots.
///
/// Logical processors with an index at or above this value cannot install hooks.
pub const MAX_LOGICAL_PROCESSORS: usize = 64;

/// The number of 2MB large pages that can be split into 4KB EPT page tables.
///
/// Every hooked frame lives in a split large page, so this bounds the number of
/// distinct 2MB regions that can hold hooks at the same time.
pub const MAX_SPLIT_LARGE_PAGES: usize = 64;
