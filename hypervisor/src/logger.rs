//! Serial console logging: every record becomes one `LEVEL: message` line on a COM port.
// Port handling after:
// https://github.com/tandasat/Hello-VT-rp/blob/main/hypervisor/src/logger.rs

use {
    crate::{
        config::UART_PORT,
        error::HypervisorError,
        intel::support::{inb, outb},
    },
    core::fmt,
    spin::Mutex,
};

/// The I/O port base of the serial port used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum UartComPort {
    Com1 = 0x3f8,
    Com2 = 0x2f8,
}

/// A byte sink the logger writes its lines to.
pub trait SerialPort: Send {
    /// Sends `byte`, waiting for the transmitter if it is busy.
    fn write_byte(&mut self, byte: u8);
}

/// A 16550-compatible UART driven through port I/O.
pub struct ComPort {
    io_port_base: u16,
}

impl ComPort {
    const TRANSMITTER_HOLDING_BUFFER: u16 = 0;
    const LINE_STATUS: u16 = 5;
    const TRANSMITTER_EMPTY: u8 = 0x20;

    pub const fn new(port: UartComPort) -> Self {
        Self {
            io_port_base: port as u16,
        }
    }
}

impl SerialPort for ComPort {
    fn write_byte(&mut self, byte: u8) {
        while inb(self.io_port_base + Self::LINE_STATUS) & Self::TRANSMITTER_EMPTY == 0 {
            core::hint::spin_loop();
        }
        outb(self.io_port_base + Self::TRANSMITTER_HOLDING_BUFFER, byte);
    }
}

/// A `log` backend that serializes records onto a [`SerialPort`].
pub struct SerialLogger<P> {
    port: Mutex<P>,
}

impl<P: SerialPort> SerialLogger<P> {
    pub const fn new(port: P) -> Self {
        Self { port: Mutex::new(port) }
    }
}

impl<P: SerialPort> log::Log for SerialLogger<P> {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::Level::Trace
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut port = self.port.lock();
        let _ = fmt::write(&mut LineWriter(&mut *port), format_args!("{}: {}\n", record.level(), record.args()));
    }

    fn flush(&self) {}
}

/// Terminal-friendly writer: `\n` goes out as `\r\n`.
struct LineWriter<'a, P>(&'a mut P);

impl<P: SerialPort> fmt::Write for LineWriter<'_, P> {
    fn write_str(&mut self, string: &str) -> fmt::Result {
        for byte in string.bytes() {
            if byte == b'\n' {
                self.0.write_byte(b'\r');
            }
            self.0.write_byte(byte);
        }
        Ok(())
    }
}

#[cfg(not(test))]
type Console = ComPort;

// Unit tests run as a host process without I/O privilege.
#[cfg(test)]
type Console = crate::test_utils::CapturedConsole;

static UART_LOGGER: SerialLogger<Console> = SerialLogger::new(Console::new(UART_PORT));

/// Installs the serial logger on `UART_PORT` and enables records up to `level`.
///
/// Fails if a logger is already installed.
pub fn init_uart_logger(level: log::LevelFilter) -> Result<(), HypervisorError> {
    log::set_logger(&UART_LOGGER).map_err(|_| HypervisorError::LoggerAlreadyInitialized)?;
    log::set_max_level(level);
    Ok(())
}
