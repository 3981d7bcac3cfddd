use std::{
    io::Read,
    time::Duration,
};

use crate::error::Error;

/// Baud rates the radio modems support.
pub const BAUD_RATES: [u32; 9] = [1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

pub const DEFAULT_BAUD_RATE: u32 = 57600;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct SerialOptions {
    pub port: String,
    pub baud_rate: u32,
    /// How long a read waits for data.
    pub timeout: Duration,
}

impl SerialOptions {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub(crate) fn open(&self) -> Result<Box<dyn Read + Send>, Error> {
        if !BAUD_RATES.contains(&self.baud_rate) {
            tracing::warn!(baud_rate = self.baud_rate, "unusual baud rate");
        }

        let port = serialport::new(&self.port, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|source| {
                Error::PortOpen {
                    port: self.port.clone(),
                    source,
                }
            })?;

        tracing::info!(port = %self.port, baud_rate = self.baud_rate, "opened serial port");

        Ok(Box::new(port))
    }
}

/// Names of the serial ports on this system.
pub fn available_ports() -> Result<Vec<String>, Error> {
    let ports = serialport::available_ports().map_err(Error::ListPorts)?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}
