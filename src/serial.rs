// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Trait for serial port operations needed by the DISKDUMP receiver
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Release the device. Reads and writes fail until `open` is called.
    fn close(&mut self);

    /// Reacquire the device at a new baud rate.
    fn open(&mut self, baud_rate: u32) -> io::Result<()>;

    /// Fill `buf` completely, allowing at most `timeout` of silence on the line.
    ///
    /// The deadline restarts whenever bytes arrive, so a long payload at a low
    /// baud rate only fails if the peer stalls. A frame that is only partially
    /// received is reported as `ErrorKind::TimedOut`, never as a short read.
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<()> {
        let mut deadline = Instant::now() + timeout;
        let mut filled = 0;

        while filled < buf.len() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(timed_out(filled, buf.len()));
            }

            match self.read_timeout(&mut buf[filled..], left) {
                Ok(0) => return Err(timed_out(filled, buf.len())),
                Ok(n) => {
                    filled += n;
                    deadline = Instant::now() + timeout;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(timed_out(filled, buf.len()));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

fn timed_out(filled: usize, wanted: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("timed out after {} of {} bytes", filled, wanted),
    )
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "serial port is closed")
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Line settings kept across reopens
#[derive(Debug, Clone, Copy)]
pub struct LineSettings {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port_name: String,
    settings: LineSettings,
    port: Option<Box<dyn SerialPortTrait>>,
}

impl RealSerialPort {
    pub fn open(port_name: &str, baud_rate: u32, settings: LineSettings) -> Result<Self, serialport::Error> {
        let port = Self::connect(port_name, baud_rate, &settings)?;

        Ok(RealSerialPort {
            port_name: port_name.to_string(),
            settings,
            port: Some(port),
        })
    }

    fn connect(
        port_name: &str,
        baud_rate: u32,
        settings: &LineSettings,
    ) -> Result<Box<dyn SerialPortTrait>, serialport::Error> {
        serialport::new(port_name, baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .timeout(Duration::from_millis(100))
            .open()
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(not_connected)?;
        port.write_all(buf)?;
        port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let port = self.port.as_mut().ok_or_else(not_connected)?;
        port.set_timeout(timeout)?;
        port.read(buf)
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn open(&mut self, baud_rate: u32) -> io::Result<()> {
        self.port = None;
        let port = Self::connect(&self.port_name, baud_rate, &self.settings)?;
        self.port = Some(port);
        Ok(())
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    // Baud rates passed to open(), in order
    reopen_log: Vec<u32>,
    expected_reopens: Vec<u32>,
    is_open: bool,
    // open() fails instead of reacquiring the device
    fail_open: bool,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
            reopen_log: Vec::new(),
            expected_reopens: Vec::new(),
            is_open: true,
            fail_open: false,
        }
    }

    pub fn with_failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_expected_reopens(mut self, bauds: Vec<u32>) -> Self {
        self.expected_reopens = bauds;
        self
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if !self.is_open {
            return Err(not_connected());
        }
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        if !self.is_open {
            return Err(not_connected());
        }

        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,  // Stop at timeout marker
            }
        }

        Ok(bytes_read)
    }

    fn close(&mut self) {
        self.is_open = false;
    }

    fn open(&mut self, baud_rate: u32) -> io::Result<()> {
        assert!(!self.is_open, "MockSerialPort reopened at {} without closing first", baud_rate);
        if self.fail_open {
            return Err(io::Error::new(io::ErrorKind::NotFound, "Mock device vanished"));
        }
        self.reopen_log.push(baud_rate);
        self.is_open = true;
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );

        assert_eq!(
            &self.reopen_log,
            &self.expected_reopens,
            "MockSerialPort reopen log mismatch!"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Line that delivers one byte per read after `gap` of silence,
    /// honouring the read timeout like a real port.
    struct SlowLine {
        remaining: usize,
        gap: Duration,
    }

    impl SerialPort for SlowLine {
        fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
            if self.remaining == 0 || self.gap > timeout {
                std::thread::sleep(timeout);
                return Err(io::Error::new(io::ErrorKind::TimedOut, "SlowLine timeout"));
            }
            std::thread::sleep(self.gap);
            buf[0] = 0xA5;
            self.remaining -= 1;
            Ok(1)
        }

        fn close(&mut self) {}

        fn open(&mut self, _baud_rate: u32) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_exact_slow_but_busy_line() {
        // 80 bytes at 5 ms each takes far longer than the 50 ms timeout overall
        let mut line = SlowLine { remaining: 80, gap: Duration::from_millis(5) };

        let mut buf = [0u8; 80];
        line.read_exact_timeout(&mut buf, Duration::from_millis(50))
            .expect("A line that keeps delivering bytes should not time out");
        assert!(buf.iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn test_read_exact_stalled_line_times_out() {
        let mut line = SlowLine { remaining: 3, gap: Duration::from_millis(1) };

        let mut buf = [0u8; 8];
        let err = line.read_exact_timeout(&mut buf, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(err.to_string().contains("3 of 8"), "unexpected message: {}", err);
    }

    #[test]
    fn test_read_exact_gap_longer_than_timeout() {
        let mut line = SlowLine { remaining: 4, gap: Duration::from_millis(100) };

        let mut buf = [0u8; 4];
        let err = line.read_exact_timeout(&mut buf, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(err.to_string().contains("0 of 4"), "unexpected message: {}", err);
    }

    #[test]
    fn test_read_exact_spans_chunks() {
        let responses = b"DISKDUMP".iter().map(|b| Some(*b)).collect();
        let mut mock = MockSerialPort::new(responses, vec![]);

        let mut buf = [0u8; 8];
        mock.read_exact_timeout(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(&buf, b"DISKDUMP");
    }

    #[test]
    fn test_read_exact_partial_frame_times_out() {
        let responses = vec![Some(1), Some(2), None];
        let mut mock = MockSerialPort::new(responses, vec![]);

        let mut buf = [0u8; 4];
        let err = mock.read_exact_timeout(&mut buf, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(err.to_string().contains("2 of 4"), "unexpected message: {}", err);
    }

    #[test]
    fn test_closed_port_rejects_io() {
        let mut mock = MockSerialPort::new(vec![Some(0x42)], vec![0x55])
            .with_expected_reopens(vec![9600]);

        mock.close();
        assert_eq!(mock.write_all(&[0x55]).unwrap_err().kind(), io::ErrorKind::NotConnected);

        let mut buf = [0u8; 1];
        let err = mock.read_exact_timeout(&mut buf, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        mock.open(9600).unwrap();
        mock.write_all(&[0x55]).unwrap();
        mock.read_exact_timeout(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(buf[0], 0x42);
    }
}
