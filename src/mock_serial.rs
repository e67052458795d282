//! We use this mocking module in unit tests to emulate a serial port.

/// Our mock type used to emulate a serial port.
///
/// Replies are queued ahead of time with [`MockSerial::queue_read_data`];
/// a read with nothing queued fails like a real port read timing out, so
/// the retry and timeout paths can be exercised without a device.
pub struct MockSerial {
    /// Buffer to store data written to the mock serial port
    write_buffer: heapless::Vec<u8, 4096>,
    /// Queued response data to be read
    read_buffer: heapless::Vec<u8, 1024>,
    /// Current position in the read buffer
    read_position: usize,
    /// Cap on bytes returned per read, to simulate replies arriving in
    /// fragments
    read_chunk: usize,
    /// Number of upcoming reads that return zero bytes
    zero_reads: usize,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
}

#[derive(Debug)]
pub enum MockSerialError {
    /// No data queued; reads as a port read timing out
    Timeout,
    /// Simulated buffer overflow
    BufferOverflow,
    /// Generic simulated error for testing
    SimulatedError,
}

impl core::fmt::Display for MockSerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MockSerialError::Timeout => write!(f, "read timed out"),
            MockSerialError::BufferOverflow => write!(f, "buffer overflow"),
            MockSerialError::SimulatedError => write!(f, "simulated error"),
        }
    }
}

impl core::error::Error for MockSerialError {}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }

        for &byte in buf {
            self.write_buffer
                .push(byte)
                .map_err(|_| MockSerialError::BufferOverflow)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }

        if self.zero_reads > 0 {
            self.zero_reads -= 1;
            return Ok(0);
        }

        if self.read_position >= self.read_buffer.len() {
            return Err(MockSerialError::Timeout);
        }

        let available_bytes = self.read_buffer.len() - self.read_position;
        let bytes_to_read = buf.len().min(available_bytes).min(self.read_chunk);

        buf[..bytes_to_read]
            .copy_from_slice(&self.read_buffer[self.read_position..self.read_position + bytes_to_read]);

        self.read_position += bytes_to_read;
        Ok(bytes_to_read)
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
            read_chunk: usize::MAX,
            zero_reads: 0,
            should_error_on_write: false,
            should_error_on_read: false,
        }
    }

    /// Append data to be returned by subsequent read() calls. Bytes
    /// already consumed are reclaimed first, so long queue/read
    /// sequences never outgrow the buffer.
    pub fn queue_read_data(&mut self, data: &[u8]) {
        if self.read_position > 0 {
            let keep = self.read_buffer.len() - self.read_position;
            self.read_buffer.copy_within(self.read_position.., 0);
            self.read_buffer.truncate(keep);
            self.read_position = 0;
        }
        for &byte in data {
            if self.read_buffer.push(byte).is_err() {
                panic!("mock read buffer overflow");
            }
        }
    }

    /// Make the next `count` reads return zero bytes before any queued
    /// data is delivered
    pub fn set_zero_reads(&mut self, count: usize) {
        self.zero_reads = count;
    }

    /// Cap the number of bytes a single read() returns, so a queued
    /// reply arrives split across several reads
    pub fn set_read_chunk(&mut self, chunk: usize) {
        self.read_chunk = chunk.max(1);
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// The written data as text, for asserting on whole protocol lines
    pub fn written_lines(&self) -> Vec<String> {
        core::str::from_utf8(&self.write_buffer)
            .expect("written data is ASCII")
            .split_inclusive("\r\n")
            .map(str::to_string)
            .collect()
    }

    /// Clear the write buffer
    pub fn clear_written_data(&mut self) {
        self.write_buffer.clear();
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

impl Default for MockSerial {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Read, Write};

    #[test]
    fn test_write_data() {
        let mut mock = MockSerial::new();
        let test_data = b"$BD:00,CMD:MON,CH:00,PAR:VMON\r\n";

        let result = mock.write(test_data);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), test_data.len());
        assert_eq!(mock.written_data(), test_data);
    }

    #[test]
    fn test_written_lines_split_on_terminator() {
        let mut mock = MockSerial::new();
        mock.write(b"$BD:00,CMD:MON,CH:00,PAR:VMON\r\n").unwrap();
        mock.write(b"$BD:00,CMD:MON,CH:00,PAR:STAT\r\n").unwrap();

        let lines = mock.written_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "$BD:00,CMD:MON,CH:00,PAR:STAT\r\n");
    }

    #[test]
    fn test_queued_data_accumulates() {
        let mut mock = MockSerial::new();
        mock.queue_read_data(b"#BD:00,");
        mock.queue_read_data(b"CMD:OK\r\n");

        let mut buffer = [0u8; 32];
        let n = mock.read(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"#BD:00,CMD:OK\r\n");
    }

    #[test]
    fn test_read_chunking() {
        let mut mock = MockSerial::new();
        mock.set_read_chunk(4);
        mock.queue_read_data(b"#BD:00,CMD:OK\r\n");

        let mut buffer = [0u8; 32];
        assert_eq!(mock.read(&mut buffer).unwrap(), 4);
        assert_eq!(&buffer[..4], b"#BD:");
        assert_eq!(mock.read(&mut buffer).unwrap(), 4);
        assert_eq!(&buffer[..4], b"00,C");
    }

    #[test]
    fn test_consumed_bytes_are_reclaimed() {
        let mut mock = MockSerial::new();
        let chunk = [b'x'; 512];
        let mut buffer = [0u8; 512];
        // Far more traffic than the buffer holds at once.
        for _ in 0..10 {
            mock.queue_read_data(&chunk);
            let mut total = 0;
            while total < chunk.len() {
                total += mock.read(&mut buffer).unwrap();
            }
        }
    }

    #[test]
    fn test_unread_bytes_survive_requeueing() {
        let mut mock = MockSerial::new();
        mock.queue_read_data(b"first ");
        let mut buffer = [0u8; 3];
        assert_eq!(mock.read(&mut buffer).unwrap(), 3);

        // Reclaiming must only drop the three consumed bytes.
        mock.queue_read_data(b"second");
        let mut buffer = [0u8; 16];
        let n = mock.read(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"st second");
    }

    #[test]
    fn test_zero_reads_before_queued_data() {
        let mut mock = MockSerial::new();
        mock.set_zero_reads(2);
        mock.queue_read_data(b"data");

        let mut buffer = [0u8; 8];
        assert_eq!(mock.read(&mut buffer).unwrap(), 0);
        assert_eq!(mock.read(&mut buffer).unwrap(), 0);
        let n = mock.read(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"data");
    }

    #[test]
    fn test_error_is_displayable() {
        assert_eq!(MockSerialError::Timeout.to_string(), "read timed out");
    }

    #[test]
    fn test_read_times_out_when_exhausted() {
        let mut mock = MockSerial::new();
        mock.queue_read_data(b"Hi");

        let mut buffer = [0u8; 10];
        assert!(mock.read(&mut buffer).is_ok());

        let result = mock.read(&mut buffer);
        assert!(matches!(result.unwrap_err(), MockSerialError::Timeout));
    }

    #[test]
    fn test_error_kinds() {
        assert!(matches!(
            MockSerialError::Timeout.kind(),
            embedded_io::ErrorKind::TimedOut
        ));
        assert!(matches!(
            MockSerialError::BufferOverflow.kind(),
            embedded_io::ErrorKind::OutOfMemory
        ));
        assert!(matches!(
            MockSerialError::SimulatedError.kind(),
            embedded_io::ErrorKind::Other
        ));
    }

    #[test]
    fn test_write_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);

        let result = mock.write(b"test");
        assert!(matches!(result.unwrap_err(), MockSerialError::SimulatedError));
        assert_eq!(mock.written_data().len(), 0);
    }

    #[test]
    fn test_read_error_simulation() {
        let mut mock = MockSerial::new();
        mock.queue_read_data(b"test data");
        mock.set_read_error(true);

        let mut buffer = [0u8; 10];
        let result = mock.read(&mut buffer);
        assert!(matches!(result.unwrap_err(), MockSerialError::SimulatedError));
    }
}
