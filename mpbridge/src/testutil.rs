//! Shared test doubles for the protocol and transport layers.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// In-memory port with split read/write buffers.
///
/// Read data is organised in stages: reads serve the front stage and
/// return `TimedOut` once it runs dry, matching a quiet serial port.
/// `clear_buffers` throws away the rest of the front stage and advances
/// to the next one, so a test can model "stale bytes discarded, fresh
/// bytes arrive afterwards". Setting `eof` makes reads return `Ok(0)` to
/// simulate a closed stream.
#[derive(Debug)]
pub(crate) struct MockPort {
    stages: VecDeque<VecDeque<u8>>,
    pub written: Vec<u8>,
    pub eof: bool,
    timeout: Duration,
    baud_rate: u32,
}

impl MockPort {
    pub fn with_data(data: &[u8]) -> Self {
        Self::with_stages(&[data])
    }

    pub fn with_stages(stages: &[&[u8]]) -> Self {
        let mut queue: VecDeque<VecDeque<u8>> = stages
            .iter()
            .map(|s| s.iter().copied().collect())
            .collect();
        if queue.is_empty() {
            queue.push_back(VecDeque::new());
        }
        Self {
            stages: queue,
            written: Vec::new(),
            eof: false,
            timeout: Duration::from_millis(100),
            baud_rate: 115200,
        }
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let Some(stage) = self.stages.front_mut() else {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        };
        if stage.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let mut n = 0;
        while n < buf.len() {
            match stage.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                },
                None => break,
            }
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if self.stages.len() > 1 {
            self.stages.pop_front();
        } else if let Some(stage) = self.stages.front_mut() {
            stage.clear();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.eof = true;
        Ok(())
    }
}
