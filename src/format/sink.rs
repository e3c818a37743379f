//! Shared, line-atomic output device.

use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex, MutexGuard};

type Device = Box<dyn Write + Send>;

/// Cloneable handle to an output device.
///
/// Every line is written and flushed under one lock, so concurrent writers
/// never interleave characters.
#[derive(Clone)]
pub struct OutputSink {
    device: Arc<Mutex<Device>>,
    color: bool,
}

impl OutputSink {
    pub fn new(device: impl Write + Send + 'static, color: bool) -> Self {
        Self {
            device: Arc::new(Mutex::new(Box::new(device))),
            color,
        }
    }

    pub fn stdout() -> Self {
        let color = io::stdout().is_terminal();
        Self::new(io::stdout(), color)
    }

    pub fn stderr() -> Self {
        let color = io::stderr().is_terminal();
        Self::new(io::stderr(), color)
    }

    /// Whether lines may carry ANSI colour.
    pub fn color(&self) -> bool {
        self.color
    }

    fn lock(&self) -> MutexGuard<'_, Device> {
        // A writer that panicked mid-line leaves nothing worth protecting.
        self.device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write `line` followed by a newline.
    pub fn emit_line(&self, line: &str) {
        let mut device = self.lock();
        let result = writeln!(device, "{}", line).and_then(|_| device.flush());
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed writing output line");
        }
    }

    /// Write a pre-rendered block verbatim.
    pub fn write_block(&self, block: &str) -> io::Result<()> {
        let mut device = self.lock();
        device.write_all(block.as_bytes())?;
        device.flush()
    }
}

/// In-memory device for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Captured {
    pub fn sink() -> (OutputSink, Captured) {
        let captured = Captured::default();
        (OutputSink::new(captured.clone(), false), captured)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(String::from).collect()
    }
}

#[cfg(test)]
impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
