//! Serial port discovery and connection with retry

use crate::driver::{DmxDriver, DmxError};
use crate::transport::{SerialTransport, Transport};
use std::thread;
use std::time::Duration;

/// Connection settings for the DMX interface
#[derive(Debug, Clone, PartialEq)]
pub struct DmxConfig {
    /// Fixed port; `None` scans for one
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for DmxConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 57_600,
            timeout: Duration::from_secs(1),
            max_attempts: 5,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Source of candidate ports and transports
pub trait PortOpener: Send + Sync {
    fn list(&self) -> Result<Vec<String>, DmxError>;
    fn open(&self, name: &str, config: &DmxConfig) -> Result<Box<dyn Transport>, DmxError>;
}

/// Opens real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn list(&self) -> Result<Vec<String>, DmxError> {
        let mut ports: Vec<String> = serialport::available_ports()
            .map_err(std::io::Error::from)?
            .into_iter()
            .map(|p| p.port_name)
            .collect();
        ports.sort();
        ports.dedup();
        Ok(ports)
    }

    fn open(&self, name: &str, config: &DmxConfig) -> Result<Box<dyn Transport>, DmxError> {
        let transport = SerialTransport::open(name, config.baud_rate, config.timeout)?;
        Ok(Box::new(transport))
    }
}

/// Finds and connects to a DMX interface
pub struct Connector {
    config: DmxConfig,
    opener: Box<dyn PortOpener>,
}

impl Connector {
    pub fn new(config: DmxConfig) -> Self {
        Self::with_opener(config, Box::new(SerialOpener))
    }

    pub fn with_opener(config: DmxConfig, opener: Box<dyn PortOpener>) -> Self {
        Self { config, opener }
    }

    pub fn config(&self) -> &DmxConfig {
        &self.config
    }

    /// Ports currently visible to the opener
    pub fn available_ports(&self) -> Result<Vec<String>, DmxError> {
        self.opener.list()
    }

    /// Connect, retrying up to `max_attempts` with a fixed backoff.
    ///
    /// The first attempt tries the configured port, else `cached`, before
    /// scanning. Every later attempt rescans the visible ports.
    pub fn connect(&self, cached: Option<&str>) -> Result<DmxDriver, DmxError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_error: Option<DmxError> = None;
        let mut saw_any_port = false;

        for attempt in 1..=attempts {
            if attempt > 1 {
                thread::sleep(self.config.retry_backoff);
            }

            let pinned = self.config.port.as_deref().or(if attempt == 1 { cached } else { None });
            if let Some(name) = pinned {
                saw_any_port = true;
                match self.try_port(name) {
                    Ok(driver) => return Ok(driver),
                    Err(e) => {
                        tracing::warn!(attempt, port = name, "DMX connect failed: {}", e);
                        last_error = Some(e);
                    }
                }
                if self.config.port.is_some() {
                    continue;
                }
            }

            match self.scan_once() {
                Ok(driver) => return Ok(driver),
                Err(DmxError::DeviceNotFound { ports }) if ports.is_empty() => {
                    tracing::warn!(attempt, "no serial ports found");
                    if last_error.is_none() {
                        last_error = Some(DmxError::DeviceNotFound { ports });
                    }
                }
                Err(e) => {
                    saw_any_port = true;
                    tracing::warn!(attempt, "DMX port scan failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(DmxError::DeviceNotFound { ports }) if !saw_any_port => {
                Err(DmxError::DeviceNotFound { ports })
            }
            Some(e) => Err(DmxError::RetriesExhausted {
                attempts,
                last_error: e.to_string(),
            }),
            None => Err(DmxError::DeviceNotFound { ports: Vec::new() }),
        }
    }

    fn try_port(&self, name: &str) -> Result<DmxDriver, DmxError> {
        let transport = self.opener.open(name, &self.config)?;
        DmxDriver::open(transport)
    }

    /// Try every visible port. A port that answers the handshake wins; a
    /// port that only opens is used when nothing answers. Ports that are not
    /// chosen see the handshake and nothing else.
    fn scan_once(&self) -> Result<DmxDriver, DmxError> {
        let ports = self.opener.list()?;
        let mut silent: Option<DmxDriver> = None;
        let mut last_error: Option<DmxError> = None;

        for name in &ports {
            match self.try_port(name) {
                Ok(driver) if driver.parameters().is_some() => {
                    tracing::info!(port = %name, "DMX interface detected");
                    if let Some(unused) = silent.take() {
                        unused.abandon();
                    }
                    return Ok(driver);
                }
                Ok(driver) => {
                    tracing::debug!(port = %name, "port opened but did not answer handshake");
                    match silent {
                        None => silent = Some(driver),
                        Some(_) => driver.abandon(),
                    }
                }
                Err(e) => {
                    tracing::debug!(port = %name, "port open failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if let Some(driver) = silent {
            tracing::warn!(port = driver.port_name(), "using port without handshake reply");
            return Ok(driver);
        }
        match last_error {
            Some(e) if !ports.is_empty() => Err(e),
            _ => Err(DmxError::DeviceNotFound { ports }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PARAMETER_REQUEST;
    use crate::transport::{MemoryHandle, MemoryTransport};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Scripted opener: per-port outcome plus a log of list/open calls
    #[derive(Default, Clone)]
    struct FakeOpener {
        ports: Arc<Mutex<Vec<String>>>,
        working: Arc<Mutex<HashMap<String, bool>>>,
        list_calls: Arc<Mutex<usize>>,
        opened: Arc<Mutex<Vec<String>>>,
        handles: Arc<Mutex<HashMap<String, Vec<MemoryHandle>>>>,
    }

    impl FakeOpener {
        fn with_ports(ports: &[(&str, Option<bool>)]) -> Self {
            let opener = Self::default();
            for (name, answers) in ports {
                opener.ports.lock().push(name.to_string());
                if let Some(a) = answers {
                    opener.working.lock().insert(name.to_string(), *a);
                }
            }
            opener
        }
    }

    impl PortOpener for FakeOpener {
        fn list(&self) -> Result<Vec<String>, DmxError> {
            *self.list_calls.lock() += 1;
            Ok(self.ports.lock().clone())
        }

        fn open(&self, name: &str, _config: &DmxConfig) -> Result<Box<dyn Transport>, DmxError> {
            self.opened.lock().push(name.to_string());
            let transport = match self.working.lock().get(name) {
                Some(true) => MemoryTransport::new(name),
                Some(false) => MemoryTransport::with_reply(name, Vec::new()),
                None => {
                    return Err(DmxError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no such port",
                    )))
                }
            };
            self.handles
                .lock()
                .entry(name.to_string())
                .or_default()
                .push(transport.handle());
            Ok(Box::new(transport))
        }
    }

    fn fast_config() -> DmxConfig {
        DmxConfig {
            retry_backoff: Duration::ZERO,
            max_attempts: 3,
            ..DmxConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = DmxConfig::default();
        assert_eq!(config.baud_rate, 57_600);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert!(config.port.is_none());
    }

    #[test]
    fn test_scan_prefers_answering_port() {
        let opener = FakeOpener::with_ports(&[("/dev/ttyS0", Some(false)), ("/dev/ttyUSB0", Some(true))]);
        let connector = Connector::with_opener(fast_config(), Box::new(opener));
        let driver = connector.connect(None).unwrap();
        assert_eq!(driver.port_name(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_scan_only_handshakes_unused_ports() {
        let opener = FakeOpener::with_ports(&[
            ("/dev/ttyS0", Some(false)),
            ("/dev/ttyS1", Some(false)),
            ("/dev/ttyUSB0", Some(true)),
        ]);
        let handles = opener.handles.clone();
        let connector = Connector::with_opener(fast_config(), Box::new(opener));
        let driver = connector.connect(None).unwrap();
        assert_eq!(driver.port_name(), "/dev/ttyUSB0");

        for name in ["/dev/ttyS0", "/dev/ttyS1"] {
            let guard = handles.lock();
            let handle = &guard[name][0];
            assert_eq!(handle.write_count(), 1, "{} saw more than the handshake", name);
            assert_eq!(handle.writes()[0], PARAMETER_REQUEST.to_vec());
        }
        drop(driver);
        assert_eq!(handles.lock()["/dev/ttyS0"][0].write_count(), 1);
    }

    #[test]
    fn test_scan_falls_back_to_silent_port() {
        let opener = FakeOpener::with_ports(&[("/dev/ttyS0", Some(false))]);
        let connector = Connector::with_opener(fast_config(), Box::new(opener));
        let driver = connector.connect(None).unwrap();
        assert_eq!(driver.port_name(), "/dev/ttyS0");
        assert!(driver.parameters().is_none());
    }

    #[test]
    fn test_cached_port_tried_first() {
        let opener = FakeOpener::with_ports(&[("/dev/a", Some(true)), ("/dev/b", Some(true))]);
        let opened = opener.opened.clone();
        let connector = Connector::with_opener(fast_config(), Box::new(opener));
        let driver = connector.connect(Some("/dev/b")).unwrap();
        assert_eq!(driver.port_name(), "/dev/b");
        assert_eq!(opened.lock().first().map(String::as_str), Some("/dev/b"));
    }

    #[test]
    fn test_stale_cache_triggers_scan() {
        let opener = FakeOpener::with_ports(&[("/dev/a", Some(true))]);
        let connector = Connector::with_opener(fast_config(), Box::new(opener));
        let driver = connector.connect(Some("/dev/gone")).unwrap();
        assert_eq!(driver.port_name(), "/dev/a");
    }

    #[test]
    fn test_no_ports_is_device_not_found() {
        let opener = FakeOpener::default();
        let list_calls = opener.list_calls.clone();
        let connector = Connector::with_opener(fast_config(), Box::new(opener));
        let err = connector.connect(None).unwrap_err();
        assert!(matches!(err, DmxError::DeviceNotFound { .. }));
        assert_eq!(*list_calls.lock(), 3);
    }

    #[test]
    fn test_pinned_port_retries_then_gives_up() {
        let opener = FakeOpener::with_ports(&[("/dev/a", Some(true))]);
        let opened = opener.opened.clone();
        let list_calls = opener.list_calls.clone();
        let config = DmxConfig {
            port: Some("/dev/missing".into()),
            ..fast_config()
        };
        let connector = Connector::with_opener(config, Box::new(opener));
        let err = connector.connect(None).unwrap_err();
        assert!(matches!(err, DmxError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(opened.lock().len(), 3);
        assert_eq!(*list_calls.lock(), 0);
    }

    #[test]
    fn test_rescan_finds_late_device() {
        let opener = FakeOpener::default();
        let ports = opener.ports.clone();
        let working = opener.working.clone();

        // Device appears after the first scan
        struct LateOpener {
            inner: FakeOpener,
        }
        impl PortOpener for LateOpener {
            fn list(&self) -> Result<Vec<String>, DmxError> {
                let listed = self.inner.list()?;
                if *self.inner.list_calls.lock() == 1 {
                    self.inner.ports.lock().push("/dev/late".into());
                    self.inner.working.lock().insert("/dev/late".into(), true);
                }
                Ok(listed)
            }
            fn open(&self, name: &str, config: &DmxConfig) -> Result<Box<dyn Transport>, DmxError> {
                self.inner.open(name, config)
            }
        }

        let connector = Connector::with_opener(fast_config(), Box::new(LateOpener { inner: opener }));
        let driver = connector.connect(None).unwrap();
        assert_eq!(driver.port_name(), "/dev/late");
        assert_eq!(ports.lock().len(), 1);
        assert!(working.lock().contains_key("/dev/late"));
    }
}
