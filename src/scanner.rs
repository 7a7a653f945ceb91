use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task;

use async_lock::Mutex;
use futures_core::Stream;
use log::{debug, info, warn};

use crate::error::{ErrorKind, TransportFault};
use crate::transport::{BluetoothAdapter, LeScanner, Permission, ScanRecord, ScanSink};
use crate::types::{PeripheralAddress, PeripheralHandle};
use crate::util::FaultExt;
use crate::{Error, Result};

/// Discovers nearby peripherals, emitting each address at most once per scan session.
pub struct Scanner {
    adapter: Arc<dyn BluetoothAdapter>,
    scanner: Arc<dyn LeScanner>,
    session: Mutex<Option<Arc<ScanShared>>>,
}

/// State of one scan session, shared with the [ScanSink] held by the host.
pub(crate) struct ScanShared {
    registry: Mutex<Registry>,
    sender: async_channel::Sender<Result<PeripheralHandle>>,
    // whether the host is scanning; independent of the stream, which the caller may drop
    scanning: AtomicBool,
}

#[derive(Default)]
struct Registry {
    seen: HashSet<PeripheralAddress>,
    peripherals: Vec<PeripheralHandle>,
}

impl ScanShared {
    pub(crate) fn accept(&self, record: ScanRecord) {
        let Some(name) = record.name.filter(|name| !name.is_empty()) else {
            return;
        };
        let mut registry = self.registry.lock_blocking();
        if !self.is_active() || registry.seen.contains(&record.address) {
            return;
        }
        let handle = PeripheralHandle::new(name, record.address.clone()).with_rssi(record.rssi);
        debug!("discovered {handle}");
        registry.seen.insert(record.address);
        registry.peripherals.push(handle.clone());
        let _ = self.sender.try_send(Ok(handle));
    }

    pub(crate) fn fail(&self, error_code: i32) {
        if !self.scanning.swap(false, Ordering::SeqCst) {
            return;
        }
        warn!("scan failed with code {error_code}");
        let _ = self.sender.try_send(Err(Error::new(
            ErrorKind::ScanUnavailable,
            Some(TransportFault::ScanFailed(error_code)),
            "the host stopped the scan",
        )));
        self.sender.close();
    }

    fn is_active(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

impl Scanner {
    pub fn new(adapter: Arc<dyn BluetoothAdapter>, scanner: Arc<dyn LeScanner>) -> Self {
        Self {
            adapter,
            scanner,
            session: Mutex::new(None),
        }
    }

    /// Starts a new scan session.
    ///
    /// The returned stream yields every newly discovered named peripheral until
    /// [Scanner::stop_scan] is called or the host reports a scan failure, which
    /// is yielded as the last item.
    pub fn start_scan(&self) -> Result<ScanStream> {
        if !self.adapter.is_available() || !self.adapter.is_enabled() {
            return Err(Error::new(
                ErrorKind::ScanUnavailable,
                None,
                "the Bluetooth adapter is absent or disabled",
            ));
        }
        if !self.adapter.has_permission(Permission::Scan) {
            return Err(Error::new(
                ErrorKind::PermissionDenied,
                None,
                "scanning requires the Bluetooth scan permission",
            ));
        }

        let mut session = self.session.lock_blocking();
        if session.as_ref().is_some_and(|s| s.is_active()) {
            return Err(ErrorKind::AlreadyScanning.into());
        }
        let (sender, receiver) = async_channel::unbounded();
        let shared = Arc::new(ScanShared {
            registry: Mutex::new(Registry::default()),
            sender,
            scanning: AtomicBool::new(true),
        });
        let started = self.scanner.start_scan(ScanSink {
            shared: shared.clone(),
        });
        if started.is_err() {
            shared.scanning.store(false, Ordering::SeqCst);
        }
        started.or_kind(ErrorKind::ScanUnavailable, "the host refused to start scanning")?;
        info!("scan started");
        *session = Some(shared);
        Ok(ScanStream {
            receiver: Box::pin(receiver),
        })
    }

    /// Stops the active scan session, if any, and ends its stream.
    pub fn stop_scan(&self) {
        let session = self.session.lock_blocking();
        let Some(shared) = session.as_ref() else {
            return;
        };
        if shared.scanning.swap(false, Ordering::SeqCst) {
            self.scanner.stop_scan();
            info!("scan stopped");
        }
        shared.sender.close();
    }

    pub fn is_scanning(&self) -> bool {
        self.session
            .lock_blocking()
            .as_ref()
            .is_some_and(|s| s.is_active())
    }

    /// Peripherals of the current or last scan session, in discovery order.
    pub fn peripherals(&self) -> Vec<PeripheralHandle> {
        self.session
            .lock_blocking()
            .as_ref()
            .map(|s| s.registry.lock_blocking().peripherals.clone())
            .unwrap_or_default()
    }
}

/// Discovered peripherals of one scan session.
pub struct ScanStream {
    receiver: Pin<Box<async_channel::Receiver<Result<PeripheralHandle>>>>,
}

impl Stream for ScanStream {
    type Item = Result<PeripheralHandle>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.receiver.as_mut().poll_next(cx)
    }
}
