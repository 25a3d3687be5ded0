use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nusb::transfer::{Queue, RequestBuffer, TransferError};
use nusb::{DeviceInfo, Interface};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace};

use super::model::FoundDevice;
use super::transport::Transport;
use crate::error::{InteractionError, TransportError};
use crate::protocol::{DeviceModel, ENDPOINT_IN, ENDPOINT_OUT, USB_INTERFACE, USB_VENDOR_ID};

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long one read waits before reporting "nothing yet".
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bulk transport to one claimed recorder interface.
pub struct UsbTransport {
    interface: Interface,
    reads: Mutex<Queue<RequestBuffer>>,
    closed: AtomicBool,
}

impl fmt::Debug for UsbTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbTransport")
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl UsbTransport {
    /// Opens the device and claims the bulk interface, detaching kernel drivers.
    #[instrument(skip(info), level = "debug", fields(bus = info.bus_number(), address = info.device_address()))]
    pub(crate) fn open(info: &DeviceInfo) -> Result<Self, InteractionError> {
        let device = info.open()?;
        let interface = device.detach_and_claim_interface(USB_INTERFACE)?;
        let reads = interface.bulk_in_queue(ENDPOINT_IN);
        info!(product_id = info.product_id(), "claimed recorder interface");
        Ok(Self {
            interface,
            reads: Mutex::new(reads),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

fn transport_error(error: TransferError) -> TransportError {
    match error {
        TransferError::Stall => TransportError::Stall,
        TransferError::Disconnected => TransportError::Disconnected,
        TransferError::Cancelled => TransportError::Closed,
        other => TransportError::Transfer {
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl Transport for UsbTransport {
    async fn write(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let completion = timeout(
            WRITE_TIMEOUT,
            self.interface.bulk_out(ENDPOINT_OUT, bytes.to_vec()),
        )
        .await
        .map_err(|_elapsed| TransportError::TimedOut)?;
        let written = completion
            .into_result()
            .map_err(transport_error)?
            .actual_length();
        trace!(written, "bulk write complete");
        Ok(written)
    }

    async fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        let mut queue = self.reads.lock().await;
        if queue.pending() == 0 {
            queue.submit(RequestBuffer::new(max_len));
        }
        match timeout(READ_POLL_INTERVAL, queue.next_complete()).await {
            Err(_elapsed) => Ok(Vec::new()),
            Ok(completion) => completion.into_result().map_err(transport_error),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.reads.lock().await.cancel_all();
        debug!("released recorder interface");
        Ok(())
    }
}

/// Lists attached recorders with their USB descriptors.
pub(crate) fn list_recorders() -> Result<Vec<(FoundDevice, DeviceInfo)>, InteractionError> {
    let recorders = nusb::list_devices()?
        .filter(|info| info.vendor_id() == USB_VENDOR_ID)
        .filter_map(|info| {
            let model = DeviceModel::from_product_id(info.product_id())?;
            let found = FoundDevice::new(
                info.bus_number(),
                info.device_address(),
                info.product_id(),
                model,
                info.serial_number().map(str::to_string),
            );
            Some((found, info))
        })
        .collect::<Vec<_>>();
    debug!(count = recorders.len(), "enumerated recorders");
    Ok(recorders)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn transfer_errors_map_to_transport_errors() {
        assert_matches!(transport_error(TransferError::Stall), TransportError::Stall);
        assert_matches!(
            transport_error(TransferError::Disconnected),
            TransportError::Disconnected
        );
        assert_matches!(transport_error(TransferError::Cancelled), TransportError::Closed);
        assert_matches!(
            transport_error(TransferError::Fault),
            TransportError::Transfer { .. }
        );
    }

    #[test]
    fn only_timeouts_are_retryable() {
        assert!(TransportError::TimedOut.is_retryable());
        assert!(!transport_error(TransferError::Stall).is_retryable());
    }
}
