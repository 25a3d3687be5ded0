use async_trait::async_trait;
use tracing::{info, instrument};

use super::fake_backend::FakeRecorder;
use super::model::FoundDevice;
use super::session::{DeviceSession, SessionConfig, SessionHooks};
use super::usb_backend::{UsbTransport, list_recorders};
use crate::error::InteractionError;

/// Entry point for discovering and connecting recorders.
#[async_trait]
pub trait HardwareClient: Send + Sync {
    /// Lists every attached recorder.
    async fn list_devices(&self) -> Result<Vec<FoundDevice>, InteractionError>;

    /// Opens the first attached recorder and establishes a session with it.
    async fn connect_first_device(
        self: Box<Self>,
        config: SessionConfig,
        hooks: SessionHooks,
    ) -> Result<DeviceSession, InteractionError>;
}

/// Builds the USB-backed client.
#[must_use]
pub fn real_hardware_client() -> Box<dyn HardwareClient> {
    Box::new(UsbHardwareClient)
}

/// Builds a client backed by an in-process fake recorder.
#[must_use]
pub fn fake_hardware_client(recorder: FakeRecorder) -> Box<dyn HardwareClient> {
    info!(model = %recorder.model(), "using fake recorder backend");
    Box::new(FakeHardwareClient { recorder })
}

#[derive(Debug)]
struct UsbHardwareClient;

#[async_trait]
impl HardwareClient for UsbHardwareClient {
    async fn list_devices(&self) -> Result<Vec<FoundDevice>, InteractionError> {
        Ok(list_recorders()?
            .into_iter()
            .map(|(found, _info)| found)
            .collect())
    }

    #[instrument(skip_all, level = "debug")]
    async fn connect_first_device(
        self: Box<Self>,
        config: SessionConfig,
        hooks: SessionHooks,
    ) -> Result<DeviceSession, InteractionError> {
        let (found, info) = list_recorders()?
            .into_iter()
            .next()
            .ok_or(InteractionError::NoDevices)?;
        info!(device = %found, "connecting to recorder");
        let transport = UsbTransport::open(&info)?;
        DeviceSession::establish(
            std::sync::Arc::new(transport),
            found.product_id(),
            config,
            hooks,
        )
        .await
    }
}

#[derive(Debug)]
struct FakeHardwareClient {
    recorder: FakeRecorder,
}

#[async_trait]
impl HardwareClient for FakeHardwareClient {
    async fn list_devices(&self) -> Result<Vec<FoundDevice>, InteractionError> {
        Ok(vec![self.recorder.found_device()])
    }

    async fn connect_first_device(
        self: Box<Self>,
        config: SessionConfig,
        hooks: SessionHooks,
    ) -> Result<DeviceSession, InteractionError> {
        let Self { recorder } = *self;
        DeviceSession::establish(recorder.transport(), recorder.product_id(), config, hooks).await
    }
}
