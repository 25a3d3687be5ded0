mod capability;
mod correlator;
mod engine;
mod fake_backend;
mod hardware;
mod model;
mod session;
mod transport;
mod usb_backend;

pub use self::capability::{CapabilityGate, Feature};
pub use self::correlator::{Reply, StreamEvent, Ticket};
pub(crate) use self::engine::CommandStream;
pub use self::engine::PendingCommand;
pub use self::fake_backend::{FakeFile, FakeFiles, FakeRecorder, FakeRecorderConfig};
pub use self::hardware::{HardwareClient, fake_hardware_client, real_hardware_client};
pub use self::model::{DeviceIdentity, FirmwareVersion, FoundDevice};
pub use self::session::{DeviceSession, DisconnectReason, Outcome, SessionConfig, SessionHooks};
pub use self::transport::Transport;
pub use self::usb_backend::UsbTransport;
