pub mod container;
pub mod context;
pub mod daemon;
pub mod deploy;
pub mod error;
pub mod exec;
pub mod firewall;
pub mod fsutil;
pub mod hostenv;
pub mod inventory;
pub mod lock;
pub mod systemd;

pub use container::ContainerSpec;
pub use context::Ctx;
pub use daemon::{ConfigBlob, DaemonDescriptor, DaemonName, Descriptor};
pub use error::{Error, Result};
