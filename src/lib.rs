pub mod catalog;
pub mod config;
pub mod context;
pub mod deauth;
pub mod display;
pub mod driver;
pub mod error;
pub mod frame;
pub mod inventory;
pub mod mac;
pub mod scanner;

pub use catalog::{CatalogLimit, ChannelCatalogSet, DeviceRecord, EvictionPolicy, MacAddressCatalog};
pub use config::Config;
pub use context::WifiContext;
pub use deauth::{DeauthSession, DeauthStats};
pub use driver::{FrameKind, FrameSink, Interface, OperatingMode, PromiscuousFilter, RadioDriver};
pub use error::{Error, Result};
pub use inventory::{ApInventory, ApRecord};
pub use mac::MacAddress;
pub use scanner::{ChannelScanner, ScanState, SweepSummary};

/// Number of 2.4 GHz channels the catalogs and sniffer cover.
pub const CHANNEL_COUNT: u8 = 14;
