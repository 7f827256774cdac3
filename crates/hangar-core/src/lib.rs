pub mod agent;
pub mod driver;
pub mod error;
pub mod passwords;
pub mod service;
pub mod store;

pub use driver::{Action, DriverOutcome, LaunchRequest, OperationDriver, ResolvedOperation};
pub use error::{HangarError, HangarResult};
pub use passwords::PasswordCache;
pub use service::{HangarService, RemoteRunner};
pub use store::ShipStore;
