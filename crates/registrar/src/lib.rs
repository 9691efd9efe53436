pub mod platform;
pub mod spaceship;
pub mod traits;

pub use platform::{PlatformClient, PlatformError, PlatformSettings};
pub use spaceship::{
    default_http_client, Availability, OperationStatus, RegistrarError, SpaceshipClient,
    SpaceshipSettings, DEFAULT_TIMEOUT,
};
pub use traits::{PlatformBinder, Registrar, UnconfiguredRegistrar};
