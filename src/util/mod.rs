pub mod clock;
pub mod presentation;
pub mod serde;
pub mod telemetry;

pub use self::clock::*;
pub use self::presentation::*;
pub use self::serde::*;
pub use self::telemetry::*;
