#![doc = "Cyclic real-time executor: period clock, workers, launcher, and process setup."]

#[cfg(not(target_os = "linux"))]
compile_error!("rtcycle-runtime drives Linux pthread, clock_nanosleep, and capability APIs");

pub mod capability;
pub mod clock;
pub mod coordinator;
pub mod executor;
pub mod launcher;
pub mod realtime;
pub mod session;
pub mod telemetry;
pub mod worker;

pub use capability::*;
pub use clock::*;
pub use coordinator::*;
pub use executor::*;
pub use launcher::*;
pub use realtime::*;
pub use session::*;
pub use telemetry::*;
pub use worker::*;
