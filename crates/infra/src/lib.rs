//! Control backends.
//!
//! Currently only the emulated backend lives here; it drives the full core
//! model without hardware and doubles as the test fixture for everything
//! above the [`carmine_core::ControlIo`] seam.

pub mod emulated;
pub mod profiles;

pub use emulated::EmulatedDevice;
