//! Device model: elements, routing, stereo links, names, persistence.

pub mod card;
mod controls;
pub mod elem;
pub mod link;
pub mod names;
pub mod routing;
pub mod state;
