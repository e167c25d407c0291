pub mod automation;
pub mod capability;
pub mod device;
pub mod event;
pub mod pattern;
pub mod suggestion;
pub mod synergy;
