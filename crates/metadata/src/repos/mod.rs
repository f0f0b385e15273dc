//! Repository traits for metadata operations.

pub mod maintenance;
pub mod photos;
pub mod regions;

pub use maintenance::MaintenanceRepo;
pub use photos::PhotoRepo;
pub use regions::RegionRepo;
