pub mod hashgrid;
pub mod staging;

pub use self::hashgrid::HashGridEncoder;
pub use self::staging::HostStaging;
