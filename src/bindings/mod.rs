mod hashgrid;

pub use hashgrid::*;
