pub mod extract;
pub mod outline;
pub mod report;
pub mod units;
