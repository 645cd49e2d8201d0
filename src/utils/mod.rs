pub mod byte_range;
pub mod file;
pub mod hashing;
pub mod paths;
