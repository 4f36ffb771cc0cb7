pub mod admin;
pub mod config;
pub mod drive;
pub mod error;
pub mod folders;
pub mod gateway;
pub mod logging;
pub mod schedule;
pub mod select;
pub mod shul_times;
pub mod token;

#[cfg(test)]
mod test_support;
