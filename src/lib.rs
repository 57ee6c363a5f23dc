pub mod capture;
pub mod config;
pub mod dut;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod peer;
pub mod report;
pub mod sim;
pub mod wire;

#[cfg(test)]
mod test;
