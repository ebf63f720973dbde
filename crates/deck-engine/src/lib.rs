pub mod art;
pub mod config;
pub mod device;
pub mod meta;
pub mod player;
pub mod resample;
pub mod sink;
pub mod source;

#[cfg(test)]
pub(crate) mod testutil;
