#[cfg(feature = "provisioner")]
pub mod provisioner;

#[cfg(feature = "gateway")]
pub mod gateway;
