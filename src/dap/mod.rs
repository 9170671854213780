pub mod client;
pub mod codec;
pub mod correlator;
pub mod router;
pub mod socket_helper;
pub mod transport;
pub mod transport_trait;
pub mod types;
