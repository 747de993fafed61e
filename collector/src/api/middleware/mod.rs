pub mod logging;
pub mod trusted_subnet;

pub use logging::RequestLogger;
pub use trusted_subnet::{check_ip, TrustedSubnet, REAL_IP_HEADER};
