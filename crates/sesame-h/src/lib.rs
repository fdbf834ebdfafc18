//! Headless Chromium implementation of the solver's capability traits,
//! driven over CDP via chromiumoxide.

pub mod cdp;
pub mod session;

pub use cdp::CdpClient;
pub use session::CdpSession;
