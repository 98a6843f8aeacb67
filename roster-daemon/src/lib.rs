//! Background roster daemon: live listeners per parent, a serial sync queue,
//! and a Unix socket control server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_migrate, request_refresh, request_roster, request_status, request_stop, send_request,
    DaemonRequest, DaemonResponse,
};
pub use runtime::{open_engine, run, start_blocking};
