//! Session-oriented client core for the Proxmox VE REST API.
//!
//! # Overview
//! A `Session` holds the connection settings and credentials for one
//! server, executes GET/PUT/POST/DELETE calls against arbitrary resource
//! paths under `/api2/{json,png}`, and normalizes every response into an
//! `ApiResult`. Long-running server operations are followed with the task
//! poller.
//!
//! # Design
//! - `execute` = `build_request` + `Transport::send` + `parse_response`;
//!   the two halves are pure and public so request/response mapping is
//!   testable without a network.
//! - Ordinary outcomes never become `Err`: transport failures, non-200
//!   statuses, API-reported validation errors, rejected logins and task
//!   timeouts are all return values. `Error` is reserved for configuration
//!   mistakes and opt-in envelope conversions.
//! - The default transport (`ureq`) does not verify TLS certificates, since
//!   hypervisors typically run with self-signed ones. Opt back in with
//!   `SessionBuilder::verify_tls(true)`.
//!
//! ```no_run
//! use pve_core::{Params, Session};
//!
//! # fn demo() -> pve_core::Result<()> {
//! let mut session = Session::builder("192.168.1.10").build()?;
//! if !session.login("root@pam", "secret") {
//!     return Ok(());
//! }
//! let created = session.create(
//!     "/nodes/pve1/qemu",
//!     &Params::new().with("vmid", 120).with("memory", 2048),
//! );
//! if let Some(upid) = created.data().as_str() {
//!     let upid = upid.to_string();
//!     let finished = session.wait_for_task_to_finish("pve1", &upid, 500, 60_000);
//!     println!("finished={finished} exit={:?}", session.task_exit_status("pve1", &upid));
//! }
//! # Ok(()) }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod params;
pub mod result;
pub mod session;
pub mod task;
pub mod transport;
pub mod types;

pub use auth::{ApiToken, Ticket};
pub use config::SessionConfig;
pub use error::{Error, Result, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use params::Params;
pub use result::{ApiResult, Body, Envelope};
pub use session::{Session, SessionBuilder};
pub use task::PollOptions;
pub use transport::UreqTransport;
pub use types::{AuthMode, Decoding, ResponseFormat, Verbosity};
