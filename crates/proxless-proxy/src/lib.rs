//! Proxless request router.
//!
//! Per request:
//!
//! ```text
//! Host ──▶ index.get_by_domain ──miss──▶ 404 "Domain <host> not found"
//!               │hit
//!               ▼
//!          mark_used ─▶ forward ──ok──▶ relay response
//!                          │failed
//!                          ▼
//!               begin_scale_up(route)?
//!                 │won                  │lost (already running)
//!                 ▼                     ▼
//!           ensure_up ─▶ forward     poll forward every interval
//!                 │                     │ until readiness timeout
//!                 └──────────┬──────────┘
//!                            ▼
//!                 mark_used; response or 500 "Error in the server"
//! ```

pub mod error;
pub mod forward;
pub mod host;
pub mod router;
pub mod server;

pub use error::{ForwardError, ForwardResult, ProxyError, ProxyResult};
pub use forward::{ForwardFuture, Forwarder, ForwarderConfig, HttpForwarder, OutboundRequest};
pub use host::{parse_host, request_host};
pub use router::{RequestRouter, RouterConfig, SERVER_ERROR_BODY};
pub use server::serve_listener;
