//! # market-api
//!
//! HTTP API layer for template-market.
//!
//! Caller identity comes from headers set by the upstream auth gateway:
//! `X-User-Id` (required), `X-User-Email`, `X-User-Role`.
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/checkout/template` | Buy one or more templates |
//! | POST | `/checkout/service` | Commission a service package |
//! | GET | `/checkout/success` | Landing page after payment |
//! | GET | `/checkout/cancel` | Landing page after cancel |
//! | POST | `/webhooks/payment` | Payment provider webhook |
//! | GET | `/withdrawals/balance` | Creator balance |
//! | GET | `/withdrawals` | Creator withdrawal history |
//! | POST | `/withdrawals/request` | Request a withdrawal |
//! | POST | `/withdrawals/admin/{id}/approve` | Admin: approve |
//! | POST | `/withdrawals/admin/{id}/reject` | Admin: reject (note required) |
//! | POST | `/withdrawals/admin/{id}/processing` | Admin: mark processing |
//! | POST | `/withdrawals/admin/{id}/complete` | Admin: complete |

pub mod auth;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
