//! REST API server for remote control of the preload registry.
//!
//! # Purpose
//!
//! Lets external tools start, inspect and cancel prefetch sessions of a
//! running `preload --serve` process. Claims stay in-process: an opened source
//! cannot cross HTTP, so there is no claim endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐                          ┌──────────────────────┐
//! │   API Server Thread     │  ── start / cancel ──▶   │   Registry<E>        │
//! │   (rouille HTTP)        │                          │   (slot table)       │
//! │                         │  ◀── snapshots ───────   │                      │
//! │  POST /api/start        │                          │   worker threads     │
//! │  GET  /api/sessions     │                          │   (one per session)  │
//! └─────────────────────────┘                          └──────────────────────┘
//!          │                                                      │
//!          └────────────── Arc<Registry<E>> ──────────────────────┘
//! ```
//!
//! - **rouille** - sync HTTP server (simpler than async axum/tokio)
//! - handlers call the registry directly; every registry operation is
//!   thread-safe and never blocks on a worker for long
//!
//! # Endpoints
//!
//! | Method | Path                     | Description                        |
//! |--------|--------------------------|------------------------------------|
//! | GET    | `/api/health`            | Health check                       |
//! | GET    | `/api/sessions`          | Snapshot of every active session   |
//! | GET    | `/api/info?locator=...`  | Snapshot of one locator            |
//! | POST   | `/api/start`             | Start preloading (JSON body)       |
//! | POST   | `/api/cancel`            | Cancel one session (JSON body)     |
//! | POST   | `/api/clear`             | Cancel every session               |

mod api;

pub use api::{ApiServer, SessionView};
