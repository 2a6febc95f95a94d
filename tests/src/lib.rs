//! # Route Gateway Test Suite
//!
//! End-to-end tests that drive the gateway over real sockets.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs       # Scripted fake engine and gateway launcher
//!     ├── http_flows.rs    # Client operations under the tagged discipline
//!     ├── sequential.rs    # Degraded one-in-flight discipline
//!     ├── reconnect.rs     # Channel loss, refusal and timeouts
//!     └── process_flow.rs  # Process-handoff deployment (unix)
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p rg-tests
//! cargo test -p rg-tests integration::sequential::
//! ```
