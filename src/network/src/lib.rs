//! # DepChain Network Module
//!
//! Point-to-point links between replicas.
//!
//! ## Features
//!
//! - **Datagram transports**: one UDP endpoint per replica pair, plus an in-memory
//!   simulated network with loss, duplication and reordering for tests
//! - **Stubborn links**: retransmit every frame until it is acknowledged
//! - **Authenticated perfect links**: sealing, integrity tags, de-duplication and a
//!   FIFO inbox per peer
//!
//! ## Module Structure
//!
//! ```text
//! network/
//! ├── transport/      - DatagramEndpoint trait and UDP endpoint
//! ├── sim/            - Simulated datagram network
//! ├── frame/          - Stubborn link frames
//! ├── stubborn/       - Retransmitting link
//! └── authenticated/  - Authenticated perfect link
//! ```

pub mod authenticated;
pub mod config;
pub mod error;
pub mod frame;
pub mod sim;
pub mod stubborn;
pub mod transport;

pub use authenticated::{AuthenticatedLink, AuthenticatedMessage, Delivery, SEEN_CAPACITY};
pub use config::LinkConfig;
pub use error::{NetworkError, Result};
pub use frame::Frame;
pub use sim::{SimConfig, SimEndpoint, SimNetwork};
pub use stubborn::{Listener, StubbornLink};
pub use transport::{DatagramEndpoint, UdpEndpoint, MAX_DATAGRAM_SIZE};
