//! Named media sources
//!
//! The registry maps a [`StreamKey`] to the live [`MediaSource`] carrying
//! it. Writers register a source, readers look it up and attach.
//!
//! ```text
//!                  Arc<SourceRegistry>
//!             ┌──────────────────────────┐
//!             │ sources: HashMap<Key,    │
//!             │   Arc<MediaSource>>      │
//!             └────────────┬─────────────┘
//!                          │
//!        ┌─────────────────┼──────────────────┐
//!        ▼                 ▼                  ▼
//!   [RtmpPlayer]      [RtmpPusher]       [FlvMuxer]
//!   source.write()    source.attach()    source.attach()
//! ```
//!
//! [`MediaSource`]: crate::media::MediaSource

pub mod config;
pub mod error;
pub mod key;
pub mod store;

pub use config::{RegistryConfig, SourceConfig};
pub use error::RegistryError;
pub use key::StreamKey;
pub use store::SourceRegistry;
