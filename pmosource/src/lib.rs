//! # PMOSource
//!
//! Source registry, track model and stream opener shared by the PMOSources
//! providers.
//!
//! A query (usually a URL pasted by a user) goes through the
//! [`SourceRegistry`], which hands it to the first [`SourceProvider`] that
//! claims it. The provider returns a [`Track`] or a [`Playlist`]. Later, when
//! the playback engine needs bytes, [`SourceRegistry::open`] asks the owning
//! provider for a fresh [`StreamDescriptor`] and returns a [`StreamHandle`].
//!
//! Tracks can be persisted with the versioned binary [`codec`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pmosource::{SourceRegistry, Result};
//!
//! # async fn run(registry: SourceRegistry) -> Result<()> {
//! let item = registry.resolve("https://clyp.it/abcd1234").await?;
//! for track in item.into_tracks() {
//!     let mut stream = registry.open(&track).await?;
//!     let bytes = stream.read_to_end().await?;
//!     println!("{}: {} bytes", track.title, bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod http;
pub mod model;
pub mod provider;
pub mod registry;
pub mod stream;

pub use error::{ErrorKind, Result, SourceError, TransportKind};
pub use model::{AudioItem, Playlist, ProviderState, Track, TrackBuilder};
pub use provider::{MediaContainer, SourceProvider, StreamDescriptor};
pub use registry::{SourceRegistry, SourceRegistryBuilder};
pub use stream::{RetryPolicy, StreamHandle, StreamOpener};
pub use tokio_util::sync::CancellationToken;
