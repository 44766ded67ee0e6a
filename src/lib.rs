// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # clrbind
//!
//! An assembly binder for the Common Language Runtime, in pure Rust.
//!
//! Given an assembly reference such as `Newtonsoft.Json, Version=13.0.0.0,
//! Culture=neutral, PublicKeyToken=30ad4fe6b2a6aeed` and the load context that asks for
//! it, `clrbind` decides which image on disk (or in memory) satisfies the reference. It
//! searches trusted platform assemblies and application directories, validates every
//! candidate's identity, delegates between load contexts, consults a host resolver as a
//! last resort and caches both successes and failures.
//!
//! ## Features
//!
//! - **Identity model** - Display-name parsing, canonical formatting and the
//!   satisfaction rule between a reference and a definition
//! - **Load contexts** - Isolated, collectible and delegating contexts with their own
//!   resolved-assembly tables
//! - **Probing** - Trusted platform assemblies, application paths, satellite cultures
//! - **Caching** - Idempotent positive results and a negative-result cache
//! - **Concurrency** - Lock-free tables; a race on the same identity yields one entry
//! - **Diagnostics** - A structured binding log of every decision
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clrbind::prelude::*;
//!
//! let app = ApplicationContext::builder()
//!     .with_app_path("/srv/app")
//!     .with_trusted_platform_assembly("/usr/share/dotnet/shared/System.Runtime.dll")
//!     .build()?;
//! let binder = Binder::new(app);
//!
//! let entry = binder.bind("System.Runtime, Version=8.0.0.0", ContextId::DEFAULT)?;
//! println!("{} -> {}", entry.identity(), entry.location());
//! # Ok::<(), clrbind::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`identity`] - [`identity::AssemblyIdentity`] and its parts
//! - [`file`] - Memory-mapped and in-memory image storage
//! - [`image`] - PE/CLI metadata reading, reduced to the assembly manifest
//! - [`binder`] - Application context, load contexts, probing, caches and the bind
//!   state machine
//!
//! ### Error Handling
//!
//! Failures of a bind request are typed as [`BindError`]; everything else (image
//! parsing, configuration, I/O) is an [`Error`]. A [`BindError`] converts into
//! [`Error::Bind`], so both travel through one `?` chain:
//!
//! ```rust,no_run
//! use clrbind::{BindError, Error, binder::{ApplicationContext, Binder, ContextId}};
//!
//! fn load(reference: &str) -> clrbind::Result<()> {
//!     let binder = Binder::new(ApplicationContext::builder().with_app_path("app").build()?);
//!     match binder.bind(reference, ContextId::DEFAULT) {
//!         Ok(entry) => println!("bound {entry}"),
//!         Err(BindError::NotFound { identity }) => println!("{identity} is not deployed"),
//!         Err(other) => return Err(Error::Bind(other)),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Logging
//!
//! `clrbind` logs through the [`log`](https://docs.rs/log) facade: bind outcomes at
//! `debug`, every probed path at `trace` and rejected candidates at `warn`. The
//! [`binder::BindingLog`] is independent of the facade and records structured events.
//!
//! ### Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! ```
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Byte-level image storage.
///
/// Provides the [`file::Backend`] trait with a memory-mapped [`file::Physical`] and an
/// in-memory [`file::Memory`] implementation, plus bounds-checked little-endian readers.
pub mod file;

/// Assembly identities.
///
/// # Key Types
///
/// - [`identity::AssemblyIdentity`] - Name, version, culture, token and architecture
/// - [`identity::AssemblyVersion`] - Four-part version, ordered component-wise
/// - [`identity::PublicKeyToken`] - Eight-byte strong-name token
///
/// # Examples
///
/// ```rust
/// use clrbind::identity::AssemblyIdentity;
///
/// let reference = AssemblyIdentity::parse("Foo, Version=1.0")?;
/// let definition = AssemblyIdentity::parse("Foo, Version=1.2.0.0, Culture=neutral, PublicKeyToken=null")?;
/// assert!(definition.satisfies(&reference));
/// # Ok::<(), clrbind::BindError>(())
/// ```
pub mod identity;

/// Assembly image access.
///
/// Opening a candidate and reading its identity goes through the
/// [`image::ImageReader`] trait. [`image::PeImageReader`] reads real PE/CLI images;
/// [`image::CatalogImageReader`] serves declared identities and text manifests.
pub mod image;

/// The assembly binder.
///
/// See [`binder::Binder`] for the bind protocol and [`binder::ApplicationContext`] for
/// configuration.
pub mod binder;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use clrbind::prelude::*;
///
/// let binder = Binder::new(ApplicationContext::builder().with_app_path("app").build()?);
/// let entry = binder.bind("Foo", ContextId::DEFAULT)?;
/// # Ok::<(), clrbind::Error>(())
/// ```
pub mod prelude;

/// `clrbind` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `clrbind` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use clrbind::{Error, image::{ImageReader, ImageSource, PeImageReader}};
///
/// let reader = PeImageReader::new();
/// match reader.open_image(&ImageSource::from("app/Foo.dll")) {
///     Ok(image) => println!("Mapped {} bytes", image.len()),
///     Err(Error::NotSupported) => println!("Not a managed image"),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// Bind protocol failures and their classification.
pub use error::{BindError, BindErrorKind, BindResult};

/// Main entry points for binding.
pub use binder::{ApplicationContext, AssemblyEntry, Binder, ContextId};

/// The identity every bind request is expressed in.
pub use identity::AssemblyIdentity;
