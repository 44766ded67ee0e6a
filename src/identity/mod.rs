//! Assembly identities.
//!
//! This module parses and normalizes assembly references into [`AssemblyIdentity`]
//! values and implements the policy-qualified comparison the binder uses to accept a
//! candidate image.
//!
//! # Key Components
//!
//! - [`AssemblyIdentity`] - Name, version, culture, token and architecture
//! - [`AssemblyVersion`] - Four-part version with ordering
//! - [`ProcessorArchitecture`] - Target architecture of an image
//! - [`PublicKeyToken`] - Eight-byte strong-name token
//! - [`IdentityFields`] - Which attributes were specified
//!
//! # Examples
//!
//! ```rust
//! use clrbind::identity::AssemblyIdentity;
//!
//! let identity: AssemblyIdentity = "Foo, Version=1.0, Culture=neutral".parse()?;
//! assert_eq!(identity.display_name(), "Foo, Version=1.0.0.0, Culture=neutral");
//! assert!(identity.is_partial());
//! # Ok::<(), clrbind::BindError>(())
//! ```

mod assembly;
mod token;

pub use assembly::{AssemblyIdentity, AssemblyVersion, IdentityFields, ProcessorArchitecture};
pub use token::PublicKeyToken;
