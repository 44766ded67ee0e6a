//! # clrbind Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the clrbind library. Import this module to get quick access to everything needed
//! to configure an application context and bind assemblies.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all clrbind operations
pub use crate::Error;

/// The result type used throughout clrbind
pub use crate::Result;

/// Bind protocol failures
pub use crate::{BindError, BindErrorKind, BindResult};

// ================================================================================================
// Identity
// ================================================================================================

/// Assembly identity and its components
pub use crate::identity::{
    AssemblyIdentity, AssemblyVersion, IdentityFields, ProcessorArchitecture, PublicKeyToken,
};

// ================================================================================================
// Images
// ================================================================================================

/// Image sources and readers
pub use crate::image::{CatalogImageReader, ImageHandle, ImageReader, ImageSource, PeImageReader};

// ================================================================================================
// Binder
// ================================================================================================

/// The bind state machine and its results
pub use crate::binder::{AssemblyEntry, BatchBindResult, Binder, BinderStatsSnapshot};

/// Application and load contexts
pub use crate::binder::{
    ApplicationContext, ApplicationContextBuilder, ContextFlags, ContextId, ContextOptions,
    HostResolver, LoadContext,
};

/// Host configuration
pub use crate::binder::{BindingPolicy, BindingRedirect, PropertyName, PropertyValue};

/// Diagnostics
pub use crate::binder::{BindOutcome, BindingEvent, BindingLog, BindingLogSink};
