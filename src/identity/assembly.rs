//! Assembly identity, version and architecture types.
//!
//! An [`AssemblyIdentity`] is the canonical form of an assembly reference or definition.
//! It is created by parsing a display name (`"Name, Version=1.0.0.0, Culture=neutral,
//! PublicKeyToken=null"`) or by decoding the manifest of a loaded image, and it is never
//! mutated afterwards.
//!
//! # Specified and unspecified fields
//!
//! A reference may leave out any attribute. An omitted attribute is *unspecified*, which is
//! different from a present-but-empty one when formatting and comparing exactly:
//! `Culture=neutral` is written back, a missing `Culture` is not. For binding, both accept
//! a definition of any culture. The set of attributes that were given is
//! tracked in [`IdentityFields`] and is part of exact equality, so `"Foo"` and
//! `"Foo, Culture=neutral"` are distinct keys. Unspecified fields only take part in the
//! policy-qualified comparison of [`AssemblyIdentity::satisfies`].
//!
//! # Equality Semantics
//!
//! Name and culture compare ASCII case-insensitively; every other field, including the
//! specified-field set, compares exactly. [`Hash`] follows the same rules, so identities
//! can key the load context tables directly.
//!
//! # Examples
//!
//! ```rust
//! use clrbind::identity::{AssemblyIdentity, AssemblyVersion};
//!
//! let request = AssemblyIdentity::parse("Foo, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null")?;
//! let found = AssemblyIdentity::new("foo", AssemblyVersion::new(1, 2, 0, 0), None, None, None);
//!
//! assert!(found.satisfies(&request));
//! assert_eq!(request.display_name(), "Foo, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null");
//! # Ok::<(), clrbind::BindError>(())
//! ```

use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use bitflags::bitflags;

use crate::{error::BindError, identity::PublicKeyToken};

bitflags! {
    /// Attributes that were present when an identity was created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IdentityFields: u8 {
        /// `Version=` was given
        const VERSION = 0x01;
        /// `Culture=` was given (possibly as `neutral`)
        const CULTURE = 0x02;
        /// `PublicKeyToken=` or `PublicKey=` was given (possibly as `null`)
        const PUBLIC_KEY_TOKEN = 0x04;
        /// `ProcessorArchitecture=` was given
        const ARCHITECTURE = 0x08;
    }
}

/// Four-part assembly version.
///
/// Ordering is lexicographic over `major.minor.build.revision`, which is exactly the
/// "found must not be older than requested" rule of the binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AssemblyVersion {
    /// Major version number
    pub major: u16,
    /// Minor version number
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl AssemblyVersion {
    /// Creates a version from its four parts.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parses a version string of 2 to 4 dot separated non-negative integers.
    ///
    /// Missing trailing parts are zero.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::MalformedIdentity`] on any other input, including parts that
    /// do not fit into 16 bits.
    pub fn parse(text: &str) -> Result<Self, BindError> {
        let malformed = |reason: String| BindError::MalformedIdentity {
            input: text.to_string(),
            reason,
        };

        let parts: Vec<&str> = text.split('.').collect();
        if !(2..=4).contains(&parts.len()) {
            return Err(malformed(format!(
                "version must have 2 to 4 parts, found {}",
                parts.len()
            )));
        }

        let mut values = [0u16; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed(format!("invalid version part '{part}'")));
            }
            *slot = part
                .parse()
                .map_err(|_| malformed(format!("version part '{part}' is out of range")))?;
        }

        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for AssemblyVersion {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Processor architecture an image was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcessorArchitecture {
    /// Architecture neutral IL
    MSIL,
    /// 32-bit x86
    X86,
    /// Itanium
    IA64,
    /// x86-64
    AMD64,
    /// 32-bit ARM
    ARM,
    /// 64-bit ARM
    ARM64,
}

impl ProcessorArchitecture {
    /// Parses an architecture name, ASCII case-insensitively. `x64` is accepted for AMD64.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::MalformedIdentity`] for unknown names.
    pub fn parse(text: &str) -> Result<Self, BindError> {
        match text.to_ascii_lowercase().as_str() {
            "msil" => Ok(Self::MSIL),
            "x86" => Ok(Self::X86),
            "ia64" => Ok(Self::IA64),
            "amd64" | "x64" => Ok(Self::AMD64),
            "arm" => Ok(Self::ARM),
            "arm64" => Ok(Self::ARM64),
            _ => Err(BindError::MalformedIdentity {
                input: text.to_string(),
                reason: "unknown processor architecture".to_string(),
            }),
        }
    }

    /// Derives the architecture of a managed image from its COFF machine and CLI flags.
    ///
    /// An x86 image that is IL-only and does not require 32-bit is architecture neutral.
    /// Returns `None` for machine values that do not host managed code.
    ///
    /// # Arguments
    ///
    /// * `machine` - COFF header machine field
    /// * `il_only` - CLI header `COMIMAGE_FLAGS_ILONLY`
    /// * `requires_32bit` - CLI header `COMIMAGE_FLAGS_32BITREQUIRED`
    #[must_use]
    pub fn from_machine(machine: u16, il_only: bool, requires_32bit: bool) -> Option<Self> {
        match machine {
            0x014C if il_only && !requires_32bit => Some(Self::MSIL),
            0x014C => Some(Self::X86),
            0x0200 => Some(Self::IA64),
            0x8664 => Some(Self::AMD64),
            0x01C0 | 0x01C4 => Some(Self::ARM),
            0xAA64 => Some(Self::ARM64),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessorArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MSIL => "MSIL",
            Self::X86 => "x86",
            Self::IA64 => "IA64",
            Self::AMD64 => "AMD64",
            Self::ARM => "ARM",
            Self::ARM64 => "ARM64",
        };
        f.write_str(name)
    }
}

impl FromStr for ProcessorArchitecture {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonical identity of an assembly reference or definition.
///
/// See the [module documentation](self) for the equality rules and the meaning of
/// unspecified fields.
#[derive(Debug, Clone)]
pub struct AssemblyIdentity {
    name: String,
    version: AssemblyVersion,
    culture: Option<String>,
    public_key_token: Option<PublicKeyToken>,
    processor_architecture: Option<ProcessorArchitecture>,
    specified: IdentityFields,
}

impl AssemblyIdentity {
    /// Creates a fully specified identity, as read from an assembly manifest.
    ///
    /// Version, culture and token are always marked as specified; a `None` culture is
    /// neutral and a `None` token is `null`. The architecture is marked as specified
    /// only when one is given.
    ///
    /// # Arguments
    ///
    /// * `name` - Simple name
    /// * `version` - Four-part version
    /// * `culture` - Culture, `None` (or `"neutral"`) for culture-neutral assemblies
    /// * `public_key_token` - Token, `None` for assemblies without a strong name
    /// * `processor_architecture` - Target architecture if known
    pub fn new(
        name: impl Into<String>,
        version: AssemblyVersion,
        culture: Option<String>,
        public_key_token: Option<PublicKeyToken>,
        processor_architecture: Option<ProcessorArchitecture>,
    ) -> Self {
        let mut specified =
            IdentityFields::VERSION | IdentityFields::CULTURE | IdentityFields::PUBLIC_KEY_TOKEN;
        if processor_architecture.is_some() {
            specified |= IdentityFields::ARCHITECTURE;
        }

        Self {
            name: name.into(),
            version,
            culture: normalize_culture(culture),
            public_key_token,
            processor_architecture,
            specified,
        }
    }

    /// Creates a name-only identity; every other field is unspecified.
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: AssemblyVersion::default(),
            culture: None,
            public_key_token: None,
            processor_architecture: None,
            specified: IdentityFields::empty(),
        }
    }

    /// Parses a display name of the form
    /// `Name[, Version=x.y.z.w][, Culture=c][, PublicKeyToken=hex8][, ProcessorArchitecture=a]`.
    ///
    /// Attribute keys are case-insensitive. `PublicKey=<hex>` is accepted in place of a
    /// token and reduced to one. `Culture=neutral` (or empty) and `PublicKeyToken=null`
    /// are explicit values, not omissions.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::MalformedIdentity`] on an empty name, an unknown or repeated
    /// attribute, an attribute without `=`, a version that is not 2 to 4 non-negative
    /// integers, or a token that is not exactly 8 hex bytes.
    pub fn parse(display_name: &str) -> Result<Self, BindError> {
        let malformed = |reason: String| BindError::MalformedIdentity {
            input: display_name.to_string(),
            reason,
        };
        // Nested parsers report their own fragment; re-anchor on the full reference.
        let reanchor = |error: BindError| match error {
            BindError::MalformedIdentity { reason, .. } => malformed(reason),
            other => other,
        };

        let mut parts = display_name.split(',').map(str::trim);
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(malformed("assembly name cannot be empty".to_string()));
        }
        if name.contains('=') {
            return Err(malformed(format!("invalid assembly name '{name}'")));
        }

        let mut identity = Self::simple(name);
        for part in parts {
            let Some((key, value)) = part.split_once('=') else {
                return Err(malformed(format!("attribute '{part}' has no value")));
            };
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');

            let field = match key.trim().to_ascii_lowercase().as_str() {
                "version" => {
                    identity.version = AssemblyVersion::parse(value).map_err(reanchor)?;
                    IdentityFields::VERSION
                }
                "culture" => {
                    identity.culture = normalize_culture(Some(value.to_string()));
                    IdentityFields::CULTURE
                }
                "publickeytoken" => {
                    identity.public_key_token = if value.eq_ignore_ascii_case("null") {
                        None
                    } else {
                        Some(PublicKeyToken::parse(value).map_err(reanchor)?)
                    };
                    IdentityFields::PUBLIC_KEY_TOKEN
                }
                "publickey" => {
                    identity.public_key_token = if value.eq_ignore_ascii_case("null") {
                        None
                    } else {
                        let key = hex::decode(value)
                            .map_err(|_| malformed("public key is not a hex string".to_string()))?;
                        Some(PublicKeyToken::from_public_key(&key))
                    };
                    IdentityFields::PUBLIC_KEY_TOKEN
                }
                "processorarchitecture" => {
                    identity.processor_architecture =
                        Some(ProcessorArchitecture::parse(value).map_err(reanchor)?);
                    IdentityFields::ARCHITECTURE
                }
                _ => return Err(malformed(format!("unknown attribute '{}'", key.trim()))),
            };

            if identity.specified.contains(field) {
                return Err(malformed(format!("attribute '{}' given twice", key.trim())));
            }
            identity.specified |= field;
        }

        Ok(identity)
    }

    /// Returns a copy of this identity with the version replaced and marked as specified.
    #[must_use]
    pub fn with_version(&self, version: AssemblyVersion) -> Self {
        let mut identity = self.clone();
        identity.version = version;
        identity.specified |= IdentityFields::VERSION;
        identity
    }

    /// Formats the identity as a display name, emitting only specified attributes.
    ///
    /// Tokens are printed in lowercase hex, neutral culture as `neutral` and a missing
    /// token as `null`.
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut display = self.name.clone();

        if self.specified.contains(IdentityFields::VERSION) {
            display.push_str(&format!(", Version={}", self.version));
        }
        if self.specified.contains(IdentityFields::CULTURE) {
            display.push_str(", Culture=");
            display.push_str(self.culture.as_deref().unwrap_or("neutral"));
        }
        if self.specified.contains(IdentityFields::PUBLIC_KEY_TOKEN) {
            match &self.public_key_token {
                Some(token) => display.push_str(&format!(", PublicKeyToken={token}")),
                None => display.push_str(", PublicKeyToken=null"),
            }
        }
        if let Some(arch) = self.processor_architecture {
            display.push_str(&format!(", ProcessorArchitecture={arch}"));
        }

        display
    }

    /// Simple name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version; meaningful only when [`IdentityFields::VERSION`] is specified.
    #[must_use]
    pub fn version(&self) -> AssemblyVersion {
        self.version
    }

    /// Culture, `None` for neutral or unspecified.
    #[must_use]
    pub fn culture(&self) -> Option<&str> {
        self.culture.as_deref()
    }

    /// Public key token, `None` for `null` or unspecified.
    #[must_use]
    pub fn public_key_token(&self) -> Option<&PublicKeyToken> {
        self.public_key_token.as_ref()
    }

    /// Processor architecture if specified.
    #[must_use]
    pub fn processor_architecture(&self) -> Option<ProcessorArchitecture> {
        self.processor_architecture
    }

    /// Attributes that were present at creation.
    #[must_use]
    pub fn specified(&self) -> IdentityFields {
        self.specified
    }

    /// Returns `true` if this is a partial identity (version or token unspecified).
    ///
    /// Partial identities are only ever used as requests; they never key a
    /// resolved-assembly table.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self
            .specified
            .contains(IdentityFields::VERSION | IdentityFields::PUBLIC_KEY_TOKEN)
    }

    /// Returns `true` if the culture is neutral or unspecified.
    #[must_use]
    pub fn is_culture_neutral(&self) -> bool {
        self.culture.is_none()
    }

    /// Returns `true` if the identity carries a public key token.
    #[must_use]
    pub fn is_strong_named(&self) -> bool {
        self.public_key_token.is_some()
    }

    /// Policy-qualified comparison: does this (found) identity satisfy `request`?
    ///
    /// - names compare ASCII case-insensitively
    /// - a specified request version must not be newer than the found version
    /// - a request token must match exactly; a `null` or missing token accepts any
    /// - a request culture must match exactly; a neutral or missing culture accepts any
    /// - a request architecture accepts the same architecture or an MSIL/unknown image
    ///
    /// # Arguments
    ///
    /// * `request` - The identity being resolved
    #[must_use]
    pub fn satisfies(&self, request: &AssemblyIdentity) -> bool {
        if !self.name.eq_ignore_ascii_case(&request.name) {
            return false;
        }

        if request.specified.contains(IdentityFields::VERSION)
            && (!self.specified.contains(IdentityFields::VERSION)
                || self.version < request.version)
        {
            return false;
        }

        if let Some(token) = &request.public_key_token {
            if self.public_key_token.as_ref() != Some(token) {
                return false;
            }
        }

        if let Some(culture) = &request.culture {
            match &self.culture {
                Some(found) if found.eq_ignore_ascii_case(culture) => {}
                _ => return false,
            }
        }

        if let Some(arch) = request.processor_architecture {
            match self.processor_architecture {
                None | Some(ProcessorArchitecture::MSIL) => {}
                Some(found) if found == arch => {}
                Some(_) => return false,
            }
        }

        true
    }

    /// Returns `true` if both identities share simple name, culture and token.
    ///
    /// This is the "same assembly, any version" relation used to unify an application
    /// copy of a platform assembly with the platform one.
    #[must_use]
    pub fn same_family(&self, other: &AssemblyIdentity) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && eq_culture(self.culture.as_deref(), other.culture.as_deref())
            && self.public_key_token == other.public_key_token
    }
}

fn normalize_culture(culture: Option<String>) -> Option<String> {
    culture.filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("neutral"))
}

fn eq_culture(left: Option<&str>, right: Option<&str>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(l), Some(r)) => l.eq_ignore_ascii_case(r),
        _ => false,
    }
}

impl PartialEq for AssemblyIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.version == other.version
            && eq_culture(self.culture.as_deref(), other.culture.as_deref())
            && self.public_key_token == other.public_key_token
            && self.processor_architecture == other.processor_architecture
            && self.specified == other.specified
    }
}

impl Eq for AssemblyIdentity {}

impl Hash for AssemblyIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.name.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xFF);
        self.version.hash(state);
        if let Some(culture) = &self.culture {
            for byte in culture.bytes() {
                state.write_u8(byte.to_ascii_lowercase());
            }
        }
        state.write_u8(0xFF);
        self.public_key_token.hash(state);
        self.processor_architecture.hash(state);
        self.specified.hash(state);
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

impl FromStr for AssemblyIdentity {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn def(name: &str, version: (u16, u16, u16, u16)) -> AssemblyIdentity {
        AssemblyIdentity::new(
            name,
            AssemblyVersion::new(version.0, version.1, version.2, version.3),
            None,
            None,
            None,
        )
    }

    #[test]
    fn test_assembly_version_parse() {
        assert_eq!(
            AssemblyVersion::parse("1.2.3.4").unwrap(),
            AssemblyVersion::new(1, 2, 3, 4)
        );
        assert_eq!(
            AssemblyVersion::parse("4.0").unwrap(),
            AssemblyVersion::new(4, 0, 0, 0)
        );
        assert_eq!(
            AssemblyVersion::parse("1.2.3").unwrap(),
            AssemblyVersion::new(1, 2, 3, 0)
        );
    }

    #[test]
    fn test_assembly_version_parse_invalid() {
        for text in ["", "1", "1.2.3.4.5", "1..2", "a.b", "1.-2", "1.70000", "+1.2"] {
            assert!(
                AssemblyVersion::parse(text).is_err(),
                "'{text}' should not parse"
            );
        }
    }

    #[test]
    fn test_assembly_version_ordering() {
        let v1_0 = AssemblyVersion::new(1, 0, 0, 0);
        let v1_2 = AssemblyVersion::new(1, 2, 0, 0);
        let v1_0_5 = AssemblyVersion::new(1, 0, 5, 0);
        let v0_9 = AssemblyVersion::new(0, 9, 9, 9);

        assert!(v1_2 > v1_0);
        assert!(v1_0_5 > v1_0);
        assert!(v0_9 < v1_0);
        assert!(v1_2 > v1_0_5);
    }

    #[test]
    fn test_processor_architecture_parse() {
        assert_eq!(
            ProcessorArchitecture::parse("msil").unwrap(),
            ProcessorArchitecture::MSIL
        );
        assert_eq!(
            ProcessorArchitecture::parse("X64").unwrap(),
            ProcessorArchitecture::AMD64
        );
        assert_eq!(
            ProcessorArchitecture::parse("Arm64").unwrap(),
            ProcessorArchitecture::ARM64
        );
        assert!(ProcessorArchitecture::parse("sparc").is_err());
    }

    #[test]
    fn test_processor_architecture_from_machine() {
        assert_eq!(
            ProcessorArchitecture::from_machine(0x014C, true, false),
            Some(ProcessorArchitecture::MSIL)
        );
        assert_eq!(
            ProcessorArchitecture::from_machine(0x014C, true, true),
            Some(ProcessorArchitecture::X86)
        );
        assert_eq!(
            ProcessorArchitecture::from_machine(0x8664, true, false),
            Some(ProcessorArchitecture::AMD64)
        );
        assert_eq!(
            ProcessorArchitecture::from_machine(0xAA64, false, false),
            Some(ProcessorArchitecture::ARM64)
        );
        assert_eq!(ProcessorArchitecture::from_machine(0x1234, true, false), None);
    }

    #[test]
    fn test_parse_full() {
        let identity = AssemblyIdentity::parse(
            "System.Runtime, Version=8.0.0.0, Culture=neutral, PublicKeyToken=b03f5f7f11d50a3a",
        )
        .unwrap();

        assert_eq!(identity.name(), "System.Runtime");
        assert_eq!(identity.version(), AssemblyVersion::new(8, 0, 0, 0));
        assert!(identity.is_culture_neutral());
        assert_eq!(
            identity.public_key_token().unwrap().to_string(),
            "b03f5f7f11d50a3a"
        );
        assert!(!identity.is_partial());
    }

    #[test]
    fn test_parse_partial() {
        let identity = AssemblyIdentity::parse("Bar").unwrap();
        assert_eq!(identity.name(), "Bar");
        assert!(identity.specified().is_empty());
        assert!(identity.is_partial());

        let identity = AssemblyIdentity::parse("Bar, Version=1.0").unwrap();
        assert!(identity.is_partial());
        assert_eq!(identity.specified(), IdentityFields::VERSION);
    }

    #[test]
    fn test_parse_keys_case_insensitive() {
        let identity =
            AssemblyIdentity::parse("Foo, version=1.0.0.0, CULTURE=de-DE, publickeytoken=NULL")
                .unwrap();

        assert_eq!(identity.culture(), Some("de-DE"));
        assert!(identity.public_key_token().is_none());
        assert!(identity
            .specified()
            .contains(IdentityFields::PUBLIC_KEY_TOKEN));
    }

    #[test]
    fn test_parse_public_key() {
        let identity =
            AssemblyIdentity::parse("mscorlib, PublicKey=00000000000000000400000000000000")
                .unwrap();

        assert_eq!(
            identity.public_key_token().unwrap().to_string(),
            "b77a5c561934e089"
        );
    }

    #[test]
    fn test_parse_invalid() {
        let cases = [
            "",
            " , Version=1.0",
            "Foo, Version=1",
            "Foo, Version=1.2.3.4.5",
            "Foo, Version=x.y",
            "Foo, PublicKeyToken=abc",
            "Foo, PublicKeyToken=zzzzzzzzzzzzzzzz",
            "Foo, Flavor=Vanilla",
            "Foo, Version",
            "Foo, Version=1.0, Version=2.0",
            "Foo, PublicKeyToken=null, PublicKey=00",
            "Foo, ProcessorArchitecture=Sparc",
        ];

        for case in cases {
            match AssemblyIdentity::parse(case) {
                Err(BindError::MalformedIdentity { input, .. }) => assert_eq!(input, case),
                other => panic!("'{case}' should be malformed, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_display_round_trip() {
        let cases = [
            "Foo",
            "Foo, Version=1.0.0.0",
            "Foo, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null",
            "Foo.Resources, Version=2.1.0.7, Culture=fr-FR, PublicKeyToken=b77a5c561934e089",
            "Foo, Culture=neutral",
            "Foo, Version=1.2.3.4, PublicKeyToken=null, ProcessorArchitecture=AMD64",
        ];

        for case in cases {
            let identity = AssemblyIdentity::parse(case).unwrap();
            assert_eq!(identity.display_name(), case);

            let reparsed = AssemblyIdentity::parse(&identity.to_string()).unwrap();
            assert_eq!(reparsed, identity);
            assert_eq!(reparsed.name(), identity.name());
            assert_eq!(reparsed.version(), identity.version());
            assert_eq!(reparsed.culture(), identity.culture());
            assert_eq!(reparsed.public_key_token(), identity.public_key_token());
        }
    }

    #[test]
    fn test_display_normalizes() {
        let identity =
            AssemblyIdentity::parse("Foo,Version=1.0,Culture=,PublicKeyToken=B77A5C561934E089")
                .unwrap();

        assert_eq!(
            identity.display_name(),
            "Foo, Version=1.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089"
        );
    }

    #[test]
    fn test_equality_and_hash() {
        let a = AssemblyIdentity::parse("Foo, Version=1.0.0.0, Culture=EN-us").unwrap();
        let b = AssemblyIdentity::parse("foo, Version=1.0.0.0, Culture=en-US").unwrap();
        let unspecified = AssemblyIdentity::parse("Foo, Version=1.0.0.0").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, unspecified);

        let set: HashSet<_> = [a, b, unspecified].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_unspecified_is_not_neutral() {
        let neutral = AssemblyIdentity::parse("Foo, Culture=neutral").unwrap();
        let missing = AssemblyIdentity::parse("Foo").unwrap();

        assert_ne!(neutral, missing);
        assert_eq!(neutral.culture(), missing.culture());
    }

    #[test]
    fn test_satisfies_version_policy() {
        let request =
            AssemblyIdentity::parse("Foo, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null")
                .unwrap();

        assert!(def("Foo", (1, 2, 0, 0)).satisfies(&request));
        assert!(def("foo", (1, 0, 0, 0)).satisfies(&request));
        assert!(def("Foo", (1, 0, 0, 1)).satisfies(&request));
        assert!(!def("Foo", (0, 9, 0, 0)).satisfies(&request));
        assert!(!def("Bar", (1, 2, 0, 0)).satisfies(&request));

        let versionless = AssemblyIdentity::parse("Foo").unwrap();
        assert!(!versionless.satisfies(&request));
        assert!(def("Foo", (0, 0, 0, 1)).satisfies(&versionless));
    }

    #[test]
    fn test_satisfies_token() {
        let token = PublicKeyToken::parse("b03f5f7f11d50a3a").unwrap();
        let strong = AssemblyIdentity::new(
            "Foo",
            AssemblyVersion::new(1, 0, 0, 0),
            None,
            Some(token),
            None,
        );
        let weak = def("Foo", (1, 0, 0, 0));

        let strong_request = AssemblyIdentity::parse("Foo, PublicKeyToken=b03f5f7f11d50a3a").unwrap();
        let null_request = AssemblyIdentity::parse("Foo, PublicKeyToken=null").unwrap();

        assert!(strong.satisfies(&strong_request));
        assert!(!weak.satisfies(&strong_request));
        assert!(weak.satisfies(&null_request));
        assert!(strong.satisfies(&null_request));
    }

    #[test]
    fn test_satisfies_culture() {
        let german = AssemblyIdentity::new(
            "Foo",
            AssemblyVersion::new(1, 0, 0, 0),
            Some("de-DE".to_string()),
            None,
            None,
        );
        let neutral = def("Foo", (1, 0, 0, 0));

        let german_request = AssemblyIdentity::parse("Foo, Culture=de-de").unwrap();
        let neutral_request = AssemblyIdentity::parse("Foo, Culture=neutral").unwrap();

        assert!(german.satisfies(&german_request));
        assert!(!neutral.satisfies(&german_request));
        assert!(german.satisfies(&neutral_request));
        assert!(neutral.satisfies(&neutral_request));
    }

    #[test]
    fn test_satisfies_architecture() {
        let request = AssemblyIdentity::parse("Foo, ProcessorArchitecture=AMD64").unwrap();
        let build = |arch| {
            AssemblyIdentity::new("Foo", AssemblyVersion::new(1, 0, 0, 0), None, None, arch)
        };

        assert!(build(Some(ProcessorArchitecture::AMD64)).satisfies(&request));
        assert!(build(Some(ProcessorArchitecture::MSIL)).satisfies(&request));
        assert!(build(None).satisfies(&request));
        assert!(!build(Some(ProcessorArchitecture::X86)).satisfies(&request));
    }

    #[test]
    fn test_same_family() {
        let platform = def("System.Text.Json", (8, 0, 0, 0));
        let app = def("system.text.json", (9, 0, 0, 0));
        let satellite = AssemblyIdentity::new(
            "System.Text.Json",
            AssemblyVersion::new(9, 0, 0, 0),
            Some("de".to_string()),
            None,
            None,
        );

        assert!(platform.same_family(&app));
        assert!(!platform.same_family(&satellite));
    }

    #[test]
    fn test_with_version() {
        let request = AssemblyIdentity::parse("Foo, Culture=neutral").unwrap();
        let redirected = request.with_version(AssemblyVersion::new(2, 0, 0, 0));

        assert_eq!(
            redirected.display_name(),
            "Foo, Version=2.0.0.0, Culture=neutral"
        );
    }
}
