//! Binding redirects.
//!
//! A redirect retargets a range of versions of one assembly to a single new version
//! before resolution starts. Rules come from the standard application configuration
//! file:
//!
//! ```xml
//! <configuration>
//!   <runtime>
//!     <assemblyBinding xmlns="urn:schemas-microsoft-com:asm.v1">
//!       <dependentAssembly>
//!         <assemblyIdentity name="Foo" publicKeyToken="b77a5c561934e089" culture="neutral" />
//!         <bindingRedirect oldVersion="1.0.0.0-1.9.9.9" newVersion="2.0.0.0" />
//!       </dependentAssembly>
//!     </assemblyBinding>
//!   </runtime>
//! </configuration>
//! ```
//!
//! or are built programmatically. Requests without a version are never redirected.

use std::path::Path;

use log::debug;
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};

use crate::{
    identity::{AssemblyIdentity, AssemblyVersion, IdentityFields, PublicKeyToken},
    Error::{Configuration, XmlError},
    Result,
};

/// One redirect rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRedirect {
    /// Simple name of the redirected assembly
    pub name: String,
    /// Token the request must carry, if any
    pub public_key_token: Option<PublicKeyToken>,
    /// Culture the request must carry, `None` for neutral
    pub culture: Option<String>,
    /// Lowest redirected version, inclusive
    pub old_version_min: AssemblyVersion,
    /// Highest redirected version, inclusive
    pub old_version_max: AssemblyVersion,
    /// Version requests are retargeted to
    pub new_version: AssemblyVersion,
}

impl BindingRedirect {
    /// Creates a rule for culture-neutral references without token constraint.
    ///
    /// # Arguments
    ///
    /// * `name` - Simple name of the assembly
    /// * `old_versions` - A single version or an inclusive range `low-high`
    /// * `new_version` - Target version
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] for an invalid version or an empty range.
    pub fn new(name: impl Into<String>, old_versions: &str, new_version: &str) -> Result<Self> {
        let (min, max) = match old_versions.split_once('-') {
            Some((low, high)) => (parse_version(low)?, parse_version(high)?),
            None => {
                let version = parse_version(old_versions)?;
                (version, version)
            }
        };
        if min > max {
            return Err(Configuration(format!(
                "Empty redirect range '{old_versions}'"
            )));
        }

        Ok(BindingRedirect {
            name: name.into(),
            public_key_token: None,
            culture: None,
            old_version_min: min,
            old_version_max: max,
            new_version: parse_version(new_version)?,
        })
    }

    /// Restricts the rule to references carrying `token`.
    #[must_use]
    pub fn with_public_key_token(mut self, token: PublicKeyToken) -> Self {
        self.public_key_token = Some(token);
        self
    }

    /// Restricts the rule to references of `culture`.
    #[must_use]
    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        let culture = culture.into();
        self.culture = (!culture.is_empty() && !culture.eq_ignore_ascii_case("neutral"))
            .then_some(culture);
        self
    }

    /// Returns `true` if this rule retargets `request`.
    #[must_use]
    pub fn applies_to(&self, request: &AssemblyIdentity) -> bool {
        if !request.specified().contains(IdentityFields::VERSION)
            || !request.name().eq_ignore_ascii_case(&self.name)
        {
            return false;
        }

        let version = request.version();
        if version < self.old_version_min || version > self.old_version_max {
            return false;
        }

        if let Some(token) = &self.public_key_token {
            if request.public_key_token() != Some(token) {
                return false;
            }
        }

        match (&self.culture, request.culture()) {
            (None, None) => true,
            (Some(rule), Some(requested)) => rule.eq_ignore_ascii_case(requested),
            _ => false,
        }
    }
}

/// Ordered set of redirect rules; the first applicable rule wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingPolicy {
    redirects: Vec<BindingRedirect>,
}

impl BindingPolicy {
    /// Creates an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the redirects of an application configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::XmlError`] for malformed XML and
    /// [`crate::Error::Configuration`] for incomplete or invalid rules.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut policy = BindingPolicy::new();
        let mut in_dependent = false;
        let mut identity: Option<RuleIdentity> = None;
        let mut ranges: Vec<(String, String)> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(element) | Event::Empty(element)
                    if element.local_name().as_ref() == b"dependentAssembly" =>
                {
                    in_dependent = true;
                    identity = None;
                    ranges.clear();
                }
                Event::Start(element) | Event::Empty(element) if in_dependent => {
                    match element.local_name().as_ref() {
                        b"assemblyIdentity" => identity = Some(RuleIdentity::read(&element)?),
                        b"bindingRedirect" => ranges.push((
                            required_attribute(&element, b"oldVersion")?,
                            required_attribute(&element, b"newVersion")?,
                        )),
                        _ => {}
                    }
                }
                Event::End(element) if element.local_name().as_ref() == b"dependentAssembly" => {
                    in_dependent = false;
                    if ranges.is_empty() {
                        continue;
                    }
                    let Some(rule) = identity.take() else {
                        return Err(Configuration(
                            "bindingRedirect without assemblyIdentity".to_string(),
                        ));
                    };
                    for (old, new) in ranges.drain(..) {
                        policy.add(rule.redirect(&old, &new)?);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        debug!("Loaded {} binding redirects", policy.len());
        Ok(policy)
    }

    /// Reads and parses an application configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be read, otherwise the
    /// errors of [`BindingPolicy::from_xml`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml(&xml)
    }

    /// Appends a rule.
    pub fn add(&mut self, redirect: BindingRedirect) {
        self.redirects.push(redirect);
    }

    /// Builder form of [`BindingPolicy::add`].
    #[must_use]
    pub fn with_redirect(mut self, redirect: BindingRedirect) -> Self {
        self.add(redirect);
        self
    }

    /// Appends all rules of `other` after the existing ones.
    pub fn extend(&mut self, other: BindingPolicy) {
        self.redirects.extend(other.redirects);
    }

    /// Returns the retargeted request, or `None` if no rule changes it.
    #[must_use]
    pub fn apply(&self, request: &AssemblyIdentity) -> Option<AssemblyIdentity> {
        let redirect = self
            .redirects
            .iter()
            .find(|redirect| redirect.applies_to(request))?;

        (redirect.new_version != request.version())
            .then(|| request.with_version(redirect.new_version))
    }

    /// Rules in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &BindingRedirect> {
        self.redirects.iter()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.redirects.len()
    }

    /// Returns `true` if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.redirects.is_empty()
    }
}

/// `assemblyIdentity` element of a `dependentAssembly` block.
struct RuleIdentity {
    name: String,
    token: Option<PublicKeyToken>,
    culture: Option<String>,
}

impl RuleIdentity {
    fn read(element: &BytesStart<'_>) -> Result<Self> {
        let token = match attribute(element, b"publicKeyToken")? {
            Some(token) if !token.eq_ignore_ascii_case("null") => Some(
                PublicKeyToken::parse(&token).map_err(|error| Configuration(error.to_string()))?,
            ),
            _ => None,
        };

        Ok(RuleIdentity {
            name: required_attribute(element, b"name")?,
            token,
            culture: attribute(element, b"culture")?,
        })
    }

    fn redirect(&self, old_versions: &str, new_version: &str) -> Result<BindingRedirect> {
        let mut redirect = BindingRedirect::new(self.name.clone(), old_versions, new_version)?;
        if let Some(token) = self.token {
            redirect = redirect.with_public_key_token(token);
        }
        if let Some(culture) = &self.culture {
            redirect = redirect.with_culture(culture.clone());
        }
        Ok(redirect)
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attribute in element.attributes() {
        let attribute = attribute?;
        if attribute.key.local_name().as_ref() == name {
            let value = attribute
                .unescape_value()
                .map_err(|error| XmlError(error.to_string()))?;
            return Ok(Some(value.trim().to_string()));
        }
    }
    Ok(None)
}

fn required_attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<String> {
    attribute(element, name)?.ok_or_else(|| {
        Configuration(format!(
            "<{}> is missing the '{}' attribute",
            String::from_utf8_lossy(element.local_name().as_ref()),
            String::from_utf8_lossy(name)
        ))
    })
}

fn parse_version(text: &str) -> Result<AssemblyVersion> {
    AssemblyVersion::parse(text.trim()).map_err(|error| Configuration(error.to_string()))
}
