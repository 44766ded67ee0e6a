use anyhow::Context;
use clrbind::AssemblyIdentity;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
pub struct IdentityInfo {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_token: Option<String>,
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satisfied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn run(names: &[String], satisfies: Option<&str>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let definition = satisfies
        .map(|text| {
            AssemblyIdentity::parse(text).with_context(|| format!("invalid definition: {text}"))
        })
        .transpose()?;

    let infos: Vec<IdentityInfo> = names
        .iter()
        .map(|input| match AssemblyIdentity::parse(input) {
            Ok(identity) => IdentityInfo {
                input: input.clone(),
                display_name: Some(identity.display_name()),
                name: Some(identity.name().to_string()),
                version: Some(identity.version().to_string()),
                culture: Some(identity.culture().unwrap_or("neutral").to_string()),
                public_key_token: identity.public_key_token().map(ToString::to_string),
                partial: identity.is_partial(),
                satisfied: definition.as_ref().map(|d| d.satisfies(&identity)),
                error: None,
            },
            Err(error) => IdentityInfo {
                input: input.clone(),
                display_name: None,
                name: None,
                version: None,
                culture: None,
                public_key_token: None,
                partial: false,
                satisfied: None,
                error: Some(error.to_string()),
            },
        })
        .collect();

    print_output(&infos, opts, |infos| {
        let mut columns = vec![("Input", Align::Left), ("Display name", Align::Left), ("Partial", Align::Left)];
        if definition.is_some() {
            columns.push(("Satisfied", Align::Left));
        }
        let mut table = TabWriter::new(&columns);

        for info in infos {
            let mut row = vec![
                info.input.clone(),
                info.display_name
                    .clone()
                    .or_else(|| info.error.clone())
                    .unwrap_or_default(),
                if info.partial { "yes" } else { "no" }.to_string(),
            ];
            if definition.is_some() {
                row.push(match info.satisfied {
                    Some(true) => "yes".to_string(),
                    Some(false) => "no".to_string(),
                    None => "-".to_string(),
                });
            }
            table.row(row);
        }
        table.print();
    })
}
