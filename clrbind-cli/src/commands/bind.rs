use anyhow::Context;
use clrbind::{
    binder::{ApplicationContext, Binder, PropertyName, PropertyValue},
    ContextId,
};
use serde::Serialize;

use crate::{
    app::{BindOptions, GlobalOptions},
    commands::common::{collect_platform_assemblies, image_reader},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
pub struct BindReport {
    pub results: Vec<BindOutcomeInfo>,
    pub bound: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsInfo>,
}

#[derive(Debug, Serialize)]
pub struct BindOutcomeInfo {
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub platform: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatsInfo {
    pub requests: u64,
    pub local_hits: u64,
    pub failure_cache_hits: u64,
    pub probes: u64,
    pub image_opens: u64,
    pub host_callbacks: u64,
    pub successes: u64,
    pub failures: u64,
}

fn build_binder(options: &BindOptions) -> anyhow::Result<Binder> {
    let mut builder = ApplicationContext::builder().with_image_reader(image_reader(options.manifests));

    for path in &options.app_paths {
        builder = builder.with_app_path(path);
    }
    for path in &options.platform_assemblies {
        builder = builder.with_trusted_platform_assembly(path);
    }
    for dir in &options.platform_dirs {
        for path in collect_platform_assemblies(dir)? {
            builder = builder.with_trusted_platform_assembly(path);
        }
    }
    for path in &options.resource_roots {
        builder = builder.with_platform_resource_root(path);
    }
    if let Some(config) = &options.config {
        builder = builder.with_property(
            PropertyName::AppConfigFile,
            PropertyValue::Text(config.display().to_string()),
        )?;
    }
    if let Some(cultures) = &options.cultures {
        let list = cultures
            .split([',', ';'])
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        builder = builder.with_property(PropertyName::CultureFallbackList, PropertyValue::List(list))?;
    }
    if options.no_exe {
        builder = builder.with_property(PropertyName::ProbeExecutables, PropertyValue::Flag(false))?;
    }

    let app = builder.build().context("invalid binder configuration")?;
    Ok(Binder::new(app))
}

pub fn run(
    references: &[String],
    options: &BindOptions,
    show_log: bool,
    show_stats: bool,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let binder = build_binder(options)?;

    let mut results = Vec::with_capacity(references.len());
    for reference in references {
        let info = match binder.bind(reference, ContextId::DEFAULT) {
            Ok(entry) => BindOutcomeInfo {
                reference: reference.clone(),
                identity: Some(entry.identity().display_name()),
                location: Some(entry.location().to_string()),
                platform: entry.is_platform(),
                error_kind: None,
                error: None,
            },
            Err(error) => BindOutcomeInfo {
                reference: reference.clone(),
                identity: None,
                location: None,
                platform: false,
                error_kind: Some(error.kind().to_string()),
                error: Some(error.to_string()),
            },
        };
        results.push(info);
    }

    let log = match binder.application().binding_log() {
        Some(log) if show_log => log.iter().map(ToString::to_string).collect(),
        _ => Vec::new(),
    };

    let stats = show_stats.then(|| {
        let snapshot = binder.stats();
        StatsInfo {
            requests: snapshot.requests,
            local_hits: snapshot.local_hits,
            failure_cache_hits: snapshot.failure_cache_hits,
            probes: snapshot.probes,
            image_opens: snapshot.image_opens,
            host_callbacks: snapshot.host_callbacks,
            successes: snapshot.successes,
            failures: snapshot.failures,
        }
    });

    let bound = results.iter().filter(|r| r.error.is_none()).count();
    let report = BindReport {
        failed: results.len() - bound,
        bound,
        results,
        log,
        stats,
    };

    print_output(&report, opts, |report| {
        let mut table = TabWriter::new(&[
            ("Reference", Align::Left),
            ("Result", Align::Left),
            ("Location", Align::Left),
        ]);
        for result in &report.results {
            match (&result.identity, &result.error_kind) {
                (Some(identity), _) => {
                    let location = result.location.clone().unwrap_or_default();
                    table.row(vec![
                        result.reference.clone(),
                        identity.clone(),
                        if result.platform {
                            format!("{location} [platform]")
                        } else {
                            location
                        },
                    ]);
                }
                (None, kind) => table.row(vec![
                    result.reference.clone(),
                    kind.clone().unwrap_or_default(),
                    result.error.clone().unwrap_or_default(),
                ]),
            }
        }
        table.print();
        println!();
        println!("{} bound, {} failed", report.bound, report.failed);

        if !report.log.is_empty() {
            println!();
            println!("Binding log:");
            for line in &report.log {
                println!("  {line}");
            }
        }
        if let Some(stats) = &report.stats {
            println!();
            let mut table = TabWriter::new(&[("Counter", Align::Left), ("Value", Align::Right)]);
            for (name, value) in [
                ("Requests", stats.requests),
                ("Local hits", stats.local_hits),
                ("Failure cache hits", stats.failure_cache_hits),
                ("Probes", stats.probes),
                ("Images opened", stats.image_opens),
                ("Host callbacks", stats.host_callbacks),
                ("Successes", stats.successes),
                ("Failures", stats.failures),
            ] {
                table.row(vec![name.to_string(), value.to_string()]);
            }
            table.print();
        }
    })?;

    if report.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
