use std::path::PathBuf;

use clrbind::image::ImageSource;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::image_reader,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
pub struct ImageInfo {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    pub size: usize,
    pub strong_named: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn run(paths: &[PathBuf], manifests: bool, opts: &GlobalOptions) -> anyhow::Result<()> {
    let reader = image_reader(manifests);

    let infos: Vec<ImageInfo> = paths
        .iter()
        .map(|path| {
            let mut info = ImageInfo {
                path: path.display().to_string(),
                identity: None,
                architecture: None,
                size: 0,
                strong_named: false,
                error: None,
            };

            let image = match reader.open_image(&ImageSource::from(path.as_path())) {
                Ok(image) => image,
                Err(error) => {
                    info.error = Some(error.to_string());
                    return info;
                }
            };
            info.size = image.len();

            match reader.read_identity(&image) {
                Ok(identity) => {
                    info.identity = Some(identity.display_name());
                    info.architecture = identity.processor_architecture().map(|a| a.to_string());
                    info.strong_named = identity.is_strong_named();
                }
                Err(error) => info.error = Some(error.to_string()),
            }
            info
        })
        .collect();

    print_output(&infos, opts, |infos| {
        let mut table = TabWriter::new(&[
            ("File", Align::Left),
            ("Size", Align::Right),
            ("Identity", Align::Left),
            ("Arch", Align::Left),
        ]);
        for info in infos {
            table.row(vec![
                info.path.clone(),
                info.size.to_string(),
                info.identity
                    .clone()
                    .or_else(|| info.error.clone())
                    .unwrap_or_default(),
                info.architecture.clone().unwrap_or_else(|| "-".to_string()),
            ]);
        }
        table.print();
    })
}
