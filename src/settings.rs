use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::convert::ConvertOptions;

/// Persisted export settings used by CLI workflows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub options: ConvertOptions,
}

/// Save export settings to a JSON file.
pub fn save_export_settings(path: &Path, settings: &ExportSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)
        .context("failed to serialize export settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save export settings: {}", path.display()))?;
    Ok(())
}

/// Load export settings from a JSON file.
pub fn load_export_settings(path: &Path) -> Result<ExportSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load export settings: {}", path.display()))?;
    let settings: ExportSettings =
        serde_json::from_str(&content).context("failed to parse export settings JSON")?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{SubFormat, TextureFormat};

    #[test]
    fn given_default_settings_when_serialize_then_json_contains_conversion_options() {
        let settings = ExportSettings::default();
        let json = serde_json::to_string(&settings).expect("serialize settings");
        assert!(json.contains("compression_level"));
        assert!(json.contains("map_toggles"));
    }

    #[test]
    fn given_saved_settings_when_loading_then_values_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("export.json");
        let mut settings = ExportSettings {
            input_path: Some("scene.gltf".to_string()),
            output_path: Some("scene.glb".to_string()),
            ..ExportSettings::default()
        };
        settings.options.format = TextureFormat::Ktx2;
        settings.options.sub_format = SubFormat::Uastc;
        settings.options.quality = Some(2);

        save_export_settings(&path, &settings).expect("save settings");
        let loaded = load_export_settings(&path).expect("load settings");

        assert_eq!(loaded, settings);
    }

    #[test]
    fn given_missing_file_when_loading_then_error_names_path() {
        let error = load_export_settings(Path::new("/nonexistent/export.json"))
            .expect_err("missing settings file");
        assert!(format!("{error:#}").contains("/nonexistent/export.json"));
    }
}
