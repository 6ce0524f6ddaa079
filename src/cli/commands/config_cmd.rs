//! Effective configuration display.

use console::style;

use crate::config::{Config, Settings};

/// Print the resolved settings as TOML, noting where they came from.
pub fn cmd_config(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    match config.source_path {
        Some(ref path) => eprintln!(
            "{} Loaded config from {}",
            style("✓").green(),
            path.display()
        ),
        None => eprintln!(
            "{} No config file found, showing defaults with environment overrides",
            style("!").yellow()
        ),
    }
    if settings.ner_api_token.is_some() {
        eprintln!("  {} NER API token is set (not shown)", style("→").dim());
    }

    print!("{}", render_settings(settings)?);
    Ok(())
}

fn render_settings(settings: &Settings) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_settings_omits_token() {
        let settings = Settings {
            ner_api_token: Some("hf_secret".to_string()),
            ..Settings::default()
        };
        let rendered = render_settings(&settings).unwrap();

        assert!(!rendered.contains("hf_secret"));
        assert!(rendered.contains("batch_size = 10"));
        assert!(rendered.contains("[columns]"));

        let parsed: toml::Value = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed["workers"].as_integer(), Some(10));
    }
}
