use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

use super::backend::Detector;
use super::backends::{ColorTargetDetector, StubDetector};

/// Detector backends selectable from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    None,
    Stub,
    Color,
}

impl DetectorKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "off" => Ok(Self::None),
            "stub" => Ok(Self::Stub),
            "color" => Ok(Self::Color),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected none, stub or color",
                other
            )),
        }
    }
}

/// Build the configured detector. `Ok(None)` means detection is disabled.
pub fn build_detector(settings: &DetectorSettings) -> Result<Option<Box<dyn Detector>>> {
    let mut detector: Box<dyn Detector> = match DetectorKind::parse(&settings.backend)? {
        DetectorKind::None => return Ok(None),
        DetectorKind::Stub => Box::new(StubDetector::default()),
        DetectorKind::Color => Box::new(
            ColorTargetDetector::new(settings.target_color, settings.label.clone())
                .with_tolerance(settings.tolerance)
                .with_step(settings.sample_step),
        ),
    };
    detector.warm_up()?;
    log::info!("detector backend '{}' ready", detector.name());
    Ok(Some(detector))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_backends() {
        assert_eq!(DetectorKind::parse("none").unwrap(), DetectorKind::None);
        assert_eq!(DetectorKind::parse(" Color ").unwrap(), DetectorKind::Color);
        assert_eq!(DetectorKind::parse("stub").unwrap(), DetectorKind::Stub);
        assert!(DetectorKind::parse("yolo").is_err());
    }

    #[test]
    fn none_builds_nothing() {
        let settings = DetectorSettings {
            backend: "none".to_string(),
            ..DetectorSettings::default()
        };
        assert!(build_detector(&settings).unwrap().is_none());
    }
}
