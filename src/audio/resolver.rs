//! Map user-facing device names to endpoints.

use std::sync::Arc;

use super::device::{Direction, Endpoint, DEFAULT_DEVICE};
use super::engine::AudioEngine;
use crate::error::{AudioError, Result};

/// Resolves device names against one engine.
///
/// `"default"` always means the engine's default endpoint for the requested
/// direction. Any other name must match an enumerated endpoint exactly.
#[derive(Clone)]
pub struct DeviceResolver {
    engine: Arc<dyn AudioEngine>,
}

impl DeviceResolver {
    pub fn new(engine: Arc<dyn AudioEngine>) -> Self {
        Self { engine }
    }

    pub fn resolve(&self, name: &str, direction: Direction) -> Result<Endpoint> {
        if name == DEFAULT_DEVICE {
            return self.engine.default_endpoint(direction);
        }

        self.engine
            .enumerate()?
            .into_iter()
            .find(|ep| ep.direction == direction && ep.name == name)
            .ok_or_else(|| AudioError::DeviceNotFound {
                name: name.to_string(),
                direction,
            })
    }

    /// Every endpoint, optionally restricted to one direction.
    pub fn list(&self, direction: Option<Direction>) -> Result<Vec<Endpoint>> {
        let mut endpoints = self.engine.enumerate()?;
        if let Some(direction) = direction {
            endpoints.retain(|ep| ep.direction == direction);
        }
        Ok(endpoints)
    }

    pub fn engine(&self) -> &Arc<dyn AudioEngine> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::synthetic::{
        synthetic_endpoint, SyntheticEngine, SYNTHETIC_MICROPHONE, SYNTHETIC_SPEAKER,
    };

    fn resolver() -> DeviceResolver {
        let engine = SyntheticEngine::new()
            .with_endpoint(synthetic_endpoint("USB Headset", Direction::Capture))
            .with_endpoint(synthetic_endpoint("USB Headset", Direction::Playback));
        DeviceResolver::new(Arc::new(engine))
    }

    #[test]
    fn test_default_follows_direction() {
        let r = resolver();
        assert_eq!(r.resolve("default", Direction::Capture).unwrap().name, SYNTHETIC_MICROPHONE);
        assert_eq!(r.resolve("default", Direction::Playback).unwrap().name, SYNTHETIC_SPEAKER);
    }

    #[test]
    fn test_same_name_both_directions() {
        let r = resolver();
        let ep = r.resolve("USB Headset", Direction::Playback).unwrap();
        assert_eq!(ep.direction, Direction::Playback);
    }

    #[test]
    fn test_unknown_or_wrong_direction_is_not_found() {
        let r = resolver();
        assert!(matches!(
            r.resolve("HDMI", Direction::Playback),
            Err(AudioError::DeviceNotFound { .. })
        ));
        // exact match only
        assert!(r.resolve("usb headset", Direction::Capture).is_err());
        assert!(r.resolve(SYNTHETIC_SPEAKER, Direction::Capture).is_err());
    }

    #[test]
    fn test_list_filters_by_direction() {
        let r = resolver();
        assert_eq!(r.list(None).unwrap().len(), 4);
        let capture = r.list(Some(Direction::Capture)).unwrap();
        assert_eq!(capture.len(), 2);
        assert!(capture.iter().all(|ep| ep.direction == Direction::Capture));
    }
}
