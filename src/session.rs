//! One host session: the registry, clock and constraint table every stream
//! and control opened through it shares.

use std::sync::Arc;

use alsa::Direction;

use crate::clock::{Clock, MonotonicClock};
use crate::config::{ConfigNode, CtlConfig, HwConstraints, PcmConfig};
use crate::ctl::NullMixer;
use crate::error::{Error, Result};
use crate::pcm::NullPcm;
use crate::registry::TriggerRegistry;

#[derive(Clone)]
pub struct Session {
    registry: Arc<TriggerRegistry>,
    clock: Arc<dyn Clock>,
    constraints: HwConstraints,
}

impl Session {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Arc::new(TriggerRegistry::new()),
            clock,
            constraints: HwConstraints::default(),
        }
    }

    /// Like [`Session::new`], but reports an unreadable constraint table
    /// instead of panicking. The plugin entry points build their session this way.
    pub fn try_new() -> Result<Self> {
        let constraints = HwConstraints::new().map_err(Error::Constraints)?;
        Ok(Self {
            registry: Arc::new(TriggerRegistry::new()),
            clock: Arc::new(MonotonicClock::new()),
            constraints,
        })
    }

    pub fn with_constraints(mut self, constraints: HwConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn registry(&self) -> &Arc<TriggerRegistry> {
        &self.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn constraints(&self) -> &HwConstraints {
        &self.constraints
    }

    /// Validate `node` and open a PCM stream. Nothing is allocated when the
    /// configuration is rejected.
    pub fn open_pcm(&self, direction: Direction, node: &ConfigNode) -> Result<NullPcm> {
        let config = PcmConfig::from_node(node)?;
        NullPcm::open(direction, config, self)
    }

    pub fn open_ctl(&self, node: &ConfigNode) -> Result<NullMixer> {
        CtlConfig::from_node(node)?;
        Ok(NullMixer::new())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alsa::pcm::Format;

    use crate::config::{ConfigValue, Range};
    use crate::pcm::{HwParams, IoPlug};

    #[test]
    fn unknown_pcm_key_is_reported_by_name() {
        let session = Session::new();
        let node = ConfigNode::new()
            .with("type", ConfigValue::String("none".into()))
            .with("foo", ConfigValue::Integer(1));
        match session.open_pcm(Direction::Playback, &node) {
            Err(Error::UnknownKey(key)) => assert_eq!(key, "foo"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(session.registry().is_empty());
    }

    #[test]
    fn streams_share_the_session_registry() {
        let session = Session::new();
        let a = session.open_pcm(Direction::Playback, &ConfigNode::new()).unwrap();
        let b = session.clone().open_pcm(Direction::Capture, &ConfigNode::new()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(session.registry().len(), 2);
    }

    #[test]
    fn fallible_session_uses_the_build_time_table() {
        let session = Session::try_new().unwrap();
        assert_eq!(session.constraints(), &HwConstraints::default());
        assert!(session.registry().is_empty());
    }

    #[test]
    fn custom_constraints_reach_new_streams() {
        let narrow = HwConstraints {
            channels: Range { min: 1, max: 2 },
            formats: vec![Format::U8],
            ..HwConstraints::default()
        };
        let session = Session::new().with_constraints(narrow.clone());
        let pcm = session.open_pcm(Direction::Capture, &ConfigNode::new()).unwrap();
        assert_eq!(pcm.constraints(), &narrow);

        let u8_stereo = HwParams {
            format: Format::U8,
            channels: 2,
            rate: 48000,
            period_size: 256,
            buffer_size: 1024,
        };
        pcm.hw_params(&u8_stereo).unwrap();
        assert_eq!(pcm.frame_bytes(), 2);
        assert!(matches!(
            pcm.hw_params(&HwParams { format: Format::S16LE, ..u8_stereo }),
            Err(Error::UnsupportedFormat(Format::S16LE))
        ));
        assert!(matches!(
            pcm.hw_params(&HwParams { channels: 4, ..u8_stereo }),
            Err(Error::OutOfRange { param: "channels", .. })
        ));
    }

    #[test]
    fn node_settings_reach_the_stream() {
        let session = Session::new();
        let node = ConfigNode::new()
            .with("debug", ConfigValue::Integer(1))
            .with("auto_advance", ConfigValue::Integer(0));
        let pcm = session.open_pcm(Direction::Playback, &node).unwrap();
        assert_eq!(
            pcm.config(),
            PcmConfig {
                debug: true,
                auto_advance: false
            }
        );
    }

    #[test]
    fn ctl_rejects_pcm_keys() {
        let session = Session::new();
        let node = ConfigNode::new().with("debug", ConfigValue::Integer(1));
        assert!(matches!(session.open_ctl(&node), Err(Error::UnknownKey(_))));
        assert!(session.open_ctl(&ConfigNode::new()).is_ok());
    }
}
