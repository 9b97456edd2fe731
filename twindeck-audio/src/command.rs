//! Commands accepted by the mixer and events it emits

use std::fmt;
use std::str::FromStr;

use crate::buffer::AudioSource;
use crate::deck::{DeckId, PlaybackState};
use crate::error::UnknownControl;
use crate::tone::EqBand;

/// Every mutating mixer operation as a value
#[derive(Debug, Clone)]
pub enum Command {
    Load(DeckId, AudioSource),
    Play(DeckId),
    Pause(DeckId),
    Stop(DeckId),
    Seek(DeckId, f64),
    SetRate(DeckId, f64),
    SetEq(DeckId, EqBand, f64),
    SetGain(DeckId, f64),
    SetBpm(DeckId, Option<f64>),
    /// Match `follower`'s tempo to the other deck using the stored BPMs
    Sync(DeckId),
    SetCrossfader(f64),
    SetMasterVolume(f64),
    StartRecording,
    StopRecording,
}

impl Command {
    /// Command that sets a continuous control to `value`
    pub fn set(control: ControlId, value: f64) -> Command {
        match control {
            ControlId::Eq(deck, band) => Command::SetEq(deck, band, value),
            ControlId::Rate(deck) => Command::SetRate(deck, value),
            ControlId::Gain(deck) => Command::SetGain(deck, value),
            ControlId::Crossfader => Command::SetCrossfader(value),
            ControlId::MasterVolume => Command::SetMasterVolume(value),
        }
    }
}

/// Events sent from the mixer to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum MixerEvent {
    TrackLoaded {
        deck: DeckId,
        name: Option<String>,
        duration: f64,
    },
    LoadFailed {
        deck: DeckId,
        error: String,
    },
    PlayStateChanged {
        deck: DeckId,
        state: PlaybackState,
    },
    /// Playback position moved; `position` is the clamped target in seconds
    Seeked {
        deck: DeckId,
        position: f64,
    },
    BpmChanged {
        deck: DeckId,
        bpm: Option<f64>,
    },
    /// A continuous control was written; `value` is after clamping
    ControlChanged {
        control: ControlId,
        value: f64,
    },
    RecordingStarted,
    RecordingStopped {
        duration: f64,
    },
    Disposed,
}

/// Continuous controls addressable by string id, e.g. `deckA.eq.low`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlId {
    Eq(DeckId, EqBand),
    Rate(DeckId),
    Gain(DeckId),
    Crossfader,
    MasterVolume,
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlId::Eq(deck, band) => write!(f, "deck{}.eq.{}", deck, band),
            ControlId::Rate(deck) => write!(f, "deck{}.rate", deck),
            ControlId::Gain(deck) => write!(f, "deck{}.gain", deck),
            ControlId::Crossfader => f.write_str("crossfader"),
            ControlId::MasterVolume => f.write_str("master.volume"),
        }
    }
}

impl FromStr for ControlId {
    type Err = UnknownControl;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownControl(s.to_string());

        match s {
            "crossfader" => return Ok(ControlId::Crossfader),
            "master.volume" => return Ok(ControlId::MasterVolume),
            _ => {}
        }

        let rest = s.strip_prefix("deck").ok_or_else(unknown)?;
        let (deck, param) = rest.split_once('.').ok_or_else(unknown)?;
        let deck: DeckId = deck.parse().map_err(|_| unknown())?;

        match param.split_once('.') {
            Some(("eq", band)) => {
                let band: EqBand = band.parse().map_err(|_| unknown())?;
                Ok(ControlId::Eq(deck, band))
            }
            None if param == "rate" => Ok(ControlId::Rate(deck)),
            None if param == "gain" => Ok(ControlId::Gain(deck)),
            _ => Err(unknown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_ids() {
        assert_eq!(
            "deckA.eq.low".parse::<ControlId>(),
            Ok(ControlId::Eq(DeckId::A, EqBand::Low))
        );
        assert_eq!(
            "deckB.rate".parse::<ControlId>(),
            Ok(ControlId::Rate(DeckId::B))
        );
        assert_eq!("crossfader".parse::<ControlId>(), Ok(ControlId::Crossfader));
        assert_eq!(
            "master.volume".parse::<ControlId>(),
            Ok(ControlId::MasterVolume)
        );
    }

    #[test]
    fn test_reject_unknown_ids() {
        for bad in ["deckC.rate", "deckA.eq.sub", "deckA", "deckA.pitch", "eq.low", ""] {
            assert!(bad.parse::<ControlId>().is_err(), "Accepted {:?}", bad);
        }
    }

    #[test]
    fn test_display_round_trips() {
        let all = [
            ControlId::Eq(DeckId::B, EqBand::High),
            ControlId::Rate(DeckId::A),
            ControlId::Gain(DeckId::B),
            ControlId::Crossfader,
            ControlId::MasterVolume,
        ];
        for id in all {
            assert_eq!(id.to_string().parse::<ControlId>(), Ok(id));
        }
    }

    #[test]
    fn test_set_builds_matching_command() {
        let cmd = Command::set("deckA.eq.mid".parse().unwrap(), -6.0);
        assert!(matches!(cmd, Command::SetEq(DeckId::A, EqBand::Mid, v) if v == -6.0));
    }
}
