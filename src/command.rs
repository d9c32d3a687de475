//! Typed control intents and their wire encoding
//!
//! The robot accepts a small closed vocabulary of bracketed command strings
//! (`[volume:50]`, `[arm:left:up]`, …). Every intent is validated before
//! encoding; nothing invalid ever reaches the wire.

use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Drive direction for the wheel base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MoveDirection {
    Forward,
    Backward,
    Left,
    Right,
}

impl MoveDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveDirection::Forward => "forward",
            MoveDirection::Backward => "backward",
            MoveDirection::Left => "left",
            MoveDirection::Right => "right",
        }
    }
}

impl FromStr for MoveDirection {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(MoveDirection::Forward),
            "backward" => Ok(MoveDirection::Backward),
            "left" => Ok(MoveDirection::Left),
            "right" => Ok(MoveDirection::Right),
            other => Err(invalid("direction", other)),
        }
    }
}

/// Gaze direction for the head/eyes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LookDirection {
    Up,
    Down,
    Left,
    Right,
    Center,
}

impl LookDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookDirection::Up => "up",
            LookDirection::Down => "down",
            LookDirection::Left => "left",
            LookDirection::Right => "right",
            LookDirection::Center => "center",
        }
    }
}

impl FromStr for LookDirection {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(LookDirection::Up),
            "down" => Ok(LookDirection::Down),
            "left" => Ok(LookDirection::Left),
            "right" => Ok(LookDirection::Right),
            "center" => Ok(LookDirection::Center),
            other => Err(invalid("direction", other)),
        }
    }
}

/// Which arm a pose applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArmSide {
    Left,
    Right,
}

impl ArmSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArmSide::Left => "left",
            ArmSide::Right => "right",
        }
    }
}

impl FromStr for ArmSide {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "left" => Ok(ArmSide::Left),
            "right" => Ok(ArmSide::Right),
            other => Err(invalid("side", other)),
        }
    }
}

/// Target pose for an arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArmPosition {
    Up,
    Down,
}

impl ArmPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArmPosition::Up => "up",
            ArmPosition::Down => "down",
        }
    }
}

impl FromStr for ArmPosition {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(ArmPosition::Up),
            "down" => Ok(ArmPosition::Down),
            other => Err(invalid("position", other)),
        }
    }
}

/// Facial emotion the robot can display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    Neutral,
    Excited,
    Sleepy,
    Confused,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprised => "surprised",
            Emotion::Neutral => "neutral",
            Emotion::Excited => "excited",
            Emotion::Sleepy => "sleepy",
            Emotion::Confused => "confused",
        }
    }
}

impl FromStr for Emotion {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "happy" => Ok(Emotion::Happy),
            "sad" => Ok(Emotion::Sad),
            "angry" => Ok(Emotion::Angry),
            "surprised" => Ok(Emotion::Surprised),
            "neutral" => Ok(Emotion::Neutral),
            "excited" => Ok(Emotion::Excited),
            "sleepy" => Ok(Emotion::Sleepy),
            "confused" => Ok(Emotion::Confused),
            other => Err(invalid("emotion", other)),
        }
    }
}

/// A typed, pre-encoding robot control intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandIntent {
    /// Speaker volume, 0–100
    Volume(i32),
    /// Mute/unmute the speaker
    Mute(bool),
    /// Enable/disable the camera
    Camera(bool),
    /// Drive the wheel base
    Move(MoveDirection),
    /// Point the gaze
    Look(LookDirection),
    /// Pose one arm
    Arm {
        side: ArmSide,
        position: ArmPosition,
    },
    /// Display an emotion
    Emotion(Emotion),
}

impl CommandIntent {
    /// Command key as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            CommandIntent::Volume(_) => "volume",
            CommandIntent::Mute(_) => "mute",
            CommandIntent::Camera(_) => "camera",
            CommandIntent::Move(_) => "move",
            CommandIntent::Look(_) => "look",
            CommandIntent::Arm { .. } => "arm",
            CommandIntent::Emotion(_) => "emotion",
        }
    }

    /// Encode into the bracketed wire payload
    ///
    /// Validation happens here, before any network call. Out-of-range
    /// volume is rejected, never clamped.
    pub fn encode(&self) -> Result<String> {
        match self {
            CommandIntent::Volume(v) => {
                if !(0..=100).contains(v) {
                    return Err(invalid("volume", &v.to_string()));
                }
                Ok(format!("[volume:{v}]"))
            }
            CommandIntent::Mute(on) => Ok(format!("[mute:{on}]")),
            CommandIntent::Camera(on) => Ok(format!("[camera:{on}]")),
            CommandIntent::Move(dir) => Ok(format!("[move:{}]", dir.as_str())),
            CommandIntent::Look(dir) => Ok(format!("[look:{}]", dir.as_str())),
            CommandIntent::Arm { side, position } => {
                Ok(format!("[arm:{}:{}]", side.as_str(), position.as_str()))
            }
            CommandIntent::Emotion(emotion) => Ok(format!("[emotion:{}]", emotion.as_str())),
        }
    }
}

/// A remote-chat event as the backend expects it
///
/// Published to the device's `events/remote-chat` topic; the backend
/// answers on `commands/remote_chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChatEvent {
    pub event_id: String,
    pub command: String,
    pub speech: String,
    pub backend: String,
    pub module_id: String,
    pub content_id: String,
}

impl RemoteChatEvent {
    /// Build a chat event for a line of speech
    ///
    /// Empty speech opens a session ("prompt"); non-empty continues it.
    pub fn for_speech(speech: impl Into<String>) -> Self {
        let speech = speech.into();
        Self {
            event_id: format!("evt-{}", uuid::Uuid::new_v4()),
            command: if speech.is_empty() { "prompt" } else { "continue" }.to_string(),
            speech,
            backend: "router".to_string(),
            module_id: "OPENMOXIE_CHAT".to_string(),
            content_id: "default".to_string(),
        }
    }
}

fn invalid(parameter: &str, value: &str) -> ControlError {
    ControlError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_encodes_across_range() {
        for v in 0..=100 {
            let payload = CommandIntent::Volume(v).encode().unwrap();
            assert_eq!(payload, format!("[volume:{v}]"));
        }
    }

    #[test]
    fn test_volume_out_of_range_rejected() {
        for v in [-1, -100, 101, 255, i32::MAX, i32::MIN] {
            let err = CommandIntent::Volume(v).encode().unwrap_err();
            match err {
                ControlError::InvalidParameter { parameter, value } => {
                    assert_eq!(parameter, "volume");
                    assert_eq!(value, v.to_string());
                }
                other => panic!("expected InvalidParameter, got {other}"),
            }
        }
    }

    #[test]
    fn test_boolean_commands() {
        assert_eq!(CommandIntent::Mute(true).encode().unwrap(), "[mute:true]");
        assert_eq!(CommandIntent::Mute(false).encode().unwrap(), "[mute:false]");
        assert_eq!(
            CommandIntent::Camera(true).encode().unwrap(),
            "[camera:true]"
        );
    }

    #[test]
    fn test_move_and_look() {
        assert_eq!(
            CommandIntent::Move(MoveDirection::Forward).encode().unwrap(),
            "[move:forward]"
        );
        assert_eq!(
            CommandIntent::Look(LookDirection::Center).encode().unwrap(),
            "[look:center]"
        );
    }

    #[test]
    fn test_arm_two_part_payload() {
        assert_eq!(
            CommandIntent::Arm {
                side: ArmSide::Left,
                position: ArmPosition::Up,
            }
            .encode()
            .unwrap(),
            "[arm:left:up]"
        );
        assert_eq!(
            CommandIntent::Arm {
                side: ArmSide::Right,
                position: ArmPosition::Down,
            }
            .encode()
            .unwrap(),
            "[arm:right:down]"
        );
    }

    #[test]
    fn test_all_emotions_encode() {
        let cases = [
            (Emotion::Happy, "[emotion:happy]"),
            (Emotion::Sad, "[emotion:sad]"),
            (Emotion::Angry, "[emotion:angry]"),
            (Emotion::Surprised, "[emotion:surprised]"),
            (Emotion::Neutral, "[emotion:neutral]"),
            (Emotion::Excited, "[emotion:excited]"),
            (Emotion::Sleepy, "[emotion:sleepy]"),
            (Emotion::Confused, "[emotion:confused]"),
        ];
        for (emotion, expected) in cases {
            assert_eq!(CommandIntent::Emotion(emotion).encode().unwrap(), expected);
        }
    }

    #[test]
    fn test_from_str_accepts_vocabulary() {
        assert_eq!(
            "forward".parse::<MoveDirection>().unwrap(),
            MoveDirection::Forward
        );
        assert_eq!("center".parse::<LookDirection>().unwrap(), LookDirection::Center);
        assert_eq!("left".parse::<ArmSide>().unwrap(), ArmSide::Left);
        assert_eq!("down".parse::<ArmPosition>().unwrap(), ArmPosition::Down);
        assert_eq!("sleepy".parse::<Emotion>().unwrap(), Emotion::Sleepy);
    }

    #[test]
    fn test_from_str_rejects_unknown_values() {
        assert!("sideways".parse::<MoveDirection>().is_err());
        assert!("FORWARD".parse::<MoveDirection>().is_err());
        assert!("middle".parse::<ArmSide>().is_err());
        assert!("ecstatic".parse::<Emotion>().is_err());
        assert!("".parse::<LookDirection>().is_err());
    }

    #[test]
    fn test_intent_kind() {
        assert_eq!(CommandIntent::Volume(50).kind(), "volume");
        assert_eq!(
            CommandIntent::Arm {
                side: ArmSide::Left,
                position: ArmPosition::Up
            }
            .kind(),
            "arm"
        );
    }

    #[test]
    fn test_remote_chat_event_prompt_vs_continue() {
        let prompt = RemoteChatEvent::for_speech("");
        assert_eq!(prompt.command, "prompt");
        assert!(prompt.event_id.starts_with("evt-"));

        let cont = RemoteChatEvent::for_speech("hello moxie");
        assert_eq!(cont.command, "continue");
        assert_eq!(cont.speech, "hello moxie");
        assert_eq!(cont.backend, "router");
    }

    #[test]
    fn test_remote_chat_event_wire_keys() {
        let event = RemoteChatEvent::for_speech("hi");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_id\""));
        assert!(json.contains("\"module_id\":\"OPENMOXIE_CHAT\""));
        assert!(json.contains("\"content_id\":\"default\""));
    }
}
