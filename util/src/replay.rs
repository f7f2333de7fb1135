//! # Sensor replay scripts
//!
//! A replay script feeds recorded sensor messages into an executable as if they were arriving live.
//! Each entry is a session time in seconds followed by a JSON encoded `SensorMsg`:
//!
//! ```text
//! 0.0: {"Scan": {"angle_min": -2.35, ...}};
//! 0.1: {"Odom": {"pose": {...}, "twist": {...}}};
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use regex::RegexBuilder;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Internal
use comms_if::eqpt::{SensorMsg, SensorMsgParseError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A message which is scripted to arrive at a specific time.
struct ScriptedMsg {
    /// The session time at which the message is delivered
    deliver_time_s: f64,

    msg: SensorMsg,
}

/// A sensor replay script.
///
/// After loading use `.get_pending` to acquire the messages which should have arrived by now.
pub struct SensorScript {
    script_path: PathBuf,
    msgs: VecDeque<ScriptedMsg>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0:?}")]
    ScriptNotFound(PathBuf),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error("Script contains an invalid timestamp: {0}. Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid message at {0} s: {1}")]
    InvalidMsg(f64, SensorMsgParseError),

    #[error("Script entries must be in time order, found {1} s after {0} s")]
    OutOfOrder(f64, f64),
}

/// Messages returned from a script.
#[derive(Debug)]
pub enum PendingMsgs {
    None,
    Some(Vec<SensorMsg>),
    EndOfScript,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SensorScript {
    /// Load a script from the given path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let path = script_path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(path));
        }

        let script = fs::read_to_string(&path).map_err(ScriptError::ScriptLoadError)?;

        let mut s = Self::from_str(&script)?;
        s.script_path = path;
        Ok(s)
    }

    /// Parse a script from a string.
    pub fn from_str(script: &str) -> Result<Self, ScriptError> {
        let mut msgs: VecDeque<ScriptedMsg> = VecDeque::new();

        // Entries are `<time>: <json>;`, the JSON payload may span lines but never contains a `;`
        let re = RegexBuilder::new(r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);")
            .multi_line(true)
            .build()
            .map_err(|_| ScriptError::ScriptEmpty)?;

        for cap in re.captures_iter(script) {
            let time_str = cap.get(1).map_or("", |m| m.as_str());
            let deliver_time_s: f64 = time_str
                .parse()
                .map_err(|e| ScriptError::InvalidTimestamp(format!("{} ({})", time_str, e)))?;

            let msg = SensorMsg::from_json(cap.get(3).map_or("", |m| m.as_str()))
                .map_err(|e| ScriptError::InvalidMsg(deliver_time_s, e))?;

            if let Some(last) = msgs.back() {
                if deliver_time_s < last.deliver_time_s {
                    return Err(ScriptError::OutOfOrder(last.deliver_time_s, deliver_time_s));
                }
            }

            msgs.push_back(ScriptedMsg {
                deliver_time_s,
                msg,
            });
        }

        if msgs.is_empty() {
            return Err(ScriptError::ScriptEmpty);
        }

        Ok(SensorScript {
            script_path: PathBuf::new(),
            msgs,
        })
    }

    /// Return the messages due by `current_time_s`.
    pub fn get_pending(&mut self, current_time_s: f64) -> PendingMsgs {
        if self.msgs.is_empty() {
            return PendingMsgs::EndOfScript;
        }

        let mut msg_vec = vec![];

        while let Some(front) = self.msgs.front() {
            if front.deliver_time_s > current_time_s {
                break;
            }
            if let Some(m) = self.msgs.pop_front() {
                msg_vec.push(m.msg);
            }
        }

        if msg_vec.is_empty() {
            PendingMsgs::None
        } else {
            PendingMsgs::Some(msg_vec)
        }
    }

    /// Get the number of messages remaining in the script
    pub fn get_num_msgs(&self) -> usize {
        self.msgs.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.msgs.back() {
            Some(m) => m.deliver_time_s,
            None => 0f64,
        }
    }

    /// Path the script was loaded from, empty if parsed from a string.
    pub fn path(&self) -> &Path {
        &self.script_path
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SCRIPT: &str = r#"
        0.0: {"Scan": {"angle_min": -1.0, "angle_max": 1.0, "angle_increment": 1.0,
                       "range_min": 0.0, "range_max": 30.0, "ranges": [1.0, 2.0, 3.0]}};
        0.5: {"Odom": {"pose": {"position": [0.0, 0.0, 0.0], "orientation": [0.0, 0.0, 0.0, 1.0]},
                       "twist": {"linear": [1.0, 0.0, 0.0], "angular": [0.0, 0.0, 0.0]}}};
        0.5: {"Odom": {"pose": {"position": [0.1, 0.0, 0.0], "orientation": [0.0, 0.0, 0.0, 1.0]},
                       "twist": {"linear": [1.0, 0.0, 0.0], "angular": [0.0, 0.0, 0.0]}}};
    "#;

    #[test]
    fn test_pending_msgs() {
        let mut script = SensorScript::from_str(SCRIPT).unwrap();

        assert_eq!(script.get_num_msgs(), 3);
        assert_eq!(script.get_duration(), 0.5);

        match script.get_pending(0.1) {
            PendingMsgs::Some(v) => assert_eq!(v.len(), 1),
            p => panic!("Expected one message, got {:?}", p),
        }
        assert!(matches!(script.get_pending(0.2), PendingMsgs::None));
        match script.get_pending(1.0) {
            PendingMsgs::Some(v) => assert_eq!(v.len(), 2),
            p => panic!("Expected two messages, got {:?}", p),
        }
        assert!(matches!(script.get_pending(2.0), PendingMsgs::EndOfScript));
    }

    #[test]
    fn test_bad_scripts() {
        assert!(matches!(
            SensorScript::from_str("nothing here"),
            Err(ScriptError::ScriptEmpty)
        ));
        assert!(matches!(
            SensorScript::from_str("1.0: {\"Imu\": {}};"),
            Err(ScriptError::InvalidMsg(_, _))
        ));
        assert!(matches!(
            SensorScript::new("/definitely/not/a/script.txt"),
            Err(ScriptError::ScriptNotFound(_))
        ));
    }
}
