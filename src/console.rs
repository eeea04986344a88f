//! Interactive terminal control.
//!
//! Reads single-letter commands from stdin on a plain thread and forwards
//! them to the scan loop. Commands are case-sensitive: `s` nudges the ROI
//! down while `S` starts recording. Blocking stdin has no clean async story,
//! so the reader owns its own thread and simply dies with the process.

use std::io::BufRead;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ThresholdConfig;
use crate::scanner::ControlMsg;

/// ROI and trigger nudge distance per keypress, px.
const STEP: i64 = 5;

const HELP: &str = "\
commands:
  w / a / s / d   move ROI up / left / down / right
  < / >           move trigger line left / right
  t <value>       fixed threshold cutoff (0-255)
  m <mode>        threshold mode: fixed, otsu, adaptive, dual
  e <us>          exposure time in microseconds
  g <gain>        analogue gain
  S / P / R       start recording / pause / reset counters
  q               quit";

#[derive(Debug, PartialEq)]
enum Action {
    Send(ControlMsg),
    Help,
    Ignore,
    Error(String),
}

fn parse_line(line: &str, threshold: &ThresholdConfig) -> Action {
    match line {
        "" => return Action::Ignore,
        "w" => return Action::Send(ControlMsg::MoveRoi { dx: 0, dy: -STEP }),
        "a" => return Action::Send(ControlMsg::MoveRoi { dx: -STEP, dy: 0 }),
        "s" => return Action::Send(ControlMsg::MoveRoi { dx: 0, dy: STEP }),
        "d" => return Action::Send(ControlMsg::MoveRoi { dx: STEP, dy: 0 }),
        "<" => return Action::Send(ControlMsg::MoveTrigger { dx: -STEP }),
        ">" => return Action::Send(ControlMsg::MoveTrigger { dx: STEP }),
        "S" => return Action::Send(ControlMsg::StartRecording),
        "P" => return Action::Send(ControlMsg::PauseRecording),
        "R" => return Action::Send(ControlMsg::ResetCounters),
        "q" => return Action::Send(ControlMsg::Shutdown),
        "h" | "?" => return Action::Help,
        _ => {}
    }

    let mut parts = line.split_whitespace();
    let cmd = parts.next().unwrap_or("");
    let arg = parts.next();
    match (cmd, arg) {
        ("t", Some(v)) => match v.parse::<u8>() {
            Ok(value) => Action::Send(ControlMsg::SetThreshold(value)),
            Err(_) => Action::Error(format!("threshold must be 0-255, got '{v}'")),
        },
        ("e", Some(v)) => match v.parse::<u32>() {
            Ok(us) => Action::Send(ControlMsg::SetExposure(us)),
            Err(_) => Action::Error(format!("exposure must be a whole number of us, got '{v}'")),
        },
        ("g", Some(v)) => match v.parse::<f32>() {
            Ok(gain) if gain > 0.0 => Action::Send(ControlMsg::SetGain(gain)),
            _ => Action::Error(format!("gain must be a positive number, got '{v}'")),
        },
        ("m", Some(v)) => {
            let mut tc = threshold.clone();
            tc.mode = v.to_string();
            match tc.to_mode() {
                Ok(mode) => Action::Send(ControlMsg::SetThresholdMode(mode)),
                Err(error) => Action::Error(error.to_string()),
            }
        }
        ("t" | "e" | "g" | "m", None) => Action::Error(format!("'{cmd}' needs a value")),
        _ => Action::Error(format!("unknown command '{line}' (h for help)")),
    }
}

/// Owns the stdin side of the control channel.
pub struct Console {
    control: mpsc::Sender<ControlMsg>,
    /// Mode parameters reused when switching threshold modes by name.
    threshold: ThresholdConfig,
}

impl Console {
    pub fn new(control: mpsc::Sender<ControlMsg>, threshold: ThresholdConfig) -> Self {
        Self { control, threshold }
    }

    /// Starts the reader thread. The handle is usually dropped; the thread
    /// ends with the process or when the scan loop goes away.
    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || self.run())
    }

    fn run(self) {
        println!("{HELP}");
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(error) => {
                    warn!(%error, "stdin read failed");
                    break;
                }
            };
            match parse_line(line.trim(), &self.threshold) {
                Action::Send(msg) => {
                    let quitting = msg == ControlMsg::Shutdown;
                    if self.control.blocking_send(msg).is_err() {
                        debug!("scan loop gone, console exiting");
                        break;
                    }
                    if quitting {
                        break;
                    }
                }
                Action::Help => println!("{HELP}"),
                Action::Ignore => {}
                Action::Error(message) => println!("{message}"),
            }
        }
        debug!("console reader stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ThresholdMode;

    fn parse(line: &str) -> Action {
        parse_line(line, &ThresholdConfig::default())
    }

    #[test]
    fn roi_keys_nudge_by_five() {
        assert_eq!(parse("w"), Action::Send(ControlMsg::MoveRoi { dx: 0, dy: -5 }));
        assert_eq!(parse("a"), Action::Send(ControlMsg::MoveRoi { dx: -5, dy: 0 }));
        assert_eq!(parse("s"), Action::Send(ControlMsg::MoveRoi { dx: 0, dy: 5 }));
        assert_eq!(parse("d"), Action::Send(ControlMsg::MoveRoi { dx: 5, dy: 0 }));
    }

    #[test]
    fn case_separates_roi_down_from_record_start() {
        assert_eq!(parse("s"), Action::Send(ControlMsg::MoveRoi { dx: 0, dy: 5 }));
        assert_eq!(parse("S"), Action::Send(ControlMsg::StartRecording));
    }

    #[test]
    fn transport_controls() {
        assert_eq!(parse("P"), Action::Send(ControlMsg::PauseRecording));
        assert_eq!(parse("R"), Action::Send(ControlMsg::ResetCounters));
        assert_eq!(parse("q"), Action::Send(ControlMsg::Shutdown));
        assert_eq!(parse("<"), Action::Send(ControlMsg::MoveTrigger { dx: -5 }));
        assert_eq!(parse(">"), Action::Send(ControlMsg::MoveTrigger { dx: 5 }));
    }

    #[test]
    fn threshold_command_takes_a_byte() {
        assert_eq!(parse("t 120"), Action::Send(ControlMsg::SetThreshold(120)));
        assert!(matches!(parse("t 300"), Action::Error(_)));
        assert!(matches!(parse("t abc"), Action::Error(_)));
        assert!(matches!(parse("t"), Action::Error(_)));
    }

    #[test]
    fn exposure_and_gain_parse_numbers() {
        assert_eq!(parse("e 2500"), Action::Send(ControlMsg::SetExposure(2500)));
        assert_eq!(parse("g 1.5"), Action::Send(ControlMsg::SetGain(1.5)));
        assert!(matches!(parse("e 1.5"), Action::Error(_)));
        assert!(matches!(parse("g 0"), Action::Error(_)));
        assert!(matches!(parse("g -2"), Action::Error(_)));
    }

    #[test]
    fn mode_switch_reuses_configured_parameters() {
        assert_eq!(
            parse("m otsu"),
            Action::Send(ControlMsg::SetThresholdMode(ThresholdMode::Otsu))
        );
        assert_eq!(
            parse("m adaptive"),
            Action::Send(ControlMsg::SetThresholdMode(ThresholdMode::Adaptive {
                block: 13,
                bias: 2
            }))
        );
        assert!(matches!(parse("m sauvola"), Action::Error(_)));
    }

    #[test]
    fn noise_is_ignored_or_reported() {
        assert_eq!(parse(""), Action::Ignore);
        assert_eq!(parse("h"), Action::Help);
        assert!(matches!(parse("x"), Action::Error(_)));
        assert!(matches!(parse("W"), Action::Error(_)));
    }
}
