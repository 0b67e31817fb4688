//! PulseAudio / PipeWire device backend
//!
//! Talks to the sound server through the `pactl` command line tool, which
//! both PulseAudio and pipewire-pulse provide.
//!
//! Requires: pactl 15 or newer (for `--format=json`)

use std::process::{Command, Output};

use serde::Deserialize;
use tracing::debug;

use super::device::{
    ActivationError, DeviceActivator, DeviceDirectory, DeviceError, DeviceId, DeviceInfo,
};

#[derive(Debug, Deserialize)]
struct PactlSink {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

/// Parse `pactl --format=json list sinks`
fn parse_sinks(json: &str) -> Result<Vec<DeviceInfo>, DeviceError> {
    let sinks: Vec<PactlSink> = serde_json::from_str(json)
        .map_err(|e| DeviceError::QueryFailed(format!("unexpected pactl output: {}", e)))?;

    Ok(sinks
        .into_iter()
        .map(|sink| DeviceInfo {
            display_name: sink.description.unwrap_or_else(|| sink.name.clone()),
            id: DeviceId::new(sink.name),
        })
        .collect())
}

/// Map a failed `set-default-sink` onto an activation error
fn classify_failure(stderr: &str) -> ActivationError {
    let message = stderr.trim().to_string();
    if message.contains("No such entity") {
        ActivationError::NotFound(message)
    } else if message.is_empty() {
        ActivationError::Failed("pactl exited with an error".to_string())
    } else {
        ActivationError::Failed(message)
    }
}

/// Device backend driving `pactl`
#[derive(Debug, Clone)]
pub struct PactlBackend {
    program: String,
}

impl PactlBackend {
    pub fn new() -> Self {
        Self::with_program("pactl")
    }

    /// Use a different executable, e.g. a wrapper script
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> std::io::Result<Output> {
        debug!(program = %self.program, ?args, "running");
        Command::new(&self.program).args(args).output()
    }

    fn query(&self, args: &[&str]) -> Result<String, DeviceError> {
        let output = self
            .run(args)
            .map_err(|e| DeviceError::QueryFailed(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(DeviceError::QueryFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for PactlBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDirectory for PactlBackend {
    fn list_output_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        parse_sinks(&self.query(&["--format=json", "list", "sinks"])?)
    }

    fn current_default(&self) -> Result<DeviceId, DeviceError> {
        let name = self.query(&["get-default-sink"])?;
        if name.is_empty() {
            return Err(DeviceError::QueryFailed("no default sink".to_string()));
        }
        Ok(DeviceId::new(name))
    }
}

impl DeviceActivator for PactlBackend {
    fn set_default(&self, device: &DeviceId) -> Result<(), ActivationError> {
        let output = self
            .run(&["set-default-sink", device.as_str()])
            .map_err(|e| ActivationError::Failed(format!("{}: {}", self.program, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sinks() {
        let json = r#"[
            {"index":48,"state":"RUNNING","name":"alsa_output.pci-0000_00_1f.3.analog-stereo",
             "description":"Built-in Audio Analog Stereo","driver":"PipeWire"},
            {"index":62,"state":"SUSPENDED","name":"bluez_output.AA_BB.1"}
        ]"#;
        let devices = parse_sinks(json).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(
            devices[0].id.as_str(),
            "alsa_output.pci-0000_00_1f.3.analog-stereo"
        );
        assert_eq!(devices[0].display_name, "Built-in Audio Analog Stereo");
        assert_eq!(devices[1].display_name, "bluez_output.AA_BB.1");
    }

    #[test]
    fn test_parse_sinks_garbage() {
        assert!(matches!(
            parse_sinks("Sink #48"),
            Err(DeviceError::QueryFailed(_))
        ));
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("Failure: No such entity\n"),
            ActivationError::NotFound(_)
        ));
        assert_eq!(
            classify_failure("Connection failure: Connection refused"),
            ActivationError::Failed("Connection failure: Connection refused".into())
        );
        assert!(matches!(classify_failure(""), ActivationError::Failed(_)));
    }

    #[test]
    fn test_missing_program_is_reported() {
        let backend = PactlBackend::with_program("/nonexistent/pactl");
        assert!(matches!(
            backend.current_default(),
            Err(DeviceError::QueryFailed(_))
        ));
        assert!(matches!(
            backend.set_default(&DeviceId::new("x")),
            Err(ActivationError::Failed(_))
        ));
    }
}
