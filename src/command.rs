//! Named zero-argument client commands.

use tracing::{debug, info};

use crate::accessor::HardwareAccessor;
use crate::error::{AppResult, DaqError};

/// Client command mapped to an ordered list of accessor `invoke` steps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandBinding {
    name: String,
    steps: Vec<String>,
}

impl CommandBinding {
    /// Command `name` running `steps` in order.
    pub fn new<I, S>(name: impl Into<String>, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    /// Client-visible name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hardware commands, in invocation order
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub(crate) fn check(&self) -> AppResult<()> {
        if self.steps.is_empty() {
            return Err(DaqError::InvalidBinding {
                attribute: self.name.clone(),
                reason: "command has no steps".into(),
            });
        }
        Ok(())
    }

    /// Invoke every step; stops at the first failure.
    pub async fn run(&self, accessor: &dyn HardwareAccessor) -> AppResult<()> {
        for step in &self.steps {
            debug!(command = %self.name, step = %step, "invoking");
            accessor
                .invoke(step)
                .await
                .map_err(|e| DaqError::hardware(step.as_str(), e))?;
        }
        info!(command = %self.name, "command completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{AccessorCall, SimulatedDetector};

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let hw = SimulatedDetector::jungfrau(1, 1);
        let stop = CommandBinding::new("stop_acquisition", ["stop", "clearbusy"]);

        stop.run(&hw).await.unwrap();
        assert_eq!(
            hw.calls(),
            vec![
                AccessorCall::Invoke("stop".into()),
                AccessorCall::Invoke("clearbusy".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_step_stops_sequence() {
        let hw = SimulatedDetector::jungfrau(1, 1);
        hw.fail("stop");
        let stop = CommandBinding::new("stop_acquisition", ["stop", "clearbusy"]);

        let err = stop.run(&hw).await.unwrap_err();
        assert!(matches!(err, DaqError::HardwareAccess { ref command, .. } if command == "stop"));
        assert_eq!(hw.count_calls(|c| matches!(c, AccessorCall::Invoke(_))), 1);
    }

    #[test]
    fn test_empty_command_rejected() {
        let empty: [&str; 0] = [];
        assert!(CommandBinding::new("noop", empty).check().is_err());
    }
}
