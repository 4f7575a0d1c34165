mod conda;
mod platform;
mod process;

use serde::{Deserialize, Serialize};

pub use conda::{EnvironmentConfig, EnvironmentService, BASE_ENVIRONMENT};
pub use platform::Platform;
pub use process::{
    split_command_line, CommandOutput, ProcessRunner, ProcessSpec, TokioProcessRunner,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstallInstruction {
    pub channel: String,
    pub packages: Vec<String>,
}

impl InstallInstruction {
    pub fn new<I, P>(channel: impl Into<String>, packages: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            channel: channel.into(),
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn arguments(&self, environment: &str) -> Vec<String> {
        let mut args = vec!["install".to_string(), "-n".into(), environment.into()];
        if !self.channel.trim().is_empty() {
            args.push("-c".into());
            args.push(self.channel.clone());
        }
        args.extend(self.packages.iter().cloned());
        args.push("-y".into());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_instruction_arguments() {
        let instruction = InstallInstruction::new("conda-forge", ["tesseract", "leptonica"]);
        assert_eq!(
            instruction.arguments("ocr"),
            vec!["install", "-n", "ocr", "-c", "conda-forge", "tesseract", "leptonica", "-y"]
        );
        let default_channel = InstallInstruction::new("", ["numpy"]);
        assert_eq!(
            default_channel.arguments("base"),
            vec!["install", "-n", "base", "numpy", "-y"]
        );
    }
}
