use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    InvalidArgs,
    ScanFailed,
    ProviderFailed,
    RemediationFailed,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::InvalidArgs => 2,
            ExitCode::ScanFailed => 10,
            ExitCode::ProviderFailed => 20,
            ExitCode::RemediationFailed => 30,
        }
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.err.as_ref())
    }
}

pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(exit) = err.downcast_ref::<ExitError>() {
        return exit.code.as_i32();
    }
    ExitCode::ScanFailed.as_i32()
}

pub fn invalid_args(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, anyhow::anyhow!(message.into())).into()
}

pub fn invalid_args_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, err).into()
}

pub fn provider_failed(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::ProviderFailed, anyhow::anyhow!(message.into())).into()
}

pub fn remediation_failed(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(
        ExitCode::RemediationFailed,
        anyhow::anyhow!(message.into()),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn exit_code_survives_added_context() {
        let err = Err::<(), _>(provider_failed("aws not found"))
            .context("バケット一覧の取得に失敗しました")
            .unwrap_err();
        assert_eq!(exit_code(&err), 20);
    }

    #[test]
    fn plain_errors_map_to_scan_failed() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(exit_code(&err), 10);
        assert_eq!(exit_code(&invalid_args("bad")), 2);
        assert_eq!(exit_code(&remediation_failed("nope")), 30);
    }
}
