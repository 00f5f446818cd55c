use crate::device::DeviceError;
use crate::safety::Rejection;
use crate::signal::DesignError;
use serde::Serialize;
use thiserror::Error;

/// The kind of failure reported back to whoever asked for a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidParameter,
    UnstableFilter,
    GainOutOfRange,
    VoltageOutOfRange,
    OffsetOutOfRange,
    TooManyStages,
    DeviceUnresponsive,
    AckTimeout,
}

/// Why a channel request did not take effect. The channel's applied
/// configuration is unchanged whenever one of these is returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("unstable filter: {0}")]
    UnstableFilter(String),
    #[error("gain out of range: {0}")]
    GainOutOfRange(String),
    #[error("voltage out of range: {0}")]
    VoltageOutOfRange(String),
    #[error("offset out of range: {0}")]
    OffsetOutOfRange(String),
    #[error("{0} stages requested, only 2 fit a channel")]
    TooManyStages(usize),
    #[error("device unresponsive: {0}")]
    DeviceUnresponsive(String),
    #[error("device did not acknowledge in time")]
    AckTimeout,
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            ControlError::UnstableFilter(_) => ErrorKind::UnstableFilter,
            ControlError::GainOutOfRange(_) => ErrorKind::GainOutOfRange,
            ControlError::VoltageOutOfRange(_) => ErrorKind::VoltageOutOfRange,
            ControlError::OffsetOutOfRange(_) => ErrorKind::OffsetOutOfRange,
            ControlError::TooManyStages(_) => ErrorKind::TooManyStages,
            ControlError::DeviceUnresponsive(_) => ErrorKind::DeviceUnresponsive,
            ControlError::AckTimeout => ErrorKind::AckTimeout,
        }
    }
}

impl From<DesignError> for ControlError {
    fn from(e: DesignError) -> Self {
        let message = e.to_string();
        match e {
            DesignError::InvalidParameter(_) => ControlError::InvalidParameter(message),
            DesignError::UnstableFilter(_) => ControlError::UnstableFilter(message),
            DesignError::GainOutOfRange { .. } => ControlError::GainOutOfRange(message),
        }
    }
}

impl From<Rejection> for ControlError {
    fn from(e: Rejection) -> Self {
        let message = e.to_string();
        match e {
            Rejection::VoltageOutOfRange { .. } => ControlError::VoltageOutOfRange(message),
            Rejection::OffsetOutOfRange { .. } => ControlError::OffsetOutOfRange(message),
            Rejection::GainOutOfRange { .. } => ControlError::GainOutOfRange(message),
            Rejection::UnstableFilter { .. } => ControlError::UnstableFilter(message),
            Rejection::TooManyStages { stages } => ControlError::TooManyStages(stages),
        }
    }
}

impl From<DeviceError> for ControlError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::AckTimeout => ControlError::AckTimeout,
            other => ControlError::DeviceUnresponsive(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Range;

    #[test]
    fn rejections_keep_their_kind() {
        let e: ControlError = Rejection::VoltageOutOfRange {
            what: "output limits",
            requested: Range::new(-20.0, 5.0),
            permitted: Range::symmetric(10.0),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::VoltageOutOfRange);
        assert!(e.to_string().contains("[-20, 5]"));
    }

    #[test]
    fn device_refusal_is_unresponsive() {
        let e: ControlError = DeviceError::Rejected {
            path: "/ch/0/run".into(),
            message: "busy".into(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::DeviceUnresponsive);
        assert!(e.to_string().contains("busy"));
        assert_eq!(ControlError::from(DeviceError::AckTimeout), ControlError::AckTimeout);
    }

    #[test]
    fn kinds_serialize_by_name() {
        let json = serde_json::to_string(&ErrorKind::AckTimeout).expect("encode");
        assert_eq!(json, "\"AckTimeout\"");
    }
}
