//! Inbound saga events reported by participants.

use chrono::{DateTime, Utc};
use common::GlobalTxId;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// Fields carried by every inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    pub global_tx_id: GlobalTxId,
    pub service_name: String,
    pub instance_id: String,
    #[serde(default = "Utc::now")]
    pub create_time: DateTime<Utc>,
}

impl EventHeader {
    /// Creates a header stamped with the current time.
    pub fn new(
        global_tx_id: impl Into<GlobalTxId>,
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            global_tx_id: global_tx_id.into(),
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            create_time: Utc::now(),
        }
    }
}

/// Events a participant reports about a saga and its sub-transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    SagaStarted(SagaStartedData),
    SagaEnded(SagaSignalData),
    SagaAborted(SagaAbortedData),
    SagaTimeout(SagaSignalData),
    TxStarted(TxStartedData),
    TxEnded(TxData),
    TxAborted(TxPayloadData),
    TxCompensateAckSucceeded(TxData),
    TxCompensateAckFailed(TxPayloadData),
    CompensateAckTimeout(TxPayloadData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStartedData {
    #[serde(flatten)]
    pub header: EventHeader,
    /// Saga deadline in seconds; 0 or less means none.
    #[serde(default)]
    pub timeout_seconds: i64,
}

impl SagaStartedData {
    /// Absolute saga deadline, or `None` when the saga has no timeout.
    ///
    /// Fails when the timeout does not fit in a timestamp.
    pub fn expiration_time(&self) -> Result<Option<DateTime<Utc>>> {
        if self.timeout_seconds <= 0 {
            return Ok(None);
        }
        chrono::Duration::try_seconds(self.timeout_seconds)
            .and_then(|timeout| self.header.create_time.checked_add_signed(timeout))
            .map(Some)
            .ok_or_else(|| {
                SagaError::InvalidEvent(format!(
                    "timeout_seconds {} is out of range",
                    self.timeout_seconds
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaSignalData {
    #[serde(flatten)]
    pub header: EventHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaAbortedData {
    #[serde(flatten)]
    pub header: EventHeader,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Data for `TxStarted`, including how to compensate the sub-transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStartedData {
    #[serde(flatten)]
    pub header: EventHeader,
    pub local_tx_id: String,
    #[serde(default)]
    pub parent_tx_id: Option<String>,
    #[serde(default)]
    pub compensation_method: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub reverse_retries: i32,
    #[serde(default)]
    pub reverse_timeout_seconds: i64,
    #[serde(default)]
    pub retry_delay_millis: u64,
}

impl TxStartedData {
    pub fn new(header: EventHeader, local_tx_id: impl Into<String>) -> Self {
        Self {
            header,
            local_tx_id: local_tx_id.into(),
            parent_tx_id: None,
            compensation_method: String::new(),
            payload: Vec::new(),
            reverse_retries: 0,
            reverse_timeout_seconds: 0,
            retry_delay_millis: 0,
        }
    }

    pub fn parent_tx_id(mut self, parent_tx_id: impl Into<String>) -> Self {
        self.parent_tx_id = Some(parent_tx_id.into());
        self
    }

    pub fn compensation_method(mut self, method: impl Into<String>) -> Self {
        self.compensation_method = method.into();
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn reverse_retries(mut self, retries: i32) -> Self {
        self.reverse_retries = retries;
        self
    }

    pub fn reverse_timeout_seconds(mut self, seconds: i64) -> Self {
        self.reverse_timeout_seconds = seconds;
        self
    }

    pub fn retry_delay_millis(mut self, millis: u64) -> Self {
        self.retry_delay_millis = millis;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxData {
    #[serde(flatten)]
    pub header: EventHeader,
    pub local_tx_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPayloadData {
    #[serde(flatten)]
    pub header: EventHeader,
    pub local_tx_id: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl SagaEvent {
    /// Returns the common header of the event.
    pub fn header(&self) -> &EventHeader {
        match self {
            SagaEvent::SagaStarted(data) => &data.header,
            SagaEvent::SagaEnded(data) | SagaEvent::SagaTimeout(data) => &data.header,
            SagaEvent::SagaAborted(data) => &data.header,
            SagaEvent::TxStarted(data) => &data.header,
            SagaEvent::TxEnded(data) | SagaEvent::TxCompensateAckSucceeded(data) => &data.header,
            SagaEvent::TxAborted(data)
            | SagaEvent::TxCompensateAckFailed(data)
            | SagaEvent::CompensateAckTimeout(data) => &data.header,
        }
    }

    /// Returns the global transaction this event belongs to.
    pub fn global_tx_id(&self) -> &GlobalTxId {
        &self.header().global_tx_id
    }

    /// Returns the sub-transaction this event refers to, if any.
    pub fn local_tx_id(&self) -> Option<&str> {
        match self {
            SagaEvent::TxStarted(data) => Some(&data.local_tx_id),
            SagaEvent::TxEnded(data) | SagaEvent::TxCompensateAckSucceeded(data) => {
                Some(&data.local_tx_id)
            }
            SagaEvent::TxAborted(data)
            | SagaEvent::TxCompensateAckFailed(data)
            | SagaEvent::CompensateAckTimeout(data) => Some(&data.local_tx_id),
            _ => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::SagaEnded(_) => "SagaEnded",
            SagaEvent::SagaAborted(_) => "SagaAborted",
            SagaEvent::SagaTimeout(_) => "SagaTimeout",
            SagaEvent::TxStarted(_) => "TxStarted",
            SagaEvent::TxEnded(_) => "TxEnded",
            SagaEvent::TxAborted(_) => "TxAborted",
            SagaEvent::TxCompensateAckSucceeded(_) => "TxCompensateAckSucceeded",
            SagaEvent::TxCompensateAckFailed(_) => "TxCompensateAckFailed",
            SagaEvent::CompensateAckTimeout(_) => "CompensateAckTimeout",
        }
    }

    /// Rejects events that cannot be routed or matched to a sub-transaction.
    pub fn validate(&self) -> Result<()> {
        if self.global_tx_id().is_empty() {
            return Err(SagaError::InvalidEvent(format!(
                "{} is missing global_tx_id",
                self.event_type()
            )));
        }
        if let Some(local) = self.local_tx_id()
            && local.is_empty()
        {
            return Err(SagaError::InvalidEvent(format!(
                "{} is missing local_tx_id",
                self.event_type()
            )));
        }
        if let SagaEvent::SagaStarted(data) = self {
            data.expiration_time()?;
        }
        Ok(())
    }
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(header: EventHeader, timeout_seconds: i64) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            header,
            timeout_seconds,
        })
    }

    pub fn saga_ended(header: EventHeader) -> Self {
        SagaEvent::SagaEnded(SagaSignalData { header })
    }

    pub fn saga_aborted(header: EventHeader, payload: impl Into<Vec<u8>>) -> Self {
        SagaEvent::SagaAborted(SagaAbortedData {
            header,
            payload: payload.into(),
        })
    }

    pub fn saga_timeout(header: EventHeader) -> Self {
        SagaEvent::SagaTimeout(SagaSignalData { header })
    }

    pub fn tx_started(data: TxStartedData) -> Self {
        SagaEvent::TxStarted(data)
    }

    pub fn tx_ended(header: EventHeader, local_tx_id: impl Into<String>) -> Self {
        SagaEvent::TxEnded(TxData {
            header,
            local_tx_id: local_tx_id.into(),
        })
    }

    pub fn tx_aborted(
        header: EventHeader,
        local_tx_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        SagaEvent::TxAborted(TxPayloadData {
            header,
            local_tx_id: local_tx_id.into(),
            payload: payload.into(),
        })
    }

    pub fn compensate_succeeded(header: EventHeader, local_tx_id: impl Into<String>) -> Self {
        SagaEvent::TxCompensateAckSucceeded(TxData {
            header,
            local_tx_id: local_tx_id.into(),
        })
    }

    pub fn compensate_failed(
        header: EventHeader,
        local_tx_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        SagaEvent::TxCompensateAckFailed(TxPayloadData {
            header,
            local_tx_id: local_tx_id.into(),
            payload: payload.into(),
        })
    }

    pub fn compensate_ack_timeout(
        header: EventHeader,
        local_tx_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        SagaEvent::CompensateAckTimeout(TxPayloadData {
            header,
            local_tx_id: local_tx_id.into(),
            payload: payload.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wire_format() {
        let json = serde_json::json!({
            "type": "TxStarted",
            "data": {
                "global_tx_id": "gtx-1",
                "service_name": "inventory",
                "instance_id": "inventory-1",
                "local_tx_id": "ltx-1",
                "compensation_method": "cancelReservation",
                "reverse_retries": 2,
                "retry_delay_millis": 500
            }
        });

        let event: SagaEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.event_type(), "TxStarted");
        assert_eq!(event.global_tx_id().as_str(), "gtx-1");
        assert_eq!(event.local_tx_id(), Some("ltx-1"));

        let SagaEvent::TxStarted(data) = event else {
            panic!("expected TxStarted");
        };
        assert_eq!(data.reverse_retries, 2);
        assert_eq!(data.reverse_timeout_seconds, 0);
        assert_eq!(data.retry_delay_millis, 500);
        assert!(data.parent_tx_id.is_none());
        assert!(data.payload.is_empty());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let json = serde_json::json!({"type": "TxExploded", "data": {}});
        assert!(serde_json::from_value::<SagaEvent>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_timeout() {
        for timeout in [i64::MAX, 9_000_000_000_000] {
            let event = SagaEvent::saga_started(EventHeader::new("gtx", "svc", "svc-1"), timeout);
            assert!(matches!(event.validate(), Err(SagaError::InvalidEvent(_))));
        }
    }

    #[test]
    fn test_expiration_time_adds_timeout_to_create_time() {
        let header = EventHeader::new("gtx", "svc", "svc-1");
        let begin = header.create_time;
        let SagaEvent::SagaStarted(data) = SagaEvent::saga_started(header, 30) else {
            panic!("expected SagaStarted");
        };
        assert_eq!(
            data.expiration_time().unwrap(),
            Some(begin + chrono::Duration::seconds(30))
        );

        let SagaEvent::SagaStarted(data) =
            SagaEvent::saga_started(EventHeader::new("gtx", "svc", "svc-1"), -1)
        else {
            panic!("expected SagaStarted");
        };
        assert_eq!(data.expiration_time().unwrap(), None);
    }

    #[test]
    fn test_validate_requires_ids() {
        let header = EventHeader::new("", "svc", "svc-1");
        assert!(SagaEvent::saga_ended(header).validate().is_err());

        let header = EventHeader::new("gtx-1", "svc", "svc-1");
        assert!(SagaEvent::tx_ended(header.clone(), "").validate().is_err());
        assert!(SagaEvent::tx_ended(header, "ltx-1").validate().is_ok());
    }

    #[test]
    fn test_saga_level_events_have_no_local_id() {
        let header = EventHeader::new("gtx-1", "svc", "svc-1");
        assert!(SagaEvent::saga_started(header.clone(), 5).local_tx_id().is_none());
        assert!(SagaEvent::saga_aborted(header, b"boom".to_vec()).local_tx_id().is_none());
    }
}
