//! # Message Envelope
//!
//! The typed envelope exchanged between the index, workers and UI sessions.
//! The payload is kept as raw JSON so it survives routing hops byte for byte;
//! typed constructors and parsers exist for every catalog entry.

use crate::constants::message_names;
use crate::error::{FleetError, Result};
use crate::messaging::identifier::Identifier;
use crate::messaging::payloads::{Listenables, UiWelcome, WorkerInfo};
use crate::state_machine::Progress;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Envelope for everything that travels between nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub from: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Identifier>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    /// Correlation id pairing a command with its `done` event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from
            && self.to == other.to
            && self.name == other.name
            && self.id == other.id
            && self.payload_bytes() == other.payload_bytes()
    }
}

impl Message {
    pub fn new(from: Identifier, to: Option<Identifier>, name: impl Into<String>) -> Self {
        Self {
            from,
            to,
            name: name.into(),
            payload: None,
            id: None,
        }
    }

    /// Attach a JSON-encoded payload
    pub fn with_payload<T: Serialize + ?Sized>(mut self, payload: &T) -> Result<Self> {
        let raw = serde_json::value::to_raw_value(payload)
            .map_err(|e| FleetError::malformed_payload(&self.name, e))?;
        self.payload = Some(raw);
        Ok(self)
    }

    /// Attach an already-encoded payload, validating that it is JSON
    pub fn with_raw_payload(mut self, bytes: &[u8]) -> Result<Self> {
        let text =
            std::str::from_utf8(bytes).map_err(|e| FleetError::malformed_payload(&self.name, e))?;
        let raw = RawValue::from_string(text.to_string())
            .map_err(|e| FleetError::malformed_payload(&self.name, e))?;
        self.payload = Some(raw);
        Ok(self)
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Copy of the message readdressed to another destination
    pub fn readdressed(&self, to: Identifier) -> Self {
        let mut message = self.clone();
        message.to = Some(to);
        message
    }

    /// Raw payload bytes, empty when the message carries none
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload
            .as_ref()
            .map(|raw| raw.get().as_bytes())
            .unwrap_or_default()
    }

    /// Decode the payload into a typed value
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self
            .payload
            .as_ref()
            .ok_or_else(|| FleetError::malformed_payload(&self.name, "missing payload"))?;
        serde_json::from_str(raw.get()).map_err(|e| FleetError::malformed_payload(&self.name, e))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| FleetError::MalformedMessage(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| FleetError::MalformedMessage(e.to_string()))
    }

    // Catalog constructors

    pub fn cmd_worker_register(from: Identifier, info: &WorkerInfo) -> Result<Self> {
        Self::new(
            from,
            Some(Identifier::index()),
            message_names::CMD_WORKER_REGISTER,
        )
        .with_payload(info)
    }

    pub fn cmd_runnable_start(from: Identifier, to: Identifier) -> Self {
        Self::new(from, Some(to), message_names::CMD_RUNNABLE_START)
    }

    pub fn cmd_runnable_stop(from: Identifier, to: Identifier) -> Self {
        Self::new(from, Some(to), message_names::CMD_RUNNABLE_STOP)
    }

    pub fn cmd_ui_ping(from: Identifier) -> Self {
        Self::new(from, Some(Identifier::index()), message_names::CMD_UI_PING)
    }

    pub fn event_worker_registered(
        from: Identifier,
        to: Option<Identifier>,
        info: &WorkerInfo,
    ) -> Result<Self> {
        Self::new(from, to, message_names::EVENT_WORKER_REGISTERED).with_payload(info)
    }

    pub fn event_worker_welcome(
        from: Identifier,
        to: Option<Identifier>,
        workers: &[WorkerInfo],
    ) -> Result<Self> {
        Self::new(from, to, message_names::EVENT_WORKER_WELCOME).with_payload(workers)
    }

    pub fn event_worker_disconnected(
        from: Identifier,
        to: Option<Identifier>,
        worker: &str,
    ) -> Result<Self> {
        Self::new(from, to, message_names::EVENT_WORKER_DISCONNECTED).with_payload(worker)
    }

    pub fn event_runnable_started(from: Identifier, to: Option<Identifier>) -> Self {
        Self::new(from, to, message_names::EVENT_RUNNABLE_STARTED)
    }

    pub fn event_runnable_stopped(from: Identifier, to: Option<Identifier>) -> Self {
        Self::new(from, to, message_names::EVENT_RUNNABLE_STOPPED)
    }

    pub fn event_runnable_crashed(from: Identifier, to: Option<Identifier>) -> Self {
        Self::new(from, to, message_names::EVENT_RUNNABLE_CRASHED)
    }

    pub fn event_runnable_progress(
        from: Identifier,
        to: Option<Identifier>,
        progress: &Progress,
    ) -> Result<Self> {
        Self::new(from, to, message_names::EVENT_RUNNABLE_PROGRESS).with_payload(progress)
    }

    pub fn event_runnable_done(
        from: Identifier,
        to: Option<Identifier>,
        id: u64,
        output: Option<&serde_json::Value>,
    ) -> Result<Self> {
        let message = Self::new(from, to, message_names::EVENT_RUNNABLE_DONE).with_id(id);
        match output {
            Some(output) => message.with_payload(output),
            None => Ok(message),
        }
    }

    pub fn event_ui_welcome(
        from: Identifier,
        to: Option<Identifier>,
        welcome: &UiWelcome,
    ) -> Result<Self> {
        Self::new(from, to, message_names::EVENT_UI_WELCOME).with_payload(welcome)
    }

    pub fn event_ui_disconnected(
        from: Identifier,
        to: Option<Identifier>,
        session: &str,
    ) -> Result<Self> {
        Self::new(from, to, message_names::EVENT_UI_DISCONNECTED).with_payload(session)
    }

    pub fn ui_message_names_add(
        from: Identifier,
        to: Option<Identifier>,
        names: &[String],
    ) -> Result<Self> {
        Self::new(from, to, message_names::UI_MESSAGE_NAMES_ADD).with_payload(names)
    }

    pub fn ui_message_names_delete(
        from: Identifier,
        to: Option<Identifier>,
        names: &[String],
    ) -> Result<Self> {
        Self::new(from, to, message_names::UI_MESSAGE_NAMES_DELETE).with_payload(names)
    }

    pub fn listenables_register(
        from: Identifier,
        to: Identifier,
        listenables: &Listenables,
    ) -> Result<Self> {
        Self::new(from, Some(to), message_names::LISTENABLES_REGISTER).with_payload(listenables)
    }

    // Catalog parsers

    pub fn parse_worker_info(&self) -> Result<WorkerInfo> {
        self.parse_payload()
    }

    pub fn parse_worker_list(&self) -> Result<Vec<WorkerInfo>> {
        if self.payload.is_none() {
            return Ok(Vec::new());
        }
        self.parse_payload()
    }

    pub fn parse_name(&self) -> Result<String> {
        self.parse_payload()
    }

    pub fn parse_message_names(&self) -> Result<Vec<String>> {
        if self.payload.is_none() {
            return Ok(Vec::new());
        }
        self.parse_payload()
    }

    pub fn parse_ui_welcome(&self) -> Result<UiWelcome> {
        self.parse_payload()
    }

    pub fn parse_listenables(&self) -> Result<Listenables> {
        if self.payload.is_none() {
            return Ok(Listenables::default());
        }
        self.parse_payload()
    }

    pub fn parse_progress(&self) -> Result<Progress> {
        self.parse_payload()
    }

    /// Output carried by a `done` event, if any
    pub fn parse_done_output(&self) -> Result<Option<serde_json::Value>> {
        if self.payload.is_none() {
            return Ok(None);
        }
        self.parse_payload().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::identifier::IdentifierType;
    use crate::state_machine::RunnableStatus;
    use crate::messaging::payloads::RunnableInfo;

    fn micro() -> WorkerInfo {
        WorkerInfo::new("micro", "http://127.0.0.1:4001").with_runnable(RunnableInfo {
            name: "echo".to_string(),
            description: "Echoes input".to_string(),
            status: RunnableStatus::Stopped,
            ui_homepage: None,
        })
    }

    #[test]
    fn test_register_round_trip() {
        let message = Message::cmd_worker_register(Identifier::worker("micro"), &micro()).unwrap();
        let bytes = message.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(decoded.parse_worker_info().unwrap(), micro());
        assert_eq!(decoded.to.unwrap().kind, Some(IdentifierType::Index));
    }

    #[test]
    fn test_raw_payload_bytes_preserved() {
        let payload = br#"{ "b": 1,  "a": [true, null] }"#;
        let message = Message::new(Identifier::ui("u1"), None, "samples")
            .with_raw_payload(payload)
            .unwrap();
        let decoded = Message::from_bytes(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.payload_bytes(), payload);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let message = Message::event_runnable_started(Identifier::runnable("echo", "micro"), None);
        let json = String::from_utf8(message.to_bytes().unwrap()).unwrap();
        assert!(!json.contains("\"to\""));
        assert!(!json.contains("\"payload\""));
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_malformed_payload_is_reported() {
        let message = Message::new(
            Identifier::index(),
            None,
            message_names::EVENT_WORKER_REGISTERED,
        )
        .with_payload(&42)
        .unwrap();
        let err = message.parse_worker_info().unwrap_err();
        assert!(matches!(err, FleetError::MalformedPayload { .. }));
    }

    #[test]
    fn test_malformed_envelope_is_rejected() {
        assert!(matches!(
            Message::from_bytes(b"{not json"),
            Err(FleetError::MalformedMessage(_))
        ));
        assert!(Message::new(Identifier::index(), None, "x")
            .with_raw_payload(b"{oops")
            .is_err());
    }

    #[test]
    fn test_listenables_payload() {
        let listenables = Listenables::default()
            .with("mic", ["samples"])
            .with("mic", ["silence"])
            .with("camera", ["frame"]);
        let message = Message::listenables_register(
            Identifier::worker("macro"),
            Identifier::worker("micro"),
            &listenables,
        )
        .unwrap();

        let json = String::from_utf8(message.to_bytes().unwrap()).unwrap();
        assert!(json.contains(r#""payload":{"runnables":{"camera":["frame"],"mic":["samples","silence"]}}"#));

        let decoded = Message::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(decoded.parse_listenables().unwrap(), listenables);
        assert!(Message::new(Identifier::worker("macro"), None, message_names::LISTENABLES_REGISTER)
            .parse_listenables()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_done_output() {
        let output = serde_json::json!({"lines": 3});
        let done = Message::event_runnable_done(
            Identifier::runnable("echo", "micro"),
            Some(Identifier::worker("macro")),
            7,
            Some(&output),
        )
        .unwrap();
        assert_eq!(done.id, Some(7));
        assert_eq!(done.parse_done_output().unwrap(), Some(output));

        let empty =
            Message::event_runnable_done(Identifier::runnable("echo", "micro"), None, 8, None)
                .unwrap();
        assert_eq!(empty.parse_done_output().unwrap(), None);
    }
}
