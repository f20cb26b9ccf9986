//! Mapping of agent events to typed notifications.

use crate::errors::ParseError;
use crate::events::AgentEvent;
use crate::flow::{AgentEventType, AgentNotification, Notification};
use flow_observer_common::message_type;
use serde::de::DeserializeOwned;

/// Decode the JSON body of `event` according to its kind.
pub fn decode_agent_event(event: &AgentEvent) -> Result<AgentNotification, ParseError> {
    if event.msg_type != message_type::AGENT {
        return Err(ParseError::NotAnAgentEvent(event.msg_type));
    }
    let event_type =
        AgentEventType::from_code(event.kind).ok_or(ParseError::UnknownNotification(event.kind))?;

    let message = event.message.as_str();
    let notification = match event_type {
        AgentEventType::Generic => Notification::Generic(message.to_string()),
        AgentEventType::AgentStarted => Notification::AgentStart(parse(event_type, message)?),
        AgentEventType::PolicyUpdated | AgentEventType::PolicyDeleted => {
            Notification::PolicyUpdate(parse(event_type, message)?)
        }
        AgentEventType::EndpointRegenerateSuccess | AgentEventType::EndpointRegenerateFailure => {
            Notification::EndpointRegenerate(parse(event_type, message)?)
        }
        AgentEventType::EndpointCreated | AgentEventType::EndpointDeleted => {
            Notification::EndpointUpdate(parse(event_type, message)?)
        }
        AgentEventType::IpcacheUpserted | AgentEventType::IpcacheDeleted => {
            Notification::IpcacheUpdate(parse(event_type, message)?)
        }
        AgentEventType::ServiceUpserted => Notification::ServiceUpsert(parse(event_type, message)?),
        AgentEventType::ServiceDeleted => Notification::ServiceDelete(parse(event_type, message)?),
    };

    Ok(AgentNotification {
        event_type,
        notification,
    })
}

fn parse<T: DeserializeOwned>(kind: AgentEventType, message: &str) -> Result<T, ParseError> {
    serde_json::from_str(message).map_err(|e| ParseError::MalformedNotification {
        kind: kind.as_str(),
        message: e.to_string(),
    })
}
