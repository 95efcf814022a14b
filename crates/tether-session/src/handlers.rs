//! The table of user callbacks, run from `Session::update()`.
//!
//! The network side never calls any of these directly. It pushes an
//! [`Event`] onto the task queue, and the table dispatches it when the
//! application drains the queue. Each kind of callback can be registered
//! more than once; they run in registration order.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};
use tether_protocol::{FunMessage, MessageBody, SessionId};
use tether_transport::TransportProtocol;
use tracing::trace;

use crate::event::{Event, RecvTimeoutKey, SessionEvent, TransportEvent};

pub(crate) type SessionHandler = Box<dyn FnMut(TransportProtocol, SessionEvent, &SessionId) + Send>;
pub(crate) type TransportHandler = Box<dyn FnMut(TransportProtocol, TransportEvent) + Send>;
pub(crate) type JsonHandler = Box<dyn FnMut(TransportProtocol, &str, &Map<String, Value>) + Send>;
pub(crate) type ProtobufHandler = Box<dyn FnMut(TransportProtocol, &FunMessage) + Send>;
pub(crate) type MessageHandler = Box<dyn FnMut(TransportProtocol, &MessageBody) + Send>;
pub(crate) type RecvTimeoutHandler = Box<dyn FnMut(&str) + Send>;
pub(crate) type RecvTimeoutIntHandler = Box<dyn FnMut(i32) + Send>;

/// The application's callbacks, owned by the [`Session`](crate::Session).
#[derive(Default)]
pub struct Handlers {
    pub(crate) session: Vec<SessionHandler>,
    pub(crate) transport: Vec<TransportHandler>,
    pub(crate) json: Vec<JsonHandler>,
    pub(crate) protobuf: Vec<ProtobufHandler>,
    pub(crate) maintenance: Vec<MessageHandler>,
    pub(crate) recv_timeout: Vec<RecvTimeoutHandler>,
    pub(crate) recv_timeout_int: Vec<RecvTimeoutIntHandler>,
    /// Handlers for specific message types. These take the message instead
    /// of the JSON/Protobuf callbacks.
    pub(crate) by_type: HashMap<String, MessageHandler>,
}

impl Handlers {
    /// Runs every callback interested in `event`.
    pub fn dispatch(&mut self, event: Event) {
        match event {
            Event::Session {
                protocol,
                event,
                session_id,
            } => {
                for handler in &mut self.session {
                    handler(protocol, event, &session_id);
                }
            }
            Event::Transport { protocol, event } => {
                for handler in &mut self.transport {
                    handler(protocol, event);
                }
            }
            Event::Message { protocol, body } => self.dispatch_message(protocol, &body),
            Event::Maintenance { protocol, body } => {
                for handler in &mut self.maintenance {
                    handler(protocol, &body);
                }
            }
            Event::RecvTimeout(RecvTimeoutKey::Name(name)) => {
                for handler in &mut self.recv_timeout {
                    handler(&name);
                }
            }
            Event::RecvTimeout(RecvTimeoutKey::Int(msg_type)) => {
                for handler in &mut self.recv_timeout_int {
                    handler(msg_type);
                }
            }
        }
    }

    fn dispatch_message(&mut self, protocol: TransportProtocol, body: &MessageBody) {
        let msg_type = body.msg_type().unwrap_or_default();

        if let Some(handler) = self.by_type.get_mut(msg_type) {
            handler(protocol, body);
            return;
        }

        match body {
            MessageBody::Json(map) => {
                for handler in &mut self.json {
                    handler(protocol, msg_type, map);
                }
            }
            MessageBody::Protobuf(msg) => {
                for handler in &mut self.protobuf {
                    handler(protocol, msg);
                }
            }
        }
        trace!(%protocol, msg_type, "message dispatched");
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("session", &self.session.len())
            .field("transport", &self.transport.len())
            .field("json", &self.json.len())
            .field("protobuf", &self.protobuf.len())
            .field("maintenance", &self.maintenance.len())
            .field("recv_timeout", &(self.recv_timeout.len() + self.recv_timeout_int.len()))
            .field("by_type", &self.by_type.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tether_protocol::Encoding;

    use super::*;

    fn json_body(text: &str) -> MessageBody {
        MessageBody::from_json_str(text).unwrap()
    }

    #[test]
    fn test_dispatch_registered_type_skips_json_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = Handlers::default();

        let log = Arc::clone(&seen);
        handlers.by_type.insert(
            "chat".into(),
            Box::new(move |_, body: &MessageBody| log.lock().unwrap().push(format!("chat:{}", body.msg_type().unwrap()))),
        );
        let log = Arc::clone(&seen);
        handlers.json.push(Box::new(move |_, msg_type: &str, _: &Map<String, Value>| {
            log.lock().unwrap().push(format!("json:{msg_type}"));
        }));

        handlers.dispatch(Event::Message {
            protocol: TransportProtocol::Tcp,
            body: json_body(r#"{"_msgtype":"chat"}"#),
        });
        handlers.dispatch(Event::Message {
            protocol: TransportProtocol::Tcp,
            body: json_body(r#"{"_msgtype":"echo"}"#),
        });

        assert_eq!(*seen.lock().unwrap(), vec!["chat:chat", "json:echo"]);
    }

    #[test]
    fn test_dispatch_protobuf_goes_to_protobuf_callbacks() {
        let count = Arc::new(Mutex::new(0));
        let mut handlers = Handlers::default();
        let c = Arc::clone(&count);
        handlers.protobuf.push(Box::new(move |_, msg: &FunMessage| {
            assert_eq!(msg.msgtype.as_deref(), Some("pbuf_echo"));
            *c.lock().unwrap() += 1;
        }));
        handlers.json.push(Box::new(|_, _: &str, _: &Map<String, Value>| panic!("json callback for a protobuf body")));

        let mut body = MessageBody::empty(Encoding::Protobuf);
        body.set_msg_type("pbuf_echo");
        handlers.dispatch(Event::Message {
            protocol: TransportProtocol::Udp,
            body,
        });
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_dispatch_runs_every_handler_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = Handlers::default();
        for n in 0..3 {
            let log = Arc::clone(&seen);
            handlers.transport.push(Box::new(move |_, event: TransportEvent| {
                log.lock().unwrap().push((n, event));
            }));
        }

        handlers.dispatch(Event::Transport {
            protocol: TransportProtocol::Tcp,
            event: TransportEvent::Started,
        });
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (0, TransportEvent::Started),
                (1, TransportEvent::Started),
                (2, TransportEvent::Started),
            ]
        );
    }

    #[test]
    fn test_dispatch_recv_timeout_by_key_kind() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = Handlers::default();
        let log = Arc::clone(&seen);
        handlers.recv_timeout.push(Box::new(move |name: &str| log.lock().unwrap().push(name.to_owned())));
        let log = Arc::clone(&seen);
        handlers
            .recv_timeout_int
            .push(Box::new(move |n: i32| log.lock().unwrap().push(n.to_string())));

        handlers.dispatch(Event::RecvTimeout(RecvTimeoutKey::Name("login".into())));
        handlers.dispatch(Event::RecvTimeout(RecvTimeoutKey::Int(42)));
        assert_eq!(*seen.lock().unwrap(), vec!["login", "42"]);
    }
}
