//! Unit tests for handler registration and uniqueness validation.

use std::sync::Arc;

use plugin_uplink::codec::{Payload, RequestFormat};
use plugin_uplink::handler::{Handler, HandlerKind, WorkContext};
use plugin_uplink::registry::HandlerRegistry;
use plugin_uplink::{Result, UplinkError};
use serde_json::{json, Value};

struct NamedHandler {
    id: String,
}

impl NamedHandler {
    fn shared(id: &str) -> Arc<dyn Handler> {
        Arc::new(Self { id: id.to_owned() })
    }
}

impl Handler for NamedHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::FlowExtension
    }

    fn request_format(&self) -> RequestFormat {
        RequestFormat::Empty
    }

    fn schema(&self) -> Result<String> {
        Ok(format!("schema-{}", self.id))
    }

    fn execute(&self, _ctx: &WorkContext, _payload: Payload) -> Result<Value> {
        Ok(json!({}))
    }
}

#[test]
fn unique_ids_construct_successfully() {
    let registry = HandlerRegistry::new(vec![
        NamedHandler::shared("alpha"),
        NamedHandler::shared("beta"),
        NamedHandler::shared("gamma"),
    ])
    .expect("unique ids");

    assert_eq!(registry.len(), 3);
    assert!(!registry.is_empty());
}

#[test]
fn duplicate_id_fails_with_duplicate_handler_error() {
    let result = HandlerRegistry::new(vec![
        NamedHandler::shared("alpha"),
        NamedHandler::shared("beta"),
        NamedHandler::shared("alpha"),
    ]);

    match result {
        Err(UplinkError::DuplicateHandler(msg)) => {
            assert!(msg.contains("alpha"), "message names the offending id");
        }
        Err(other) => panic!("expected DuplicateHandler, got {other}"),
        Ok(_) => panic!("duplicate ids must fail registration"),
    }
}

#[test]
fn iteration_preserves_registration_order() {
    let registry = HandlerRegistry::new(vec![
        NamedHandler::shared("third"),
        NamedHandler::shared("first"),
        NamedHandler::shared("second"),
    ])
    .expect("unique ids");

    let ids: Vec<&str> = registry.iter().map(|h| h.id()).collect();
    assert_eq!(ids, vec!["third", "first", "second"]);
}

#[test]
fn get_resolves_by_id() {
    let registry =
        HandlerRegistry::new(vec![NamedHandler::shared("alpha")]).expect("unique ids");

    assert!(registry.get("alpha").is_some());
    assert!(registry.get("missing").is_none());
}

#[test]
fn empty_registry_is_valid() {
    let registry = HandlerRegistry::new(Vec::new()).expect("empty set");
    assert!(registry.is_empty());
    assert_eq!(registry.iter().count(), 0);
}
