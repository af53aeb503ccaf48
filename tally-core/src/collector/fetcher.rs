//! Remote configure document
//!
//! The configure endpoint may carry an `event_bindings.events` array for the
//! event binding feature. The worker fetches the document, extracts that
//! array and hands it to a [`ResultSink`]; everything else is ignored.

use serde_json::Value;

use crate::error::{Error, Result};

use super::transport::Transport;

/// Receives the `event_bindings.events` array from the configure endpoint.
pub trait ResultSink: Send + Sync {
    fn report_results(&self, events: Vec<Value>);
}

impl<F> ResultSink for F
where
    F: Fn(Vec<Value>) + Send + Sync,
{
    fn report_results(&self, events: Vec<Value>) {
        self(events)
    }
}

/// GET the configure document, returning its body on HTTP 200.
pub async fn fetch_configure<T: Transport>(transport: &T, url: &str) -> Result<String> {
    let reply = transport.get(url).await?;
    if !reply.is_ok() {
        return Err(Error::Connect(format!(
            "configure endpoint returned {}",
            reply.status
        )));
    }
    Ok(reply.body)
}

/// Extract `event_bindings.events` from a configure document.
///
/// Returns `Ok(None)` when the document is valid JSON without that shape.
pub fn parse_event_bindings(body: &str) -> Result<Option<Vec<Value>>> {
    let document: Value = serde_json::from_str(body)
        .map_err(|e| Error::ConfigParse(format!("{}: {}", e, body)))?;

    let events = document
        .get("event_bindings")
        .and_then(Value::as_object)
        .and_then(|bindings| bindings.get("events"))
        .and_then(Value::as_array)
        .cloned();
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::transport::{CollectorRequest, HttpReply};
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedReply(HttpReply);

    impl Transport for FixedReply {
        async fn post_batch(&self, _url: &str, _request: &CollectorRequest) -> Result<HttpReply> {
            Ok(self.0.clone())
        }

        async fn get(&self, _url: &str) -> Result<HttpReply> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_parse_event_bindings() {
        let events =
            parse_event_bindings(r#"{"event_bindings":{"events":[{"id":1}]}}"#).unwrap();
        assert_eq!(events, Some(vec![json!({"id": 1})]));
    }

    #[test]
    fn test_parse_missing_or_wrong_shape() {
        assert_eq!(parse_event_bindings(r#"{"other":true}"#).unwrap(), None);
        assert_eq!(
            parse_event_bindings(r#"{"event_bindings":[1,2]}"#).unwrap(),
            None
        );
        assert_eq!(
            parse_event_bindings(r#"{"event_bindings":{"events":{"id":1}}}"#).unwrap(),
            None
        );
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(matches!(
            parse_event_bindings("<html>"),
            Err(Error::ConfigParse(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_returns_body_on_200() {
        let transport = FixedReply(HttpReply {
            status: 200,
            body: "{}".to_string(),
        });
        let body = fetch_configure(&transport, "http://config").await.unwrap();
        assert_eq!(body, "{}");
    }

    #[tokio::test]
    async fn test_fetch_non_200_is_connect_error() {
        let transport = FixedReply(HttpReply {
            status: 503,
            body: "busy".to_string(),
        });
        let err = fetch_configure(&transport, "http://config").await.unwrap_err();
        assert!(matches!(err, Error::Connect(_)));
    }

    #[test]
    fn test_closures_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |events: Vec<Value>| seen.lock().unwrap().extend(events);
        sink.report_results(vec![json!(1), json!(2)]);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
