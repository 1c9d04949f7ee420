use crate::stream::{TokenStream, token_stream};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Base URL used when `LANGFLOW_URL` is not configured.
///
/// A base is everything before `/api/v1/run/<flow>`. For hosted Langflow that
/// is the host followed by `/lf/<workspace id>`; a self-hosted server is just
/// its origin (`http://localhost:7860`).
pub const DEFAULT_LANGFLOW_BASE_URL: &str =
    "https://api.langflow.astra.datastax.com/lf/ae8ca9a9-1a2f-46f7-9505-71efa70416d9";

const HOSTED_LANGFLOW_HOST: &str = "api.langflow.astra.datastax.com";

/// Failure modes of a single flow run.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The API answered with a non-success status.
    #[error("Langflow API error: {status} - {body}")]
    RemoteApi { status: u16, body: String },
    /// A streamed run reported an `error` event.
    #[error("Langflow flow error: {0}")]
    FlowError(String),
    /// The request never produced a response (refused, DNS, timeout, ...).
    #[error("Failed to reach the Langflow API: {0}")]
    Transport(#[from] reqwest::Error),
    /// A success response whose body did not carry the reply text.
    #[error("Malformed Langflow response: {0}")]
    MalformedResponse(String),
}

/// Connection settings for the hosted chat-flow API.
#[derive(Debug)]
pub struct LangflowConfig {
    /// See [`DEFAULT_LANGFLOW_BASE_URL`] for the expected format.
    pub base_url: String,
    pub flow_id: String,
    pub api_key: SecretString,
    /// Upper bound on one run, `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl LangflowConfig {
    /// The non-streaming run endpoint for the configured flow.
    pub fn run_url(&self) -> String {
        self.run_url_with(false)
    }

    /// The run endpoint that answers with newline-delimited stream events.
    pub fn stream_url(&self) -> String {
        self.run_url_with(true)
    }

    fn run_url_with(&self, stream: bool) -> String {
        format!(
            "{}/api/v1/run/{}?stream={}",
            self.base_url.trim_end_matches('/'),
            self.flow_id,
            stream
        )
    }

    /// Explains why the base URL is unlikely to work, if it points at hosted
    /// Langflow without a `/lf/<workspace>` segment.
    pub fn base_url_warning(&self) -> Option<String> {
        (self.base_url.contains(HOSTED_LANGFLOW_HOST) && !self.base_url.contains("/lf/")).then(
            || {
                format!(
                    "LANGFLOW_URL `{}` points at hosted Langflow without `/lf/<workspace id>`; \
                     runs will be sent to `{}`",
                    self.base_url,
                    self.run_url()
                )
            },
        )
    }
}

/// Body of a flow run request.
#[derive(Serialize, Debug, PartialEq)]
pub struct RunFlowRequest<'a> {
    pub input_value: &'a str,
    pub output_type: &'static str,
    pub input_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

impl<'a> RunFlowRequest<'a> {
    /// A chat-in, chat-out run of `input_value` within the given session.
    pub fn chat(input_value: &'a str, session_id: Option<&'a str>) -> Self {
        Self {
            input_value,
            output_type: "chat",
            input_type: "chat",
            session_id,
        }
    }
}

// The leaf of `outputs[0].outputs[0]`. Nothing around it is decoded, so the
// shape of sibling outputs never matters.
#[derive(Deserialize, Debug)]
struct ComponentOutput {
    results: Option<ComponentResults>,
}

#[derive(Deserialize, Debug)]
struct ComponentResults {
    message: Option<ResultMessage>,
}

#[derive(Deserialize, Debug)]
struct ResultMessage {
    text: Option<String>,
}

const TOP_LEVEL_REPLY_FIELDS: [&str; 3] = ["output", "message", "text"];
const NAMED_OUTPUT_FIELDS: [&str; 3] = ["chat_output", "text_output", "result"];

/// Decodes a successful run response body into the reply text.
///
/// `outputs[0].outputs[0].results.message.text` is the reply. Flows that
/// answer in an older shape are also accepted: a string `output`, `message`
/// or `text` at the top level, or `outputs[0].outputs` as an object keyed by
/// output name.
pub fn extract_reply(body: &[u8]) -> Result<String, ForwardError> {
    let response: Value = serde_json::from_slice(body)
        .map_err(|e| ForwardError::MalformedResponse(format!("invalid JSON body: {e}")))?;
    reply_from_value(&response)
}

pub(crate) fn reply_from_value(response: &Value) -> Result<String, ForwardError> {
    first_component_text(response)
        .or_else(|| fallback_text(response))
        .ok_or_else(|| {
            ForwardError::MalformedResponse(
                "missing `outputs[0].outputs[0].results.message.text`".to_string(),
            )
        })
}

fn first_component_text(response: &Value) -> Option<String> {
    let component = response.get("outputs")?.get(0)?.get("outputs")?.get(0)?;
    let component = ComponentOutput::deserialize(component).ok()?;
    component.results?.message?.text
}

fn fallback_text(response: &Value) -> Option<String> {
    if let Some(text) = TOP_LEVEL_REPLY_FIELDS
        .iter()
        .find_map(|field| response.get(*field).and_then(Value::as_str))
    {
        return Some(text.to_string());
    }

    let named = response.pointer("/outputs/0/outputs")?.as_object()?;
    NAMED_OUTPUT_FIELDS
        .iter()
        .filter_map(|field| named.get(*field))
        .find(|value| is_truthy(value))
        .or_else(|| named.values().next())
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Number(_) => true,
    }
}

/// Sends one user utterance to a chat flow and returns the generated reply.
#[async_trait]
pub trait ChatFlowClient: Send + Sync {
    /// Runs the flow once. `session_id` correlates the turns of one call.
    async fn run_flow(
        &self,
        input_value: String,
        session_id: Option<String>,
    ) -> Result<String, ForwardError>;

    /// Runs the flow once and yields the reply as it is generated.
    async fn stream_flow(
        &self,
        input_value: String,
        session_id: Option<String>,
    ) -> Result<TokenStream, ForwardError>;
}

/// A `ChatFlowClient` backed by the Langflow run API.
pub struct LangflowClient {
    http: reqwest::Client,
    run_url: String,
    stream_url: String,
}

impl LangflowClient {
    /// Builds the HTTP client with the bearer credential installed as a
    /// sensitive default header.
    pub fn new(config: &LangflowConfig) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose_secret()))
            .context("LANGFLOW_API_KEY is not a valid header value")?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("Failed to build Langflow HTTP client")?;

        Ok(Self {
            http,
            run_url: config.run_url(),
            stream_url: config.stream_url(),
        })
    }

    async fn post_run(
        &self,
        url: &str,
        input_value: &str,
        session_id: Option<&str>,
    ) -> Result<reqwest::Response, ForwardError> {
        let request = RunFlowRequest::chat(input_value, session_id);
        debug!(%url, ?session_id, "Running Langflow flow");

        let response = self.http.post(url).json(&request).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to read Langflow error body");
                String::new()
            }
        };
        error!(
            status = status.as_u16(),
            reason = status.canonical_reason().unwrap_or(""),
            %body,
            "Langflow API error"
        );
        Err(ForwardError::RemoteApi {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChatFlowClient for LangflowClient {
    async fn run_flow(
        &self,
        input_value: String,
        session_id: Option<String>,
    ) -> Result<String, ForwardError> {
        let response = self
            .post_run(&self.run_url, &input_value, session_id.as_deref())
            .await?;
        let body = response.bytes().await?;
        extract_reply(&body)
    }

    async fn stream_flow(
        &self,
        input_value: String,
        session_id: Option<String>,
    ) -> Result<TokenStream, ForwardError> {
        let response = self
            .post_run(&self.stream_url, &input_value, session_id.as_deref())
            .await?;
        Ok(token_stream(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply_body(text: &str) -> serde_json::Value {
        json!({
            "session_id": "CA123",
            "outputs": [{
                "inputs": { "input_value": "hello" },
                "outputs": [{
                    "results": { "message": { "text": text, "sender": "Machine" } },
                    "artifacts": {}
                }]
            }]
        })
    }

    fn config_for(server: &MockServer, timeout: Option<Duration>) -> LangflowConfig {
        LangflowConfig {
            base_url: format!("{}/lf/workspace-1", server.uri()),
            flow_id: "flow-42".to_string(),
            api_key: SecretString::from("test-key".to_string()),
            timeout,
        }
    }

    #[test]
    fn test_run_url_strips_trailing_slash() {
        let config = LangflowConfig {
            base_url: "https://langflow.example.com/lf/ws/".to_string(),
            flow_id: "abc".to_string(),
            api_key: SecretString::from("k".to_string()),
            timeout: None,
        };
        assert_eq!(
            config.run_url(),
            "https://langflow.example.com/lf/ws/api/v1/run/abc?stream=false"
        );
        assert_eq!(
            config.stream_url(),
            "https://langflow.example.com/lf/ws/api/v1/run/abc?stream=true"
        );
    }

    #[test]
    fn test_config_debug_hides_api_key() {
        let config = LangflowConfig {
            base_url: DEFAULT_LANGFLOW_BASE_URL.to_string(),
            flow_id: "abc".to_string(),
            api_key: SecretString::from("super-secret".to_string()),
            timeout: None,
        };
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    fn test_request_omits_absent_session_id() {
        let with_session = serde_json::to_value(RunFlowRequest::chat("hi", Some("CA1"))).unwrap();
        assert_eq!(
            with_session,
            json!({
                "input_value": "hi",
                "output_type": "chat",
                "input_type": "chat",
                "session_id": "CA1"
            })
        );

        let without_session = serde_json::to_value(RunFlowRequest::chat("hi", None)).unwrap();
        assert!(without_session.get("session_id").is_none());
    }

    #[test]
    fn test_extract_reply_reads_first_message_text() {
        let body = serde_json::to_vec(&reply_body("hi there")).unwrap();
        assert_eq!(extract_reply(&body).unwrap(), "hi there");
    }

    #[test]
    fn test_extract_reply_ignores_extra_outputs() {
        let body = json!({
            "outputs": [{
                "outputs": [
                    { "results": { "message": { "text": "first" } } },
                    { "artifacts": { "stream_url": null } }
                ]
            }]
        });
        let body = serde_json::to_vec(&body).unwrap();
        assert_eq!(extract_reply(&body).unwrap(), "first");

        // Siblings that are not objects at all.
        let body = br#"{"outputs":[{"outputs":[{"results":{"message":{"text":"a"}}}, 5]}]}"#;
        assert_eq!(extract_reply(body).unwrap(), "a");
        let body = br#"{"outputs":[{"outputs":[{"results":{"message":{"text":"a"}}}, 5]}, null]}"#;
        assert_eq!(extract_reply(body).unwrap(), "a");
    }

    #[test]
    fn test_extract_reply_fallback_shapes() {
        let cases = [
            (r#"{"output": "from output"}"#, "from output"),
            (r#"{"message": "from message"}"#, "from message"),
            (r#"{"text": "from text"}"#, "from text"),
            (
                r#"{"outputs": [{"outputs": {"text_output": "named", "other": "x"}}]}"#,
                "named",
            ),
            (
                r#"{"outputs": [{"outputs": {"chat_output": "", "result": "result wins"}}]}"#,
                "result wins",
            ),
            (
                r#"{"outputs": [{"outputs": {"only": "first value"}}]}"#,
                "first value",
            ),
        ];
        for (body, expected) in cases {
            assert_eq!(extract_reply(body.as_bytes()).unwrap(), expected, "{body}");
        }
    }

    #[test]
    fn test_extract_reply_prefers_component_text_over_fallbacks() {
        let body = json!({
            "text": "top level",
            "outputs": [{ "outputs": [{ "results": { "message": { "text": "component" } } }] }]
        });
        let body = serde_json::to_vec(&body).unwrap();
        assert_eq!(extract_reply(&body).unwrap(), "component");
    }

    #[test]
    fn test_base_url_warning_for_hosted_url_without_workspace() {
        let mut config = LangflowConfig {
            base_url: "https://api.langflow.astra.datastax.com".to_string(),
            flow_id: "flow-42".to_string(),
            api_key: SecretString::from("k".to_string()),
            timeout: None,
        };
        let warning = config.base_url_warning().unwrap();
        assert!(warning.contains("/lf/<workspace id>"));

        config.base_url = DEFAULT_LANGFLOW_BASE_URL.to_string();
        assert!(config.base_url_warning().is_none());

        config.base_url = "http://localhost:7860".to_string();
        assert!(config.base_url_warning().is_none());
    }

    #[test]
    fn test_extract_reply_malformed_shapes() {
        let cases = [
            b"not json".to_vec(),
            b"{}".to_vec(),
            br#"{"outputs": []}"#.to_vec(),
            br#"{"outputs": [{"outputs": []}]}"#.to_vec(),
            br#"{"outputs": [{"outputs": [{"results": {}}]}]}"#.to_vec(),
            br#"{"outputs": [{"outputs": [{"results": {"message": {}}}]}]}"#.to_vec(),
        ];
        for body in cases {
            let err = extract_reply(&body).unwrap_err();
            assert!(
                matches!(err, ForwardError::MalformedResponse(_)),
                "unexpected error for {:?}: {err}",
                String::from_utf8_lossy(&body)
            );
        }
    }

    #[tokio::test]
    async fn test_run_flow_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lf/workspace-1/api/v1/run/flow-42"))
            .and(query_param("stream", "false"))
            .and(header("authorization", "Bearer test-key"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({
                "input_value": "hello",
                "output_type": "chat",
                "input_type": "chat",
                "session_id": "CA123"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("hi there")))
            .expect(1)
            .mount(&server)
            .await;

        let client = LangflowClient::new(&config_for(&server, None)).unwrap();
        let reply = client
            .run_flow("hello".to_string(), Some("CA123".to_string()))
            .await
            .unwrap();
        assert_eq!(reply, "hi there");
    }

    #[tokio::test]
    async fn test_run_flow_remote_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("server error"))
            .mount(&server)
            .await;

        let client = LangflowClient::new(&config_for(&server, None)).unwrap();
        let err = client
            .run_flow("hello".to_string(), None)
            .await
            .unwrap_err();
        match err {
            ForwardError::RemoteApi { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "server error");
            }
            other => panic!("Expected RemoteApi, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_flow_unreadable_error_body_keeps_status() {
        // Promises more body than it sends, then hangs up.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 100\r\n\r\nshort")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let config = LangflowConfig {
            base_url: format!("http://{addr}"),
            flow_id: "flow".to_string(),
            api_key: SecretString::from("k".to_string()),
            timeout: Some(Duration::from_secs(5)),
        };
        let client = LangflowClient::new(&config).unwrap();
        let err = client
            .run_flow("hello".to_string(), None)
            .await
            .unwrap_err();
        match err {
            ForwardError::RemoteApi { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "");
            }
            other => panic!("Expected RemoteApi, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_flow_yields_tokens() {
        let server = MockServer::start().await;
        let events = concat!(
            "{\"event\":\"add_message\",\"data\":{\"text\":\"hello\"}}\n\n",
            "{\"event\":\"token\",\"data\":{\"chunk\":\"Hi \"}}\n\n",
            "{\"event\":\"token\",\"data\":{\"chunk\":\"there\"}}\n\n",
            "{\"event\":\"end\",\"data\":{\"result\":{}}}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/lf/workspace-1/api/v1/run/flow-42"))
            .and(query_param("stream", "true"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(events, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let client = LangflowClient::new(&config_for(&server, None)).unwrap();
        let tokens: Vec<String> = client
            .stream_flow("hello".to_string(), Some("CA123".to_string()))
            .await
            .unwrap()
            .map(|token| token.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["Hi ", "there"]);
    }

    #[tokio::test]
    async fn test_stream_flow_remote_error_before_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let client = LangflowClient::new(&config_for(&server, None)).unwrap();
        let err = match client.stream_flow("hello".to_string(), None).await {
            Ok(_) => panic!("Expected the request to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, ForwardError::RemoteApi { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_run_flow_malformed_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "outputs": [] })))
            .mount(&server)
            .await;

        let client = LangflowClient::new(&config_for(&server, None)).unwrap();
        let err = client
            .run_flow("hello".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_run_flow_timeout_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply_body("too late"))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client =
            LangflowClient::new(&config_for(&server, Some(Duration::from_millis(100)))).unwrap();
        let err = client
            .run_flow("hello".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::Transport(_)));
    }

    #[tokio::test]
    async fn test_run_flow_connection_refused_is_transport_error() {
        let config = LangflowConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            flow_id: "flow".to_string(),
            api_key: SecretString::from("k".to_string()),
            timeout: Some(Duration::from_secs(5)),
        };
        let client = LangflowClient::new(&config).unwrap();
        let err = client
            .run_flow("hello".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::Transport(_)));
    }
}
