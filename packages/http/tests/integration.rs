use std::io::Read;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use riak_http::{
    ClientBuilder, ClientConfig, Endpoint, Error, RequestMeta, RiakHttpClient, RiakObject,
    TransportError,
};

/// A URL nothing listens on: bind an ephemeral port, then let it go.
fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

fn direct_client(uri: &str) -> RiakHttpClient {
    RiakHttpClient::new(ClientConfig::new(format!("{uri}/riak"))).unwrap()
}

/// Keeps the last PUT body and serves it back to GETs.
#[derive(Clone, Default)]
struct Stored(Arc<Mutex<Option<(String, Vec<u8>)>>>);

impl Respond for Stored {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut slot = self.0.lock().unwrap();
        if request.method.as_str() == "PUT" {
            let content_type = request
                .headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            *slot = Some((content_type, request.body.clone()));
            return ResponseTemplate::new(204);
        }
        match slot.as_ref() {
            Some((content_type, body)) => ResponseTemplate::new(200)
                .insert_header("content-type", content_type.as_str())
                .insert_header("x-riak-vclock", "a85hYGBgzGDKBVIcypz/fgaUHjmTwZTImMfKsMKK7zRfFgA=")
                .set_body_bytes(body.clone()),
            None => ResponseTemplate::new(404),
        }
    }
}

#[tokio::test]
async fn test_fetch_sends_read_quorum() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/riak/people/alice"))
        .and(query_param("r", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-riak-vclock", "vc1")
                .set_body_string("{\"age\":30}"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();

    let response = tokio::task::spawn_blocking(move || {
        direct_client(&uri).fetch("people", "alice", None, false).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.header("X-Riak-Vclock"), Some("vc1"));
    assert_eq!(response.body_text().unwrap(), "{\"age\":30}");
    assert_eq!(response.bucket.as_deref(), Some("people"));
    assert_eq!(response.key.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_store_then_fetch() {
    let server = MockServer::start().await;
    let stored = Stored::default();

    Mock::given(path("/riak/people/alice"))
        .respond_with(stored.clone())
        .mount(&server)
        .await;

    let uri = server.uri();

    let fetched = tokio::task::spawn_blocking(move || {
        let client = direct_client(&uri);
        let object = RiakObject::new("people", "alice", "{\"age\":30}")
            .with_content_type("application/json")
            .with_usermeta("Origin", "import");

        let stored = client.store(&object, None).unwrap();
        assert_eq!(stored.status, 204);

        let response = client.fetch("people", "alice", None, false).unwrap();
        RiakObject::from_response("people", "alice", &response)
    })
    .await
    .unwrap();

    assert_eq!(fetched.value().as_ref(), b"{\"age\":30}");
    assert_eq!(fetched.content_type(), "application/json");
    assert!(fetched.vclock().is_some());

    let requests = server.received_requests().await.unwrap();
    let put = &requests[0];
    assert_eq!(put.method.as_str(), "PUT");
    assert!(put.headers.get("x-riak-clientid").is_some());
    assert_eq!(put.headers.get("x-riak-meta-origin").unwrap(), "import");
    assert_eq!(put.headers.get("connection").unwrap(), "keep-alive");
}

#[tokio::test]
async fn test_failover_skips_dead_nodes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/riak/b/k"))
        .respond_with(ResponseTemplate::new(200).set_body_string("value"))
        .mount(&server)
        .await;

    let dead_a = dead_url();
    let dead_b = dead_url();
    let live = server.uri();
    let urls = vec![dead_a, dead_b, live.clone()];

    let (response, remaining) = tokio::task::spawn_blocking(move || {
        let client = RiakHttpClient::new(ClientConfig::failover(urls, None)).unwrap();
        let response = client.fetch("b", "k", None, false).unwrap();
        (response, client.endpoints().unwrap())
    })
    .await
    .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text().unwrap(), "value");
    assert_eq!(remaining, vec![Endpoint::parse(&live).unwrap()]);
}

#[test]
fn test_all_dead_nodes_exhaust() {
    let urls = vec![dead_url(), dead_url(), dead_url()];
    let client = RiakHttpClient::new(ClientConfig::failover(urls, None)).unwrap();

    let err = client.fetch("b", "k", None, false).unwrap_err();

    match err {
        Error::Exhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(source, Some(TransportError::Request { .. })));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert!(client.endpoints().unwrap().is_empty());

    // Nothing left to try: no attempt at all.
    let err = client.delete("b", "k", None).unwrap_err();
    assert!(matches!(
        err,
        Error::Exhausted {
            attempts: 0,
            source: None
        }
    ));
}

#[test]
fn test_handler_receives_exhaustion() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let client = ClientBuilder::new(ClientConfig::failover([dead_url()], None))
        .error_handler(move |e: Error| -> Result<(), Error> {
            log.lock().unwrap().push(e.to_string());
            Ok(())
        })
        .build()
        .unwrap();

    let response = client.fetch("b", "k", None, false).unwrap();

    assert!(response.is_placeholder());
    assert!(response.headers.is_empty());
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["No live riak servers available to handle this request".to_string()]
    );
}

#[tokio::test]
async fn test_direct_transport_failure_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let uri = server.uri();

    let err = tokio::task::spawn_blocking(move || {
        let config = ClientConfig {
            timeout_ms: Some(50),
            ..ClientConfig::new(format!("{uri}/riak"))
        };
        RiakHttpClient::new(config)
            .unwrap()
            .fetch("b", "k", None, false)
            .unwrap_err()
    })
    .await
    .unwrap();

    assert!(matches!(err, Error::Transport(TransportError::Request { .. })));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_error_status_is_returned_not_thrown() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/riak/b/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found\n"))
        .mount(&server)
        .await;

    let uri = server.uri();

    let response = tokio::task::spawn_blocking(move || {
        direct_client(&uri).fetch("b", "missing", None, false).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(response.status, 404);
    assert!(response.is_client_error());
}

#[tokio::test]
async fn test_list_bucket_streams_keys() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/riak/people"))
        .and(query_param("keys", "stream"))
        .and(header("accept", "application/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{\"props\":{}}{\"keys\":[\"alice\"]}{\"keys\":[\"bob\"]}"),
        )
        .mount(&server)
        .await;

    let uri = server.uri();

    let body = tokio::task::spawn_blocking(move || {
        let mut response = direct_client(&uri).list_bucket("people", None, true).unwrap();
        assert!(response.body.is_none());
        let mut body = String::new();
        response
            .take_stream()
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        body
    })
    .await
    .unwrap();

    assert!(body.contains("\"bob\""));
}

#[tokio::test]
async fn test_get_bucket_schema_omits_keys() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/riak/people"))
        .and(query_param("keys", "false"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"props": {"n_val": 3}})),
        )
        .mount(&server)
        .await;

    let uri = server.uri();

    let props = tokio::task::spawn_blocking(move || {
        let response = direct_client(&uri).get_bucket_schema("people", None).unwrap();
        response.json::<serde_json::Value>().unwrap()
    })
    .await
    .unwrap();

    assert_eq!(props["props"]["n_val"], 3);
}

#[tokio::test]
async fn test_set_bucket_schema_puts_json() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/riak/people"))
        .and(header("content-type", "application/json"))
        .and(body_json(serde_json::json!({"props": {"allow_mult": true}})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();

    let response = tokio::task::spawn_blocking(move || {
        let schema = serde_json::json!({"props": {"allow_mult": true}});
        direct_client(&uri)
            .set_bucket_schema("people", Some(&schema), None)
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(response.status, 204);
}

#[tokio::test]
async fn test_walk_and_map_reduce_paths() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/riak/people/alice/people,friend,1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("--multipart--"))
        .expect(1)
        .mount(&server)
        .await;

    let job = r#"{"inputs":"people","query":[{"map":{"language":"javascript"}}]}"#;
    Mock::given(method("POST"))
        .and(path("/mapred"))
        .and(body_string(job))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();

    let (walked, reduced) = tokio::task::spawn_blocking(move || {
        let client = direct_client(&uri);
        let walked = client
            .walk("people", "alice", "people,friend,1", None)
            .unwrap();
        let reduced = client.map_reduce(job, None).unwrap();
        (walked, reduced)
    })
    .await
    .unwrap();

    assert_eq!(walked.status, 200);
    assert_eq!(reduced.body_text().unwrap(), "[]");
}

#[tokio::test]
async fn test_caller_query_params_merge_with_url_query() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/riak/b/k"))
        .and(query_param("dw", "1"))
        .and(query_param("rw", "3"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();

    let response = tokio::task::spawn_blocking(move || {
        let client = RiakHttpClient::new(ClientConfig::new(format!("{uri}/riak?dw=1"))).unwrap();
        let meta = RequestMeta::new().with_query_param("rw", "3");
        client.delete("b", "k", Some(meta)).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(response.status, 204);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].url.query(), Some("dw=1&rw=3"));
}

#[tokio::test]
async fn test_stream_handler_sees_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/riak/b/k"))
        .and(query_param("r", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("chunked payload"))
        .mount(&server)
        .await;

    let uri = server.uri();

    let verdict = tokio::task::spawn_blocking(move || {
        direct_client(&uri)
            .stream(
                "b",
                "k",
                |response, stream| {
                    let mut body = String::new();
                    stream.read_to_string(&mut body)?;
                    Ok(response.status == 200 && body == "chunked payload")
                },
                None,
            )
            .unwrap()
    })
    .await
    .unwrap();

    assert!(verdict);
}
