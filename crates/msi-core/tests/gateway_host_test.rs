#![allow(clippy::unwrap_used)]
// Integration tests for GatewayHost against an in-process fake widget.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use msi_api::channel::handler;
use msi_core::{
    Channel, ConnectionState, Connector, CoreError, Entity, GatewayHost, GatewayOptions,
    GpsLocation, HostEvent, MessageChannel, PluginRegistry, Port,
};

// ── Fake widget ─────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct FakeWidget {
    refuse: bool,
    bind_error: Option<String>,
    opened: Arc<Mutex<Vec<Arc<MessageChannel>>>>,
    binds: Arc<Mutex<Vec<Value>>>,
    route: Arc<Mutex<Vec<(String, Value)>>>,
}

impl FakeWidget {
    fn rejecting(reason: &str) -> Self {
        Self {
            bind_error: Some(reason.to_owned()),
            ..Self::default()
        }
    }

    fn latest(&self) -> Arc<MessageChannel> {
        Arc::clone(self.opened.lock().unwrap().last().unwrap())
    }
}

impl Connector for FakeWidget {
    fn connect(&self, _url: &Url) -> impl Future<Output = Result<Port, msi_api::Error>> + Send {
        let outcome = if self.refuse {
            Err(msi_api::Error::WebSocketConnect("connection refused".into()))
        } else {
            let (host, far) = Port::pair();
            let widget = MessageChannel::new(far);

            let binds = Arc::clone(&self.binds);
            let bind_error = self.bind_error.clone();
            widget.on(
                "bind",
                handler(move |payload, r| {
                    binds.lock().unwrap().push(payload);
                    let r = r.unwrap();
                    match &bind_error {
                        Some(reason) => r.fail(reason.clone()),
                        None => r.ok(Value::Null),
                    };
                }),
            );
            for name in ["set:map:style", "show:periferals", "add:periferal:entity"] {
                widget.on(name, handler(|_, r| drop(r.map(|r| r.ok(Value::Null)))));
            }
            for name in ["set:route:origin", "set:route:destination"] {
                let route = Arc::clone(&self.route);
                widget.on(
                    name,
                    handler(move |payload, r| {
                        route.lock().unwrap().push((name.to_owned(), payload));
                        drop(r.map(|r| r.ok(Value::Null)));
                    }),
                );
            }

            self.opened.lock().unwrap().push(widget);
            Ok(host)
        };
        async move { outcome }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn options() -> GatewayOptions {
    let mut options = GatewayOptions::new(SecretString::from("tok-1".to_owned()));
    options.probe = false;
    options.origin = Some("https://shop.example".into());
    options
}

fn host(widget: &FakeWidget) -> GatewayHost<FakeWidget> {
    GatewayHost::new(options(), widget.clone(), PluginRegistry::new()).unwrap()
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<HostEvent>) -> HostEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

// ── Construction ────────────────────────────────────────────────────

#[test]
fn test_empty_access_token_fails_fast() {
    let options = GatewayOptions::new(SecretString::from(String::new()));
    let err = GatewayHost::new(options, FakeWidget::default(), PluginRegistry::new()).unwrap_err();
    assert_eq!(err.to_string(), "Configuration error: Invalid Access Token");
}

#[tokio::test]
async fn test_accessors_are_not_ready_before_mount() {
    let host = host(&FakeWidget::default());
    assert!(!host.is_ready());
    assert!(matches!(host.controls(), Err(CoreError::NotReady)));
    assert!(matches!(host.periferals(Vec::new()), Err(CoreError::NotReady)));
    assert!(matches!(
        host.pickup_point(GpsLocation::new(1.0, 1.0), None).await,
        Err(CoreError::NotReady)
    ));
}

// ── Mount / bind ────────────────────────────────────────────────────

#[tokio::test]
async fn test_mount_binds_and_raises_ready() {
    let widget = FakeWidget::default();
    let host = host(&widget);
    let mut lifecycle = host.lifecycle();
    let state = host.connection_state();

    host.mount().await.unwrap();

    assert_eq!(next_event(&mut lifecycle).await, HostEvent::Ready);
    assert_eq!(*state.borrow(), ConnectionState::Bound);
    assert!(host.is_ready());

    let bind = widget.binds.lock().unwrap()[0].clone();
    assert_eq!(bind["accessToken"], "tok-1");
    assert_eq!(bind["origin"], "https://shop.example");

    host.controls().unwrap().set_map_style("streets").await.unwrap();
}

#[tokio::test]
async fn test_bind_rejection_raises_error() {
    let host = host(&FakeWidget::rejecting("Access denied"));
    let mut lifecycle = host.lifecycle();

    let err = host.mount().await.unwrap_err();
    assert_eq!(err.to_string(), "Access denied");
    assert_eq!(
        next_event(&mut lifecycle).await,
        HostEvent::Error("Access denied".into())
    );
    assert!(!host.is_ready());
    assert_eq!(*host.connection_state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let widget = FakeWidget {
        refuse: true,
        ..FakeWidget::default()
    };
    let host = host(&widget);
    let mut lifecycle = host.lifecycle();

    assert!(matches!(host.mount().await, Err(CoreError::ConnectionFailed { .. })));
    assert!(matches!(next_event(&mut lifecycle).await, HostEvent::Error(_)));
}

#[tokio::test]
async fn test_reload_replaces_channel_without_migrating() {
    let widget = FakeWidget::default();
    let host = host(&widget);
    host.mount().await.unwrap();

    let old_channel = host.channel().unwrap();
    let old_controls = host.controls().unwrap();

    host.reload().await.unwrap();

    assert_eq!(old_channel.state(), ConnectionState::Disconnected);
    assert_eq!(host.channel().unwrap().state(), ConnectionState::Bound);
    assert!(matches!(
        old_controls.set_map_style("dark").await,
        Err(CoreError::NotReady)
    ));
    host.controls().unwrap().set_map_style("dark").await.unwrap();
    assert_eq!(widget.binds.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_forwarded_events_stay_off_the_lifecycle() {
    let widget = FakeWidget::default();
    let host = host(&widget);
    let mut lifecycle = host.lifecycle();
    let mut forwarded = host.forwarded();
    host.mount().await.unwrap();
    assert_eq!(next_event(&mut lifecycle).await, HostEvent::Ready);

    let far = widget.latest();
    far.emit("event", Some(json!({ "name": "ready", "data": { "zoom": 12 } })), None);
    far.emit("error", Some(json!("Tiles unavailable")), None);

    let ev = tokio::time::timeout(Duration::from_secs(5), forwarded.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ev.name, "ready");
    assert_eq!(ev.data["zoom"], 12);
    assert_eq!(
        next_event(&mut lifecycle).await,
        HostEvent::Error("Tiles unavailable".into())
    );
}

#[tokio::test]
async fn test_close_resets_and_raises_closed() {
    let widget = FakeWidget::default();
    let host = host(&widget);
    host.mount().await.unwrap();
    let mut lifecycle = host.lifecycle();

    host.close();
    host.close();

    assert_eq!(next_event(&mut lifecycle).await, HostEvent::Closed);
    assert!(!host.is_ready());
    assert!(lifecycle.try_recv().is_err());
}

#[tokio::test]
async fn test_widget_hangup_drops_readiness() {
    let widget = FakeWidget::default();
    let host = host(&widget);
    host.mount().await.unwrap();
    let mut state = host.connection_state();
    assert!(host.is_ready());

    // Dropping the far end closes its side of the port.
    widget.opened.lock().unwrap().clear();

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!host.is_ready());
}

// ── Probe ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_load_probes_before_mounting() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let widget = FakeWidget::default();
    let mut opts = options();
    opts.probe = true;
    opts.base_url = Some(Url::parse(&server.uri()).unwrap());
    let host = GatewayHost::new(opts, widget.clone(), PluginRegistry::new()).unwrap();

    host.load().await.unwrap();
    assert!(host.is_ready());
}

#[tokio::test]
async fn test_unreachable_network_skips_mount() {
    let widget = FakeWidget::default();
    let mut opts = options();
    opts.probe = true;
    opts.base_url = Some(Url::parse("http://127.0.0.1:9").unwrap());
    let host = GatewayHost::new(opts, widget.clone(), PluginRegistry::new()).unwrap();
    let mut lifecycle = host.lifecycle();

    assert!(matches!(host.load().await, Err(CoreError::NetworkUnavailable)));
    assert_eq!(
        next_event(&mut lifecycle).await,
        HostEvent::Error("Internet network problem".into())
    );
    assert!(widget.opened.lock().unwrap().is_empty());
}

// ── Plugins ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_selected_plugins_mount_after_bind() {
    let mounted = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    {
        let mounted = Arc::clone(&mounted);
        registry.register("traffic", move |ctx| {
            mounted
                .lock()
                .unwrap()
                .push(ctx.channel.state() == ConnectionState::Bound);
            Ok(())
        });
    }

    let mut opts = options();
    opts.plugins = vec!["traffic".into()];
    let host = GatewayHost::new(opts, FakeWidget::default(), registry.clone()).unwrap();
    host.mount().await.unwrap();
    assert_eq!(*mounted.lock().unwrap(), vec![true]);

    let mut opts = options();
    opts.plugins = vec!["ghost".into()];
    let host = GatewayHost::new(opts, FakeWidget::default(), registry).unwrap();
    assert!(matches!(
        host.mount().await,
        Err(CoreError::PluginNotFound { ref name }) if name == "ghost"
    ));
}

// ── Feeds through the host ──────────────────────────────────────────

#[tokio::test]
async fn test_periferals_round_trip_through_host() {
    let widget = FakeWidget::default();
    let host = host(&widget);
    host.mount().await.unwrap();

    let periferals = host
        .periferals(vec![Entity::new("v1", GpsLocation::new(0.1, 0.1))])
        .unwrap();
    let updates = Arc::new(Mutex::new(Vec::new()));
    {
        let updates = Arc::clone(&updates);
        periferals
            .stream()
            .on_data(move |u: &msi_core::PeriferalUpdate| updates.lock().unwrap().push(u.list.len()));
    }

    periferals
        .add(Entity::new("v2", GpsLocation::new(0.2, 0.2)))
        .await
        .unwrap();
    assert_eq!(*updates.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn test_pickup_and_dropoff_through_host() {
    let widget = FakeWidget::default();
    let host = host(&widget);
    host.mount().await.unwrap();

    host.pickup_point(GpsLocation::new(1.0, 2.0), None).await.unwrap();
    host.dropoff_point(GpsLocation::new(3.0, 4.0), None).await.unwrap();

    let route = widget.route.lock().unwrap().clone();
    assert_eq!(route.len(), 2);
    assert_eq!(route[0].0, "set:route:origin");
    assert_eq!(route[0].1["caption"]["label"], "Pickup point");
    assert_eq!(route[1].0, "set:route:destination");
    assert_eq!(route[1].1["coords"]["lat"], 4.0);
}
