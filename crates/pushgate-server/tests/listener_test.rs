//! Framed RPC listener over real sockets.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pushgate_core::{
    directory::NetworkState,
    provider::ProviderRegistry,
    service::{NotificationService, ServiceConfig},
    storage::{MemoryStorage, Storage},
};
use pushgate_harness::{RecordingProvider, SimEnv, TestPermissioning, TestUser, notification};
use pushgate_proto::{NotificationBatch, Request, Response};
use pushgate_server::{Listener, listener::frame_codec};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{
    codec::{Framed, LengthDelimitedCodec},
    sync::CancellationToken,
};

type Service = NotificationService<SimEnv, MemoryStorage, NetworkState<MemoryStorage>>;
type Conn = Framed<TcpStream, LengthDelimitedCodec>;

struct Running {
    addr: SocketAddr,
    env: SimEnv,
    storage: Arc<MemoryStorage>,
    service: Arc<Service>,
    permissioning: TestPermissioning,
    cancel: CancellationToken,
}

async fn start(trusted: Vec<IpAddr>) -> Running {
    let env = SimEnv::default();
    let storage = Arc::new(MemoryStorage::new());
    let permissioning = TestPermissioning::from_seed(1);
    let directory = Arc::new(
        NetworkState::restore(permissioning.verifying_key(), 16, Arc::clone(&storage)).unwrap(),
    );
    let providers = ProviderRegistry::new().with("android", RecordingProvider::new().as_provider());
    let service = Arc::new(NotificationService::new(
        env.clone(),
        Arc::clone(&storage),
        directory,
        providers,
        ServiceConfig::default(),
    ));

    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let listener = Listener::new(Arc::clone(&service), trusted);
    let token = cancel.clone();
    tokio::spawn(async move { listener.serve(socket, token).await });

    Running { addr, env, storage, service, permissioning, cancel }
}

async fn connect(addr: SocketAddr) -> Conn {
    Framed::new(TcpStream::connect(addr).await.unwrap(), frame_codec())
}

async fn call(conn: &mut Conn, frame: Bytes) -> Response {
    conn.send(frame).await.unwrap();
    let reply = conn.next().await.unwrap().unwrap();
    Response::decode(&reply).unwrap()
}

fn batch(round_id: u64) -> Bytes {
    Request::NotificationBatch(NotificationBatch {
        round_id,
        notifications: vec![notification(5, 1)],
    })
    .encode()
    .unwrap()
}

#[tokio::test]
async fn trusted_peer_can_push_batches() {
    let running = start(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]).await;
    let mut conn = connect(running.addr).await;

    assert_eq!(call(&mut conn, batch(1)).await, Response::Ok);
    assert_eq!(call(&mut conn, batch(1)).await, Response::Ok);
    assert_eq!(running.service.buffer().len(), 1);

    running.cancel.cancel();
}

#[tokio::test]
async fn untrusted_peer_is_a_client() {
    let running = start(Vec::new()).await;
    let mut conn = connect(running.addr).await;

    assert!(matches!(call(&mut conn, batch(1)).await, Response::Error { .. }));
    assert!(running.service.buffer().is_empty());

    let user = TestUser::new(7, &running.permissioning);
    let now = running.env.now_nanos();
    let request = Request::RegisterToken(user.register_token("android", "tok", now));
    assert_eq!(call(&mut conn, request.encode().unwrap()).await, Response::Ok);
    assert!(running.storage.get_token("tok").unwrap().is_some());

    running.cancel.cancel();
}

#[tokio::test]
async fn garbage_frame_gets_error_and_connection_survives() {
    let running = start(Vec::new()).await;
    let mut conn = connect(running.addr).await;

    let reply = call(&mut conn, Bytes::from_static(&[0xff, 0x00, 0x13])).await;
    assert!(matches!(reply, Response::Error { .. }));

    let user = TestUser::new(8, &running.permissioning);
    let now = running.env.now_nanos();
    let request = Request::RegisterToken(user.register_token("android", "t2", now));
    assert_eq!(call(&mut conn, request.encode().unwrap()).await, Response::Ok);

    running.cancel.cancel();
}

#[tokio::test]
async fn cancel_closes_open_connections() {
    let running = start(Vec::new()).await;
    let mut conn = connect(running.addr).await;

    running.cancel.cancel();

    // Closed cleanly, or reset if cancel won the race with accept
    assert!(!matches!(conn.next().await, Some(Ok(_))));
}
